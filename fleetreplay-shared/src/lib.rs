#![cfg_attr(not(test), forbid(unsafe_code))]

//! Shared building blocks for FleetReplay: the trip feed data model, the
//! per-trip event store, the virtual clock, and the replay engine that turns
//! recorded events into live-looking batches.

pub mod config;
pub mod models;
pub mod replay;

pub use models::{Batch, DeliveredEvent, FleetFeed, MalformedDataError, ReplayError, TripEvent};
pub use replay::{EngineState, EventStore, ReplayEngine, Subscription, VirtualClock};
