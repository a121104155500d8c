//! # Models
//!
//! Wire and domain types for the trip feed: raw documents as they arrive on
//! disk, validated events, and the batches the replay engine hands out.

pub mod batch;
pub mod errors;
pub mod event;
pub mod trip;

pub use batch::{Batch, DeliveredEvent};
pub use errors::{EventFieldError, MalformedDataError, ReplayError};
pub use event::{RawEvent, TripEvent, parse_timestamp};
pub use trip::{FleetFeed, RawTrip, Trip};
