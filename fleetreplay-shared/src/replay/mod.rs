//! # Replay
//!
//! The virtual-clock replay engine and its parts, leaves first:
//!
//! - [`store`]: per-trip sorted events with a monotonic delivery pointer.
//! - [`clock`]: the virtual clock, advanced by scaled real-time deltas.
//! - [`subscribers`]: batch callbacks with snapshot dispatch.
//! - [`engine`]: ties the three together and scans for due events.
//! - [`status`]: fleet counters derived from delivery state.
//! - [`pacing`]: delay math for the timestamp-paced stream.
//! - `driver`: Tokio tick loop around a shared engine.

pub mod clock;
#[cfg(feature = "tokio")]
pub mod driver;
pub mod engine;
pub mod pacing;
pub mod status;
pub mod store;
pub mod subscribers;

pub use clock::{DEFAULT_SPEED, VirtualClock, validate_speed};
#[cfg(feature = "tokio")]
pub use driver::{
    DEFAULT_TICK_INTERVAL, FrameSignal, FrameTicks, IntervalTicks, PlaybackDriver, TickSource,
};
pub use engine::{EngineState, LoadSummary, ReplayEngine};
pub use pacing::{PacingPolicy, sort_by_timestamp};
pub use status::{FleetStatus, TripProgress, TripStatus};
pub use store::{EventStore, LastPosition, TripCursor};
pub use subscribers::{SubscriberRegistry, Subscription};
