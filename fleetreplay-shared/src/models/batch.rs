use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::TripEvent;

/// One event delivered by the replay engine, tagged with its trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveredEvent {
    /// Owning trip.
    pub trip_id: String,
    /// The event itself.
    pub event: TripEvent,
}

/// Everything that became due on a single tick or seek.
///
/// Events appear in trip iteration order and, within one trip, in
/// chronological order. A batch is never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Virtual time at which the batch was produced.
    pub now: DateTime<Utc>,
    /// Newly due events.
    pub events: Vec<DeliveredEvent>,
}

impl Batch {
    /// Number of events in the batch.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Always `false` for batches produced by the engine.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events belonging to `trip_id`, in delivery order.
    pub fn for_trip<'a>(&'a self, trip_id: &'a str) -> impl Iterator<Item = &'a TripEvent> + 'a {
        self.events
            .iter()
            .filter(move |delivered| delivered.trip_id == trip_id)
            .map(|delivered| &delivered.event)
    }
}
