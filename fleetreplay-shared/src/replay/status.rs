//! Fleet counters derived from delivery state.
//!
//! Nothing here is stored: every view is recomputed from the trip pointers and
//! the last delivered event, so it can never disagree with the engine.

use std::fmt;

use serde::{Serialize, Serializer};

use super::store::{EventStore, TripCursor};

const CANCELLED: &str = "cancelled";

/// Lifecycle of one trip within the current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TripStatus {
    /// No event delivered yet.
    Pending,
    /// Started, and the last event carried no type.
    Active,
    /// Started, and the last event carried this type (`cancelled`, `pickup`, ...).
    Reported(String),
    /// Every event delivered.
    Completed,
}

impl TripStatus {
    /// Derives the status of one trip.
    pub fn of(cursor: &TripCursor) -> Self {
        if cursor.is_completed() {
            return Self::Completed;
        }
        match cursor.last_event() {
            None => Self::Pending,
            Some(event) => match event.event_type.as_deref() {
                Some(kind) if !kind.is_empty() => Self::Reported(kind.to_string()),
                _ => Self::Active,
            },
        }
    }

    /// Wire label.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Reported(kind) => kind,
            Self::Completed => "completed",
        }
    }

    /// Whether the trip's last event marks it cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Reported(kind) if kind == CANCELLED)
    }
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for TripStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Progress of a single trip.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TripProgress {
    /// Trip identifier.
    pub trip_id: String,
    /// Name shown to people.
    pub display_name: String,
    /// Derived status.
    pub status: TripStatus,
    /// Events delivered so far.
    pub delivered: usize,
    /// Events in the trip.
    pub total: usize,
    /// `delivered / total * 100`, 0 for an empty trip.
    pub progress_pct: f64,
}

/// Aggregate counters plus per-trip progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetStatus {
    /// Number of trips loaded.
    pub total: usize,
    /// Started, not completed and not cancelled.
    pub active: usize,
    /// Not completed, last event type `cancelled`.
    pub cancelled: usize,
    /// Every event delivered.
    pub completed: usize,
    /// Nothing delivered yet.
    pub pending: usize,
    /// Per-trip detail in load order.
    pub trips: Vec<TripProgress>,
}

impl FleetStatus {
    /// Computes counters from the current delivery state.
    pub fn from_store(store: &EventStore) -> Self {
        let mut fleet = Self {
            total: store.len(),
            ..Self::default()
        };

        for cursor in store.trips() {
            let status = TripStatus::of(cursor);
            match &status {
                TripStatus::Completed => fleet.completed += 1,
                TripStatus::Pending => fleet.pending += 1,
                s if s.is_cancelled() => fleet.cancelled += 1,
                _ => fleet.active += 1,
            }
            fleet.trips.push(TripProgress {
                trip_id: cursor.id().to_string(),
                display_name: cursor.trip().display_name.clone(),
                status,
                delivered: cursor.delivered(),
                total: cursor.total(),
                progress_pct: cursor.progress_pct(),
            });
        }

        fleet
    }
}
