use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{DeliveredEvent, FleetFeed, MalformedDataError, Trip, TripEvent};

/// A trip together with its delivery pointer.
///
/// Everything before `pointer` has been delivered in the current session.
#[derive(Debug, Clone)]
pub struct TripCursor {
    trip: Trip,
    pointer: usize,
    completed: bool,
}

impl TripCursor {
    fn new(trip: Trip) -> Self {
        Self {
            trip,
            pointer: 0,
            completed: false,
        }
    }

    /// The underlying trip.
    pub fn trip(&self) -> &Trip {
        &self.trip
    }

    /// Trip identifier.
    pub fn id(&self) -> &str {
        &self.trip.id
    }

    /// Number of events delivered so far.
    pub fn delivered(&self) -> usize {
        self.pointer
    }

    /// Number of events in the trip.
    pub fn total(&self) -> usize {
        self.trip.len()
    }

    /// Events not yet delivered.
    pub fn pending(&self) -> &[TripEvent] {
        &self.trip.events()[self.pointer..]
    }

    /// Most recently delivered event.
    pub fn last_event(&self) -> Option<&TripEvent> {
        self.pointer
            .checked_sub(1)
            .and_then(|index| self.trip.events().get(index))
    }

    /// Whether every event has been delivered. Terminal for the session.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Delivered share of the trip in percent; 0 for an empty trip.
    #[allow(clippy::cast_precision_loss)]
    pub fn progress_pct(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.pointer as f64 / total as f64 * 100.0
        }
    }

    fn advance_to(&mut self, now: DateTime<Utc>, batch: &mut Vec<DeliveredEvent>) {
        let events = self.trip.events();
        while let Some(event) = events.get(self.pointer) {
            if event.timestamp > now {
                break;
            }
            batch.push(DeliveredEvent {
                trip_id: self.trip.id.clone(),
                event: event.clone(),
            });
            self.pointer += 1;
        }

        if self.pointer >= events.len() {
            self.completed = true;
        }
    }

    fn rewind(&mut self) {
        self.pointer = 0;
        self.completed = false;
    }
}

/// Last known position of a trip, as the map layer consumes it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastPosition {
    /// Trip identifier.
    pub trip_id: String,
    /// Latitude of the last delivered event.
    pub lat: f64,
    /// Longitude of the last delivered event.
    pub lng: f64,
    /// Speed of the last delivered event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
}

/// Per-trip sorted event storage with delivery tracking.
#[derive(Debug, Clone, Default)]
pub struct EventStore {
    trips: Vec<TripCursor>,
    earliest: Option<DateTime<Utc>>,
}

impl EventStore {
    /// Builds a store from validated trips.
    pub fn from_trips(trips: Vec<Trip>) -> Self {
        let earliest = trips
            .iter()
            .filter_map(|trip| trip.events().first())
            .map(|event| event.timestamp)
            .min();

        Self {
            trips: trips.into_iter().map(TripCursor::new).collect(),
            earliest,
        }
    }

    /// Validates a feed and builds a store from it.
    ///
    /// # Errors
    /// Returns a [`MalformedDataError`] if any trip or event is invalid.
    pub fn from_feed(feed: FleetFeed) -> Result<Self, MalformedDataError> {
        Ok(Self::from_trips(feed.into_trips()?))
    }

    /// Replaces the whole store with `feed`.
    ///
    /// Nothing changes when validation fails.
    ///
    /// # Errors
    /// Returns a [`MalformedDataError`] if any trip or event is invalid.
    pub fn load(&mut self, feed: FleetFeed) -> Result<(), MalformedDataError> {
        *self = Self::from_feed(feed)?;
        Ok(())
    }

    /// Earliest timestamp across all trips, the clock's starting point.
    pub fn earliest(&self) -> Option<DateTime<Utc>> {
        self.earliest
    }

    /// Latest timestamp across all trips.
    pub fn latest(&self) -> Option<DateTime<Utc>> {
        self.trips
            .iter()
            .filter_map(|cursor| cursor.trip.events().last())
            .map(|event| event.timestamp)
            .max()
    }

    /// Trips in load order.
    pub fn trips(&self) -> impl ExactSizeIterator<Item = &TripCursor> {
        self.trips.iter()
    }

    /// Looks up a trip by identifier.
    pub fn trip(&self, trip_id: &str) -> Option<&TripCursor> {
        self.trips.iter().find(|cursor| cursor.id() == trip_id)
    }

    /// Number of trips.
    pub fn len(&self) -> usize {
        self.trips.len()
    }

    /// Whether no trips are loaded.
    pub fn is_empty(&self) -> bool {
        self.trips.is_empty()
    }

    /// Number of events across all trips.
    pub fn total_events(&self) -> usize {
        self.trips.iter().map(TripCursor::total).sum()
    }

    /// Whether every trip has reached its terminal state.
    pub fn all_completed(&self) -> bool {
        self.trips.iter().all(TripCursor::is_completed)
    }

    /// Delivers every pending event with `timestamp <= now`.
    ///
    /// Each trip's pointer only moves forward, so an event is returned at
    /// most once per session. The result is ordered by trip, then by time.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<DeliveredEvent> {
        let mut batch = Vec::new();
        for cursor in &mut self.trips {
            cursor.advance_to(now, &mut batch);
        }
        batch
    }

    /// Re-arms every event for delivery.
    pub fn rewind(&mut self) {
        self.trips.iter_mut().for_each(TripCursor::rewind);
    }

    /// Last delivered position of each trip that has started.
    pub fn last_positions(&self) -> Vec<LastPosition> {
        self.trips
            .iter()
            .filter_map(|cursor| {
                cursor.last_event().map(|event| LastPosition {
                    trip_id: cursor.id().to_string(),
                    lat: event.lat,
                    lng: event.lng,
                    speed: event.speed,
                })
            })
            .collect()
    }
}
