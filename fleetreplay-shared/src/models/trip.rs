use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::{
    errors::MalformedDataError,
    event::{RawEvent, TripEvent},
};

/// The feed document: `{ "trips": [ { "tripId", "name", "events": [...] } ] }`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FleetFeed {
    /// Trips in document order. Required: a document without it is not a feed.
    pub trips: Vec<RawTrip>,
}

/// A trip as it appears in the feed, events not yet validated.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTrip {
    /// Trip identifier; `id` is accepted as an alias.
    #[serde(rename = "tripId", alias = "id")]
    pub trip_id: String,
    /// Human readable name; defaults to the identifier.
    #[serde(default)]
    pub name: Option<String>,
    /// Events in input order.
    #[serde(default)]
    pub events: Vec<RawEvent>,
}

impl FleetFeed {
    /// Parses a feed document from JSON text.
    ///
    /// # Errors
    /// Returns [`MalformedDataError::Document`] when the text is not a feed.
    pub fn from_json(text: &str) -> Result<Self, MalformedDataError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Parses a feed document from raw bytes.
    ///
    /// # Errors
    /// Returns [`MalformedDataError::Document`] when the bytes are not a feed.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, MalformedDataError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Validates every trip and sorts each trip's events.
    ///
    /// Validation is all-or-nothing: the first bad event aborts the whole
    /// conversion.
    ///
    /// # Errors
    /// Returns a [`MalformedDataError`] for blank or duplicate trip ids and for
    /// any event failing validation.
    pub fn into_trips(self) -> Result<Vec<Trip>, MalformedDataError> {
        let mut seen = HashSet::with_capacity(self.trips.len());
        let mut trips = Vec::with_capacity(self.trips.len());

        for (position, raw) in self.trips.into_iter().enumerate() {
            if raw.trip_id.trim().is_empty() {
                return Err(MalformedDataError::EmptyTripId(position));
            }
            if !seen.insert(raw.trip_id.clone()) {
                return Err(MalformedDataError::DuplicateTrip(raw.trip_id));
            }
            trips.push(Trip::try_from(raw)?);
        }

        Ok(trips)
    }
}

/// A validated trip owning its events in ascending timestamp order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Trip {
    /// Trip identifier.
    pub id: String,
    /// Name shown to people.
    pub display_name: String,
    events: Vec<TripEvent>,
}

impl Trip {
    /// Builds a trip, stable-sorting the events by timestamp.
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        mut events: Vec<TripEvent>,
    ) -> Self {
        // Stable: equal timestamps keep their input order.
        events.sort_by_key(|event| event.timestamp);
        Self {
            id: id.into(),
            display_name: display_name.into(),
            events,
        }
    }

    /// Events in ascending timestamp order.
    pub fn events(&self) -> &[TripEvent] {
        &self.events
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the trip has no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl TryFrom<RawTrip> for Trip {
    type Error = MalformedDataError;

    fn try_from(raw: RawTrip) -> Result<Self, Self::Error> {
        let RawTrip {
            trip_id,
            name,
            events,
        } = raw;

        let events = events
            .into_iter()
            .enumerate()
            .map(|(index, event)| {
                event.validate().map_err(|reason| MalformedDataError::Event {
                    trip_id: trip_id.clone(),
                    index,
                    reason,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let display_name = name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| trip_id.clone());

        Ok(Self::new(trip_id, display_name, events))
    }
}
