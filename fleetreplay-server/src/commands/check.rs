//! Validates a trips document and summarizes it.

use std::{fmt, path::Path};

use chrono::{DateTime, SecondsFormat, Utc};
use shared::replay::EventStore;

use crate::services::feed;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripSummary {
    pub id: String,
    pub name: String,
    pub events: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckReport {
    pub trips: Vec<TripSummary>,
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
}

impl CheckReport {
    pub fn total_events(&self) -> usize {
        self.trips.iter().map(|trip| trip.events).sum()
    }
}

fn stamp(value: Option<DateTime<Utc>>) -> String {
    value.map_or_else(
        || "-".to_string(),
        |at| at.to_rfc3339_opts(SecondsFormat::Millis, true),
    )
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} trips, {} events, {} .. {}",
            self.trips.len(),
            self.total_events(),
            stamp(self.earliest),
            stamp(self.latest)
        )?;
        for trip in &self.trips {
            writeln!(f, "  {:<16} {:>6} events  {}", trip.id, trip.events, trip.name)?;
        }
        Ok(())
    }
}

/// Loads and validates `path`.
///
/// # Errors
/// Returns an error if the file cannot be read or any trip is invalid.
pub async fn run(path: &Path) -> anyhow::Result<CheckReport> {
    let trips = feed::load_trips(path).await?.into_trips()?;
    let store = EventStore::from_trips(trips);

    Ok(CheckReport {
        trips: store
            .trips()
            .map(|cursor| TripSummary {
                id: cursor.id().to_string(),
                name: cursor.trip().display_name.clone(),
                events: cursor.total(),
            })
            .collect(),
        earliest: store.earliest(),
        latest: store.latest(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn summarizes_valid_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trips.json");
        std::fs::write(
            &path,
            r#"{"trips": [
                {"tripId": "A", "name": "Airport run", "events": [
                    {"ts": "2024-05-01T12:00:00Z", "lat": 0, "lng": 0},
                    {"ts": "2024-05-01T12:30:00Z", "lat": 1, "lng": 1}
                ]},
                {"id": "B", "events": []}
            ]}"#,
        )
        .unwrap();

        let report = run(&path).await.unwrap();
        assert_eq!(report.total_events(), 2);
        assert_eq!(report.trips[1].name, "B");

        let text = report.to_string();
        assert!(text.starts_with("2 trips, 2 events, 2024-05-01T12:00:00.000Z .. 2024-05-01T12:30:00.000Z"));
        assert!(text.contains("Airport run"));
    }

    #[tokio::test]
    async fn rejects_duplicate_trip_ids() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trips.json");
        std::fs::write(
            &path,
            r#"{"trips": [{"tripId": "A", "events": []}, {"tripId": "A", "events": []}]}"#,
        )
        .unwrap();

        let err = run(&path).await.unwrap_err();
        assert!(err.to_string().contains("trips.json"));
    }
}
