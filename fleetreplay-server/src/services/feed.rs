//! Reading recorded data from disk.
//!
//! Every call re-reads its file, so a stream or reload always sees the
//! current contents.

use std::path::{Path, PathBuf};

use serde_json::Value;
use shared::{
    models::{FleetFeed, MalformedDataError, TripEvent},
    replay::sort_by_timestamp,
};
use thiserror::Error;

const TRIP_ID_FIELD: &str = "tripId";

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{path} must hold an array of events or a trips document")]
    UnexpectedShape { path: PathBuf },
    #[error("invalid data in {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: MalformedDataError,
    },
}

impl FeedError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Read { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Raw bytes of a data file.
pub async fn read_document(path: &Path) -> Result<Vec<u8>, FeedError> {
    tokio::fs::read(path).await.map_err(|source| FeedError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads and validates a trips document.
pub async fn load_trips(path: &Path) -> Result<FleetFeed, FeedError> {
    let bytes = read_document(path).await?;
    let feed = FleetFeed::from_slice(&bytes).map_err(|source| FeedError::Malformed {
        path: path.to_path_buf(),
        source,
    })?;

    // Validate up front so callers get the file name in the error.
    feed.clone()
        .into_trips()
        .map_err(|source| FeedError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(feed)
}

/// Reads the events for one paced stream, sorted by timestamp.
///
/// Accepts a flat array of events or a trips document. Trip events are
/// flattened in load order and tagged with their `tripId` unless they already
/// carry one.
pub async fn load_stream_events(path: &Path) -> Result<Vec<TripEvent>, FeedError> {
    let bytes = read_document(path).await?;
    let mut events = parse_stream_events(&bytes).map_err(|err| err.at(path))?;
    sort_by_timestamp(&mut events);
    Ok(events)
}

enum ParseFailure {
    Json(serde_json::Error),
    Shape,
    Malformed(MalformedDataError),
}

impl ParseFailure {
    fn at(self, path: &Path) -> FeedError {
        let path = path.to_path_buf();
        match self {
            Self::Json(source) => FeedError::Parse { path, source },
            Self::Shape => FeedError::UnexpectedShape { path },
            Self::Malformed(source) => FeedError::Malformed { path, source },
        }
    }
}

fn parse_stream_events(bytes: &[u8]) -> Result<Vec<TripEvent>, ParseFailure> {
    let document: Value = serde_json::from_slice(bytes).map_err(ParseFailure::Json)?;
    match document {
        Value::Array(_) => serde_json::from_value(document).map_err(ParseFailure::Json),
        Value::Object(_) => {
            let feed: FleetFeed = serde_json::from_value(document).map_err(ParseFailure::Json)?;
            let trips = feed.into_trips().map_err(ParseFailure::Malformed)?;
            Ok(trips
                .iter()
                .flat_map(|trip| {
                    trip.events().iter().cloned().map(|mut event| {
                        event
                            .extra
                            .entry(TRIP_ID_FIELD)
                            .or_insert_with(|| Value::String(trip.id.clone()));
                        event
                    })
                })
                .collect())
        }
        _ => Err(ParseFailure::Shape),
    }
}
