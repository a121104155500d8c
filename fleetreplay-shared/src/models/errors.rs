use thiserror::Error;

/// Errors surfaced by the replay engine's control surface.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// The feed could not be loaded; no state was replaced.
    #[error("malformed data: {0}")]
    MalformedData(#[from] MalformedDataError),

    /// A speed multiplier that is zero, negative, or not finite.
    #[error("invalid speed {0}: must be a positive, finite number")]
    InvalidSpeed(f64),
}

/// Reasons a feed document is rejected at load time.
#[derive(Debug, Error)]
pub enum MalformedDataError {
    /// The document itself is not a well-formed feed.
    #[error("document is not a valid trip feed: {0}")]
    Document(#[from] serde_json::Error),

    /// A single event failed validation.
    #[error("trip `{trip_id}` event #{index}: {reason}")]
    Event {
        /// Identifier of the trip owning the event.
        trip_id: String,
        /// Position of the event in the trip's input order.
        index: usize,
        /// What was wrong with it.
        #[source]
        reason: EventFieldError,
    },

    /// Two trips share the same identifier.
    #[error("duplicate trip id `{0}`")]
    DuplicateTrip(String),

    /// A trip identifier is empty or blank.
    #[error("trip #{0} has an empty id")]
    EmptyTripId(usize),
}

/// Field level validation failures for a single event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventFieldError {
    /// Neither `timestamp` nor `ts` is present.
    #[error("missing timestamp (expected `timestamp` or `ts`)")]
    MissingTimestamp,

    /// The timestamp is present but cannot be parsed.
    #[error("unparseable timestamp `{0}`")]
    InvalidTimestamp(String),

    /// A coordinate field is absent.
    #[error("missing `{0}`")]
    MissingCoordinate(&'static str),

    /// A coordinate is not a finite number.
    #[error("`{0}` must be a finite number")]
    InvalidCoordinate(&'static str),

    /// `speed` is present but not a finite number.
    #[error("`speed` must be a finite number")]
    InvalidSpeed,

    /// `eventType` is present but not a string.
    #[error("`eventType` must be a string")]
    InvalidEventType,
}
