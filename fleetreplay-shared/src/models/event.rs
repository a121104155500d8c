use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use super::errors::EventFieldError;

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// A validated, immutable location event.
///
/// Ordering is by `timestamp` only. Fields the feed carries beyond the known
/// ones are kept in `extra` and written back out on serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEvent")]
pub struct TripEvent {
    /// Instant the event was recorded.
    #[serde(serialize_with = "serialize_millis")]
    pub timestamp: DateTime<Utc>,
    /// Latitude in decimal degrees.
    pub lat: f64,
    /// Longitude in decimal degrees.
    pub lng: f64,
    /// Reported speed, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    /// Domain event kind (`position`, `cancelled`, `delivered`, ...).
    #[serde(rename = "eventType", skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    /// Extension fields passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TripEvent {
    /// Creates a plain position event with no optional fields.
    pub fn new(timestamp: DateTime<Utc>, lat: f64, lng: f64) -> Self {
        Self {
            timestamp,
            lat,
            lng,
            speed: None,
            event_type: None,
            extra: Map::new(),
        }
    }

    /// Sets the event type.
    #[must_use]
    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Sets the reported speed.
    #[must_use]
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    /// Milliseconds since the Unix epoch.
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

fn serialize_millis<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// An event exactly as it appears in a feed document, before validation.
///
/// Either `timestamp` or `ts` may carry the instant; `timestamp` wins when
/// both are present.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEvent {
    #[serde(default)]
    timestamp: Option<Value>,
    #[serde(default)]
    ts: Option<Value>,
    #[serde(default)]
    lat: Option<Value>,
    #[serde(default)]
    lng: Option<Value>,
    #[serde(default)]
    speed: Option<Value>,
    #[serde(rename = "eventType", default)]
    event_type: Option<Value>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl RawEvent {
    /// Validates the raw fields and normalizes the timestamp key.
    ///
    /// # Errors
    /// Returns an [`EventFieldError`] naming the first field that is missing or
    /// cannot be parsed.
    pub fn validate(self) -> Result<TripEvent, EventFieldError> {
        let stamp = self
            .timestamp
            .filter(|value| !value.is_null())
            .or(self.ts.filter(|value| !value.is_null()))
            .ok_or(EventFieldError::MissingTimestamp)?;
        let timestamp = timestamp_from_value(&stamp)?;
        let lat = coordinate(self.lat, "lat")?;
        let lng = coordinate(self.lng, "lng")?;
        let speed = optional_speed(self.speed)?;
        let event_type = optional_event_type(self.event_type)?;

        Ok(TripEvent {
            timestamp,
            lat,
            lng,
            speed,
            event_type,
            extra: self.extra,
        })
    }
}

impl TryFrom<RawEvent> for TripEvent {
    type Error = EventFieldError;

    fn try_from(raw: RawEvent) -> Result<Self, Self::Error> {
        raw.validate()
    }
}

fn timestamp_from_value(value: &Value) -> Result<DateTime<Utc>, EventFieldError> {
    let parsed = match value {
        Value::String(text) => parse_timestamp(text),
        // Numeric stamps are epoch milliseconds.
        Value::Number(number) => number
            .as_i64()
            .and_then(DateTime::from_timestamp_millis),
        _ => None,
    };

    parsed.ok_or_else(|| EventFieldError::InvalidTimestamp(value.to_string()))
}

fn coordinate(value: Option<Value>, field: &'static str) -> Result<f64, EventFieldError> {
    match value {
        None | Some(Value::Null) => Err(EventFieldError::MissingCoordinate(field)),
        Some(value) => value
            .as_f64()
            .filter(|number| number.is_finite())
            .ok_or(EventFieldError::InvalidCoordinate(field)),
    }
}

fn optional_speed(value: Option<Value>) -> Result<Option<f64>, EventFieldError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_f64()
            .filter(|number| number.is_finite())
            .map(Some)
            .ok_or(EventFieldError::InvalidSpeed),
    }
}

fn optional_event_type(value: Option<Value>) -> Result<Option<String>, EventFieldError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text)),
        Some(_) => Err(EventFieldError::InvalidEventType),
    }
}

/// Parses an ISO-8601 instant.
///
/// RFC 3339 strings keep their offset; naive date-times are read as UTC.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn raw(value: Value) -> RawEvent {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn accepts_ts_alias() {
        let event = raw(json!({"ts": "2024-05-01T12:00:00Z", "lat": 1.5, "lng": -2.0}))
            .validate()
            .unwrap();

        assert_eq!(
            event.timestamp,
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
        );
        assert!((event.lat - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn timestamp_key_wins_over_ts() {
        let event = raw(json!({
            "timestamp": "2024-05-01T12:00:05Z",
            "ts": "2024-05-01T12:00:00Z",
            "lat": 0.0,
            "lng": 0.0
        }))
        .validate()
        .unwrap();

        assert_eq!(event.timestamp.timestamp() % 60, 5);
    }

    #[test]
    fn offsets_are_normalized_to_utc() {
        let parsed = parse_timestamp("2024-05-01T14:00:00+02:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn naive_timestamps_are_utc() {
        let parsed = parse_timestamp("2024-05-01T12:00:00.250").unwrap();
        assert_eq!(parsed.timestamp_subsec_millis(), 250);
        assert!(parse_timestamp("2024-05-01 12:00:00").is_some());
    }

    #[test]
    fn numeric_timestamps_are_epoch_millis() {
        let event = raw(json!({"timestamp": 1_714_564_800_000_i64, "lat": 0.0, "lng": 0.0}))
            .validate()
            .unwrap();
        assert_eq!(event.timestamp_millis(), 1_714_564_800_000);
    }

    #[test]
    fn rejects_garbage_timestamp() {
        let err = raw(json!({"timestamp": "yesterday-ish", "lat": 0.0, "lng": 0.0}))
            .validate()
            .unwrap_err();
        assert_eq!(
            err,
            EventFieldError::InvalidTimestamp("\"yesterday-ish\"".into())
        );
    }

    #[test]
    fn rejects_missing_or_non_numeric_coordinates() {
        let missing = raw(json!({"timestamp": "2024-05-01T12:00:00Z", "lat": 1.0}))
            .validate()
            .unwrap_err();
        assert_eq!(missing, EventFieldError::MissingCoordinate("lng"));

        let text = raw(json!({"timestamp": "2024-05-01T12:00:00Z", "lat": "north", "lng": 1.0}))
            .validate()
            .unwrap_err();
        assert_eq!(text, EventFieldError::InvalidCoordinate("lat"));
    }

    #[test]
    fn validates_optional_fields() {
        let base = json!({"ts": "2024-05-01T12:00:00Z", "lat": 0.0, "lng": 0.0});
        let with = |key: &str, value: Value| {
            let mut event = base.clone();
            event[key] = value;
            raw(event).validate()
        };

        assert_eq!(with("speed", json!("fast")).unwrap_err(), EventFieldError::InvalidSpeed);
        assert_eq!(with("eventType", json!(7)).unwrap_err(), EventFieldError::InvalidEventType);

        let nulls = with("speed", Value::Null).unwrap();
        assert_eq!(nulls.speed, None);
        let typed = with("eventType", json!("pickup")).unwrap();
        assert_eq!(typed.event_type.as_deref(), Some("pickup"));
    }

    #[test]
    fn serializes_normalized_with_extension_fields() {
        let event = raw(json!({
            "ts": "2024-05-01T12:00:00Z",
            "lat": 10.0,
            "lng": 20.0,
            "eventType": "cancelled",
            "driver": "ada"
        }))
        .validate()
        .unwrap();

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["timestamp"], "2024-05-01T12:00:00.000Z");
        assert_eq!(value["eventType"], "cancelled");
        assert_eq!(value["driver"], "ada");
        assert!(value.get("ts").is_none());
        assert!(value.get("speed").is_none());
    }

    #[test]
    fn deserializes_through_validation() {
        let event: TripEvent = serde_json::from_value(json!({
            "timestamp": "2024-05-01T12:00:00.000Z",
            "lat": 10.0,
            "lng": 20.0,
            "speed": 31.5
        }))
        .unwrap();
        assert_eq!(event.speed, Some(31.5));

        let bad = serde_json::from_value::<TripEvent>(json!({"lat": 1.0, "lng": 2.0}));
        assert!(bad.is_err());
    }
}
