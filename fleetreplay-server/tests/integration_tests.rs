//! Router-level tests for the FleetReplay HTTP surface.

use std::{path::Path, sync::Arc};

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use serde_json::{Value, json};
use server::server::{create_app_router, create_app_state, metrics_handle};
use shared::config::Config;
use tempfile::TempDir;
use tower::ServiceExt;

const TRIPS: &str = r#"{"trips": [
    {"tripId": "A", "name": "Airport run", "events": [
        {"ts": "2024-05-01T12:00:10Z", "lat": 1.0, "lng": 1.0},
        {"ts": "2024-05-01T12:00:00Z", "lat": 0.0, "lng": 0.0, "speed": 12.5}
    ]},
    {"tripId": "B", "name": "Downtown", "events": [
        {"timestamp": "2024-05-01T12:00:05Z", "lat": 5.0, "lng": 5.0, "eventType": "pickup"}
    ]}
]}"#;

const EVENTS: &str = r#"[
    {"ts": "2024-05-01T12:00:10Z", "lat": 3.0, "lng": 3.0},
    {"ts": "2024-05-01T12:00:00Z", "lat": 1.0, "lng": 1.0},
    {"timestamp": "2024-05-01T12:00:05Z", "lat": 2.0, "lng": 2.0, "eventType": "pickup"}
]"#;

struct Fixture {
    _dir: TempDir,
    config: Config,
}

impl Fixture {
    fn new(trips: Option<&str>, events: Option<&str>) -> Self {
        let dir = TempDir::new().unwrap();
        let trips_path = dir.path().join("trips.json");
        let events_path = dir.path().join("fallback_events.json");
        if let Some(trips) = trips {
            std::fs::write(&trips_path, trips).unwrap();
        }
        if let Some(events) = events {
            std::fs::write(&events_path, events).unwrap();
        }

        let mut config = Config::with_defaults();
        config.feed.trips_path = trips_path;
        config.feed.events_path = events_path;
        config.stream.default_speed = 1_000.0;
        config.stream.initial_delay_ms = 1;
        config.stream.min_delay_ms = 1;
        config.stream.terminal_delay_ms = 1;
        config.replay.autostart = false;

        Self { _dir: dir, config }
    }

    fn trips_path(&self) -> &Path {
        &self.config.feed.trips_path
    }

    async fn app(&self) -> Router {
        let state = create_app_state(Arc::new(self.config.clone()))
            .await
            .unwrap();
        create_app_router(state, &self.config, metrics_handle())
    }
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

async fn post(app: &Router, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = match body {
        Some(body) => Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn get_json(app: &Router, uri: &str) -> Value {
    let (status, bytes) = get(app, uri).await;
    assert_eq!(status, StatusCode::OK, "{uri}");
    serde_json::from_slice(&bytes).unwrap()
}

/// Splits an SSE body into `(event name, data)` pairs.
fn sse_messages(body: &[u8]) -> Vec<(Option<String>, String)> {
    String::from_utf8(body.to_vec())
        .unwrap()
        .split("\n\n")
        .filter_map(|block| {
            let mut name = None;
            let mut data = None;
            for line in block.lines() {
                if let Some(value) = line.strip_prefix("event:") {
                    name = Some(value.trim().to_string());
                } else if let Some(value) = line.strip_prefix("data:") {
                    data = Some(value.trim().to_string());
                }
            }
            data.map(|data| (name, data))
        })
        .collect()
}

#[tokio::test]
async fn stream_emits_sorted_events_then_end() {
    let fixture = Fixture::new(None, Some(EVENTS));
    let app = fixture.app().await;

    let (status, body) = get(&app, "/stream?speed=1000").await;
    assert_eq!(status, StatusCode::OK);

    let messages = sse_messages(&body);
    assert_eq!(messages.len(), 4);

    let stamps: Vec<String> = messages[..3]
        .iter()
        .map(|(name, data)| {
            assert!(name.is_none());
            let event: Value = serde_json::from_str(data).unwrap();
            event["timestamp"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(
        stamps,
        [
            "2024-05-01T12:00:00.000Z",
            "2024-05-01T12:00:05.000Z",
            "2024-05-01T12:00:10.000Z"
        ]
    );

    let (name, data) = &messages[3];
    assert_eq!(name.as_deref(), Some("end"));
    assert_eq!(data, r#"{"msg":"end"}"#);
}

#[tokio::test]
async fn stream_over_empty_data_only_ends() {
    let fixture = Fixture::new(None, Some("[]"));
    let app = fixture.app().await;

    let (status, body) = get(&app, "/stream").await;
    assert_eq!(status, StatusCode::OK);
    let messages = sse_messages(&body);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].0.as_deref(), Some("end"));
}

#[tokio::test]
async fn stream_with_invalid_speed_uses_default() {
    let fixture = Fixture::new(None, Some(EVENTS));
    let app = fixture.app().await;

    let (status, body) = get(&app, "/stream?speed=-4").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sse_messages(&body).len(), 4);
}

#[tokio::test]
async fn stream_over_malformed_data_fails_before_opening() {
    let fixture = Fixture::new(None, Some(r#"[{"ts": "not a time", "lat": 0, "lng": 0}]"#));
    let app = fixture.app().await;

    let (status, body) = get(&app, "/stream").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let problem: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(problem["code"], "stream_setup_failed");
}

#[tokio::test]
async fn stream_over_object_without_trips_fails() {
    let fixture = Fixture::new(
        None,
        Some(r#"{"events": [{"ts": "2024-05-01T12:00:00Z", "lat": 0, "lng": 0}]}"#),
    );
    let app = fixture.app().await;

    let (status, body) = get(&app, "/stream").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let problem: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(problem["code"], "stream_setup_failed");
}

#[tokio::test]
async fn data_endpoints_serve_files_verbatim() {
    let fixture = Fixture::new(Some(TRIPS), Some(EVENTS));
    let app = fixture.app().await;

    let (status, body) = get(&app, "/data/events").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, EVENTS.as_bytes());

    let (status, body) = get(&app, "/data/trips.json").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, TRIPS.as_bytes());
}

#[tokio::test]
async fn missing_events_file_is_not_found() {
    let fixture = Fixture::new(None, None);
    let app = fixture.app().await;

    let (status, _) = get(&app, "/data/events").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn start_without_data_conflicts() {
    let fixture = Fixture::new(None, None);
    let app = fixture.app().await;

    let (status, problem) = post(&app, "/api/replay/start", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(problem["code"], "no_data");

    let (status, _) = get(&app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn seek_delivers_skipped_events_and_updates_fleet() {
    let fixture = Fixture::new(Some(TRIPS), None);
    let app = fixture.app().await;

    let (status, _) = get(&app, "/readyz").await;
    assert_eq!(status, StatusCode::OK);

    let state = get_json(&app, "/api/replay/state").await;
    assert_eq!(state["currentTime"], "2024-05-01T12:00:00Z");
    assert_eq!(state["playing"], false);

    let (status, seek) = post(&app, "/api/replay/seek", Some(json!({ "offsetMs": 6_000 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(seek["state"]["currentTime"], "2024-05-01T12:00:06Z");
    let delivered: Vec<(&str, &str)> = seek["batch"]["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| {
            (
                item["tripId"].as_str().unwrap(),
                item["event"]["timestamp"].as_str().unwrap(),
            )
        })
        .collect();
    assert_eq!(
        delivered,
        [
            ("A", "2024-05-01T12:00:00.000Z"),
            ("B", "2024-05-01T12:00:05.000Z")
        ]
    );

    let fleet = get_json(&app, "/api/replay/fleet").await;
    assert_eq!(fleet["total"], 2);
    assert_eq!(fleet["active"], 1);
    assert_eq!(fleet["completed"], 1);
    assert_eq!(fleet["pending"], 0);
    assert_eq!(fleet["trips"][0]["progressPct"], 50.0);

    let positions = get_json(&app, "/api/replay/positions").await;
    assert_eq!(positions.as_array().unwrap().len(), 2);
    assert_eq!(positions[0]["speed"], 12.5);

    // Moving back does not hand out the same events again.
    let (_, back) = post(&app, "/api/replay/seek", Some(json!({ "offsetMs": -6_000 }))).await;
    assert!(back.get("batch").is_none());

    let (status, state) = post(&app, "/api/replay/restart", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state["currentTime"], "2024-05-01T12:00:00Z");
    let fleet = get_json(&app, "/api/replay/fleet").await;
    assert_eq!(fleet["pending"], 2);
}

#[tokio::test]
async fn speed_control_validates_input() {
    let fixture = Fixture::new(Some(TRIPS), None);
    let app = fixture.app().await;

    let (status, state) = post(&app, "/api/replay/speed", Some(json!({ "speed": 8.0 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state["speedMultiplier"], 8.0);

    let (status, problem) = post(&app, "/api/replay/speed", Some(json!({ "speed": -1.0 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(problem["code"], "invalid_speed");

    let state = get_json(&app, "/api/replay/state").await;
    assert_eq!(state["speedMultiplier"], 8.0);
}

#[tokio::test]
async fn start_and_pause_toggle_playback() {
    let fixture = Fixture::new(Some(TRIPS), None);
    let app = fixture.app().await;

    let (status, state) = post(&app, "/api/replay/start", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state["playing"], true);

    let (status, state) = post(&app, "/api/replay/pause", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state["playing"], false);
}

#[tokio::test]
async fn reload_is_atomic() {
    let fixture = Fixture::new(Some(TRIPS), None);
    let app = fixture.app().await;

    std::fs::write(
        fixture.trips_path(),
        r#"{"trips": [{"tripId": "C", "events": [{"ts": "2024-05-01T12:00:00Z", "lng": 0}]}]}"#,
    )
    .unwrap();
    let (status, problem) = post(&app, "/api/replay/reload", None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(problem["code"], "malformed_data");
    assert_eq!(get_json(&app, "/api/replay/fleet").await["total"], 2);

    for document in ["{}", r#"{"events": []}"#] {
        std::fs::write(fixture.trips_path(), document).unwrap();
        let (status, problem) = post(&app, "/api/replay/reload", None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{document}");
        assert_eq!(problem["code"], "malformed_data");
        assert_eq!(get_json(&app, "/api/replay/fleet").await["total"], 2);
    }

    std::fs::write(
        fixture.trips_path(),
        r#"{"trips": [{"tripId": "C", "events": [{"ts": "2024-06-01T08:00:00Z", "lat": 0, "lng": 0}]}]}"#,
    )
    .unwrap();
    let (status, summary) = post(&app, "/api/replay/reload", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary, json!({ "trips": 1, "events": 1 }));

    let state = get_json(&app, "/api/replay/state").await;
    assert_eq!(state["currentTime"], "2024-06-01T08:00:00Z");
}

#[tokio::test]
async fn responses_carry_request_id() {
    let fixture = Fixture::new(None, None);
    let app = fixture.app().await;

    let response = app
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let header_name = fixture.config.server.request_id_header.as_str();
    assert!(response.headers().contains_key(header_name));
}
