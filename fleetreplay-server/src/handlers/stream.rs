use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::Stream;
use serde::Deserialize;
use shared::{models::TripEvent, replay::validate_speed};
use tokio_stream::{StreamExt, wrappers::ReceiverStream};
use tracing::{info, warn};

use crate::{
    app_state::AppState,
    http::error::{ApiError, AppResult},
    services::{
        emitter::{self, StreamItem},
        feed,
    },
};

const END_EVENT: &str = "end";
const END_PAYLOAD: &str = r#"{"msg":"end"}"#;

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    /// Kept as text so a bad value degrades to the default instead of a 400.
    pub speed: Option<String>,
}

/// Resolves the requested speed, falling back to `default` when absent or unusable.
pub fn resolve_speed(requested: Option<&str>, default: f64) -> f64 {
    let Some(raw) = requested else {
        return default;
    };
    match raw.trim().parse::<f64>().ok().map(validate_speed) {
        Some(Ok(speed)) => speed,
        _ => {
            warn!(requested = raw, default, "invalid stream speed; using default");
            default
        }
    }
}

/// Paced replay of the events file as server-sent events.
///
/// Each connection reads and sorts its own copy of the data, then emits one
/// message per event with the original gaps divided by `speed`, and finishes
/// with an `end` event.
pub async fn stream_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StreamQuery>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let config = &state.config;
    let speed = resolve_speed(query.speed.as_deref(), config.stream.default_speed);
    let pacing = config
        .stream
        .pacing(speed)
        .map_err(|err| ApiError::internal_server_error(err.to_string()))?;

    let events = feed::load_stream_events(&config.feed.events_path)
        .await
        .map_err(|err| {
            warn!(error = %err, "stream setup failed");
            ApiError::stream_setup_failed(&err)
        })?;

    info!(events = events.len(), speed, "opening paced stream");
    metrics::counter!("fleetreplay_streams_opened_total").increment(1);

    let receiver = emitter::spawn_paced(events, pacing, config.stream.channel_capacity);
    let stream = ReceiverStream::new(receiver).map(|item| Ok::<_, Infallible>(to_sse_event(&item)));

    let keepalive = KeepAlive::new()
        .interval(config.stream.keepalive())
        .text("keep-alive");

    Ok(Sse::new(stream).keep_alive(keepalive))
}

fn to_sse_event(item: &StreamItem) -> Event {
    match item {
        StreamItem::Event(event) => event_message(event),
        StreamItem::End => Event::default().event(END_EVENT).data(END_PAYLOAD),
    }
}

fn event_message(event: &TripEvent) -> Event {
    Event::default().json_data(event).unwrap_or_else(|err| {
        warn!(error = %err, "failed to encode stream event");
        Event::default().event("error").data(err.to_string())
    })
}
