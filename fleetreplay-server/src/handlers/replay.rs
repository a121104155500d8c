//! JSON control surface for the shared replay engine.

use std::{convert::Infallible, sync::Arc};

use axum::{
    Json,
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use shared::{
    models::Batch,
    replay::{EngineState, FleetStatus, LastPosition, LoadSummary},
};
use tokio_stream::{StreamExt, wrappers::ReceiverStream};
use tracing::{info, warn};

use crate::{
    app_state::AppState,
    http::error::{ApiError, AppResult},
    services::feed,
};

#[derive(Debug, Deserialize)]
pub struct SpeedRequest {
    pub speed: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeekRequest {
    pub offset_ms: i64,
}

#[derive(Debug, Serialize)]
pub struct SeekResponse {
    pub state: EngineState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<Batch>,
}

pub async fn get_state(State(state): State<Arc<AppState>>) -> Json<EngineState> {
    Json(state.playback.state())
}

pub async fn start(State(state): State<Arc<AppState>>) -> AppResult<Json<EngineState>> {
    if !state.playback.start() {
        return Err(ApiError::no_data());
    }
    Ok(Json(state.playback.state()))
}

pub async fn pause(State(state): State<Arc<AppState>>) -> Json<EngineState> {
    state.playback.pause();
    Json(state.playback.state())
}

pub async fn set_speed(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SpeedRequest>,
) -> AppResult<Json<EngineState>> {
    state.playback.set_speed(request.speed)?;
    Ok(Json(state.playback.state()))
}

pub async fn seek(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SeekRequest>,
) -> Json<SeekResponse> {
    let batch = state.playback.seek(request.offset_ms);
    Json(SeekResponse {
        state: state.playback.state(),
        batch,
    })
}

pub async fn restart(State(state): State<Arc<AppState>>) -> Json<EngineState> {
    state.playback.restart();
    Json(state.playback.state())
}

/// Re-reads the trips document from disk and replaces the loaded session.
pub async fn reload(State(state): State<Arc<AppState>>) -> AppResult<Json<LoadSummary>> {
    let path = &state.config.feed.trips_path;
    let feed = feed::load_trips(path).await?;
    let summary = state.playback.load(feed)?;
    info!(path = %path.display(), trips = summary.trips, "trips reloaded");
    Ok(Json(summary))
}

pub async fn fleet(State(state): State<Arc<AppState>>) -> Json<FleetStatus> {
    Json(state.playback.fleet_status())
}

pub async fn positions(State(state): State<Arc<AppState>>) -> Json<Vec<LastPosition>> {
    Json(state.playback.last_positions())
}

/// Every batch the engine dispatches, as `batch` events.
pub async fn batches(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state
        .playback
        .subscribe_channel(state.config.stream.channel_capacity);

    let stream = ReceiverStream::new(receiver).map(|batch| {
        let event = Event::default()
            .event("batch")
            .json_data(&batch)
            .unwrap_or_else(|err| {
                warn!(error = %err, "failed to encode batch");
                Event::default().event("error").data(err.to_string())
            });
        Ok::<_, Infallible>(event)
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(state.config.stream.keepalive())
            .text("keep-alive"),
    )
}
