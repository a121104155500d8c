use std::{path::Path, sync::Arc};

use axum::{
    extract::State,
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};

use crate::{app_state::AppState, http::error::AppResult, services::feed};

async fn serve_json_file(path: &Path) -> AppResult<Response> {
    let bytes = feed::read_document(path).await?;
    Ok((
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        )],
        bytes,
    )
        .into_response())
}

/// The configured events file, byte for byte.
pub async fn events_document(State(state): State<Arc<AppState>>) -> AppResult<Response> {
    serve_json_file(&state.config.feed.events_path).await
}

/// The configured trips document, byte for byte.
pub async fn trips_document(State(state): State<Arc<AppState>>) -> AppResult<Response> {
    serve_json_file(&state.config.feed.trips_path).await
}
