use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
};
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
struct HealthResponse<'a> {
    status: &'a str,
}

async fn healthz() -> impl IntoResponse {
    metrics::counter!("health_checks_total", "endpoint" => "healthz", "status" => "ok")
        .increment(1);
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// Ready once the replay engine has trips to play.
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let loaded = state
        .playback
        .with_engine(|engine| !engine.store().is_empty());

    if loaded {
        metrics::counter!("health_checks_total", "endpoint" => "readyz", "status" => "ok")
            .increment(1);
        (StatusCode::OK, Json(HealthResponse { status: "ready" }))
    } else {
        metrics::counter!("health_checks_total", "endpoint" => "readyz", "status" => "error")
            .increment(1);
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse { status: "no_data" }),
        )
    }
}

pub fn create_health_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}
