use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use crate::{app_state::AppState, handlers::replay};

pub fn create_router_replay() -> Router<Arc<AppState>> {
    Router::new()
        .route("/state", get(replay::get_state))
        .route("/start", post(replay::start))
        .route("/pause", post(replay::pause))
        .route("/speed", post(replay::set_speed))
        .route("/seek", post(replay::seek))
        .route("/restart", post(replay::restart))
        .route("/reload", post(replay::reload))
        .route("/fleet", get(replay::fleet))
        .route("/positions", get(replay::positions))
        .route("/batches", get(replay::batches))
}
