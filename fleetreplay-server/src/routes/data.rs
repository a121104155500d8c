use std::sync::Arc;

use axum::{Router, routing::get};

use crate::{
    app_state::AppState,
    handlers::{data, stream},
};

pub fn create_router_data() -> Router<Arc<AppState>> {
    Router::new()
        .route("/stream", get(stream::stream_events))
        .route("/data/events", get(data::events_document))
        .route("/data/trips.json", get(data::trips_document))
}
