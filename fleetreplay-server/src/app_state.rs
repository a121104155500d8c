use std::sync::Arc;

use shared::{config::Config, replay::PlaybackDriver};

// Application state shared across all routes
#[derive(Clone, Debug)]
pub struct AppState {
    pub config: Arc<Config>,
    pub playback: PlaybackDriver,
}
