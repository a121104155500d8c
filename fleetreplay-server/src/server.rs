use crate::app_state::AppState;
use axum::{Extension, Router, response::IntoResponse, routing::get, serve};
use shared::{
    config::{Config, LogFormat},
    replay::{PlaybackDriver, ReplayEngine},
};
use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};
use tokio::net::TcpListener;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use crate::{
    middleware::request_context::{self, RequestIdState},
    routes,
    services::feed::{self, FeedError},
    tracer,
};
use axum::http::{HeaderValue, StatusCode, header};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Process-wide Prometheus handle.
///
/// The first call installs the global recorder. If another recorder already
/// owns the slot, a detached one is used so rendering still works.
pub fn metrics_handle() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new().install_recorder().unwrap_or_else(|err| {
                warn!(error = %err, "prometheus recorder not installed");
                let recorder: PrometheusRecorder = PrometheusBuilder::new().build_recorder();
                recorder.handle()
            })
        })
        .clone()
}

async fn metrics_endpoint(Extension(handle): Extension<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        handle.render(),
    )
}

/// Initializes the tracing subscriber for logging using the provided configuration.
///
/// Returns the configured level. Does nothing if a global subscriber is
/// already set.
pub fn initialize_tracing(config: &Config) -> String {
    let env_filter = build_env_filter(config);

    let fmt_builder = fmt::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false);

    let installed = if matches!(config.logging.format, LogFormat::Json) {
        fmt_builder.json().with_ansi(false).try_init()
    } else {
        fmt_builder.with_ansi(true).try_init()
    };
    if installed.is_err() {
        warn!("tracing subscriber already installed");
    }

    config.logging.level.clone()
}

fn build_env_filter(config: &Config) -> EnvFilter {
    let default_level = config
        .logging
        .level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO);

    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy()
    })
}

/// Builds the replay engine and loads the configured trips.
///
/// A missing trips file leaves the engine empty so the stream endpoints still
/// work; a malformed one is an error.
///
/// # Errors
/// Returns a [`FeedError`] if the trips file exists but cannot be read or is invalid.
pub async fn create_app_state(config: Arc<Config>) -> Result<Arc<AppState>, FeedError> {
    let engine = ReplayEngine::with_speed(config.replay.default_speed).unwrap_or_else(|err| {
        warn!(error = %err, "falling back to default replay speed");
        ReplayEngine::new()
    });
    let playback = PlaybackDriver::new(engine, config.replay.tick_interval());

    match feed::load_trips(&config.feed.trips_path).await {
        Ok(trips) => {
            // Already validated by `load_trips`.
            if let Err(err) = playback.load(trips) {
                error!(error = %err, "trips rejected by the engine");
            } else if config.replay.autostart && playback.start() {
                info!("replay autostarted");
            }
        }
        Err(err) if err.is_not_found() => {
            warn!(path = %config.feed.trips_path.display(), "trips file not found; replay engine starts empty");
        }
        Err(err) => return Err(err),
    }

    Ok(Arc::new(AppState { config, playback }))
}

/// Creates the CORS layer for the application.
///
/// An empty origin list allows any origin.
pub fn create_cors_layer(config: &Config) -> CorsLayer {
    use axum::http::Method;

    let mut cors = CorsLayer::new()
        .allow_methods(AllowMethods::list([Method::GET, Method::POST, Method::OPTIONS]))
        .allow_headers(AllowHeaders::any())
        .allow_credentials(config.server.cors.allow_credentials)
        .max_age(Duration::from_secs(config.server.cors.max_age_seconds));

    if config.server.cors.allowed_origins.is_empty() {
        cors = cors.allow_origin(AllowOrigin::any());
    } else {
        let origins = config
            .server
            .cors
            .allowed_origins
            .iter()
            .filter_map(|origin| HeaderValue::from_str(origin).ok())
            .collect::<Vec<_>>();
        cors = cors.allow_origin(AllowOrigin::list(origins));
    }

    cors
}

/// Creates the API router nested under `/api`.
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new().nest("/replay", routes::replay::create_router_replay())
}

/// Creates the main application router with all middleware and routes.
pub fn create_app_router(
    state: Arc<AppState>,
    config: &Config,
    metrics_handle: PrometheusHandle,
) -> Router {
    let cors = create_cors_layer(config);
    let request_id_state = RequestIdState::from_config(config);

    Router::new()
        .nest("/api", create_api_router())
        .merge(routes::data::create_router_data())
        .merge(routes::health::create_health_router())
        .route("/metrics", get(metrics_endpoint))
        .layer(Extension(metrics_handle))
        .layer(cors)
        .layer(tracer::create_trace_layer())
        .layer(axum::middleware::from_fn_with_state(
            request_id_state,
            request_context::assign_request_id,
        ))
        .with_state(state)
}

/// Resolves when Ctrl+C is received.
pub async fn create_shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutting down...");
}

/// Starts the server with a fully resolved configuration.
///
/// # Errors
/// Returns an error if the trips file is invalid or the listener cannot bind.
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    initialize_tracing(&config);
    info!("Starting server...");

    let metrics_handle = metrics_handle();
    let config = Arc::new(config);
    let state = create_app_state(Arc::clone(&config)).await?;
    let playback = state.playback.clone();
    let app = create_app_router(state, &config, metrics_handle);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", listener.local_addr()?);

    serve(listener, app)
        .with_graceful_shutdown(create_shutdown_signal())
        .await?;

    playback.pause();
    Ok(())
}
