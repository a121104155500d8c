use serde::{Deserialize, Serialize};
use std::{
    env, fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use thiserror::Error;

use crate::{
    models::ReplayError,
    replay::{PacingPolicy, validate_speed},
};

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "FLEETREPLAY_";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The configuration file could not be parsed.
    #[error("failed to parse configuration file {path}: {message}")]
    Parse {
        /// File that failed.
        path: PathBuf,
        /// Parser message.
        message: String,
    },
    /// The file extension is not one of `yaml`, `yml`, `json` or `toml`.
    #[error("unsupported configuration format for {0}; use yaml, json or toml")]
    UnsupportedFormat(PathBuf),
    /// An environment variable held an unusable value.
    #[error("invalid {key} value {value:?}: {expected}")]
    InvalidEnv {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
        /// What was expected instead.
        expected: &'static str,
    },
    /// One or more settings are out of range.
    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Log output format.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable, coloured output.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format {other:?}")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Text => "text",
            Self::Json => "json",
        })
    }
}

/// Cross-origin settings for browser clients.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CorsConfig {
    /// Allowed origins; empty allows any origin.
    pub allowed_origins: Vec<String>,
    /// Whether credentials may be sent.
    pub allow_credentials: bool,
    /// Preflight cache lifetime.
    pub max_age_seconds: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            allow_credentials: false,
            max_age_seconds: 600,
        }
    }
}

/// HTTP listener settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Header carrying the request id.
    pub request_id_header: String,
    /// CORS policy.
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            request_id_header: "x-request-id".to_string(),
            cors: CorsConfig::default(),
        }
    }
}

/// Logging settings. `RUST_LOG` takes precedence over `level`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level directive.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Where the recorded data lives.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct FeedConfig {
    /// Trips document loaded into the replay engine and served at `/data/trips.json`.
    pub trips_path: PathBuf,
    /// Events document streamed by `/stream` and served at `/data/events`.
    pub events_path: PathBuf,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            trips_path: PathBuf::from("data/trips.json"),
            events_path: PathBuf::from("data/fallback_events.json"),
        }
    }
}

/// Paced stream settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    /// Speed used when the request gives none or an invalid one.
    pub default_speed: f64,
    /// Wait before the first event.
    pub initial_delay_ms: u64,
    /// Floor for waits between events.
    pub min_delay_ms: u64,
    /// Wait after the last event before `end`.
    pub terminal_delay_ms: u64,
    /// SSE keep-alive interval.
    pub keepalive_secs: u64,
    /// Buffer between the pacing task and the response body.
    pub channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            default_speed: 1.0,
            initial_delay_ms: 100,
            min_delay_ms: 10,
            terminal_delay_ms: 50,
            keepalive_secs: 15,
            channel_capacity: 32,
        }
    }
}

impl StreamConfig {
    /// Pacing for a stream at `speed` with the configured delays.
    ///
    /// # Errors
    /// Returns [`ReplayError::InvalidSpeed`] if `speed` is not positive and finite.
    pub fn pacing(&self, speed: f64) -> Result<PacingPolicy, ReplayError> {
        Ok(PacingPolicy::with_speed(speed)?.with_delays(
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.min_delay_ms),
            Duration::from_millis(self.terminal_delay_ms),
        ))
    }

    /// Keep-alive interval as a duration.
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

/// Replay engine settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ReplayConfig {
    /// Cadence of the tick loop.
    pub tick_interval_ms: u64,
    /// Initial speed multiplier.
    pub default_speed: f64,
    /// Start playing as soon as data is loaded.
    pub autostart: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 500,
            default_speed: 1.0,
            autostart: false,
        }
    }
}

impl ReplayConfig {
    /// Tick cadence as a duration.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// The main configuration structure for FleetReplay.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    /// HTTP listener.
    pub server: ServerConfig,
    /// Logging.
    pub logging: LoggingConfig,
    /// Data files.
    pub feed: FeedConfig,
    /// Paced stream.
    pub stream: StreamConfig,
    /// Replay engine.
    pub replay: ReplayConfig,
}

impl Config {
    /// Generates a default configuration.
    pub fn with_defaults() -> Self {
        Self::default()
    }

    /// Resolves configuration from defaults, an optional file, the process
    /// environment and a port override, in that order, then validates it.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if the file cannot be read or parsed, an
    /// environment variable is malformed, or validation fails.
    pub fn load_config(
        config_path: Option<&Path>,
        port_override: Option<u16>,
    ) -> Result<Self, ConfigError> {
        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None => Self::with_defaults(),
        };

        config.apply_env_overrides(|key| env::var(key).ok())?;

        if let Some(port) = port_override {
            config.server.port = port;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reads a configuration file; missing keys keep their defaults.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if the file cannot be read, has an unknown
    /// extension, or does not parse.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let parse_error = |message: String| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        };

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => {
                serde_yml::from_str(&content).map_err(|err| parse_error(err.to_string()))
            }
            Some("json") => serde_json::from_str(&content).map_err(|err| parse_error(err.to_string())),
            Some("toml") => toml::from_str(&content).map_err(|err| parse_error(err.to_string())),
            _ => Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
        }
    }

    /// Applies `FLEETREPLAY_*` overrides read through `lookup`.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidEnv`] for values that do not parse.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            let key = format!("{ENV_PREFIX}{name}");
            lookup(&key).map(|value| (key, value))
        };

        if let Some((_, host)) = var("HOST") {
            self.server.host = host;
        }
        if let Some((key, value)) = var("SERVER_PORT") {
            self.server.port = parse_env(key, value, "a port number between 1 and 65535")?;
        }
        if let Some((_, level)) = var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some((key, value)) = var("LOG_FORMAT") {
            self.logging.format = parse_env(key, value, "text or json")?;
        }
        if let Some((_, path)) = var("TRIPS_PATH") {
            self.feed.trips_path = PathBuf::from(path);
        }
        if let Some((_, path)) = var("EVENTS_PATH") {
            self.feed.events_path = PathBuf::from(path);
        }
        if let Some((key, value)) = var("STREAM_SPEED") {
            self.stream.default_speed = parse_env(key, value, "a number")?;
        }
        if let Some((key, value)) = var("REPLAY_SPEED") {
            self.replay.default_speed = parse_env(key, value, "a number")?;
        }
        if let Some((key, value)) = var("TICK_INTERVAL_MS") {
            self.replay.tick_interval_ms = parse_env(key, value, "milliseconds")?;
        }
        if let Some((key, value)) = var("AUTOSTART") {
            self.replay.autostart = parse_env(key, value, "true or false")?;
        }
        Ok(())
    }

    /// Checks every setting and reports all problems at once.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] listing each problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("server port must be greater than 0".to_string());
        }
        if self.server.request_id_header.trim().is_empty() {
            errors.push("request id header must not be empty".to_string());
        }
        if self.logging.level.trim().is_empty() {
            errors.push("log level must not be empty".to_string());
        }
        if validate_speed(self.stream.default_speed).is_err() {
            errors.push(format!(
                "stream default speed must be positive and finite, got {}",
                self.stream.default_speed
            ));
        }
        if validate_speed(self.replay.default_speed).is_err() {
            errors.push(format!(
                "replay default speed must be positive and finite, got {}",
                self.replay.default_speed
            ));
        }
        if self.replay.tick_interval_ms == 0 {
            errors.push("tick interval must be greater than 0".to_string());
        }
        if self.stream.channel_capacity == 0 {
            errors.push("stream channel capacity must be greater than 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }
}

fn parse_env<T: FromStr>(key: String, value: String, expected: &'static str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { key, value, expected })
}
