//! # Configuration
//!
//! Layered settings for the server and the headless replay tools.

pub mod server;

pub use server::{
    Config, ConfigError, CorsConfig, FeedConfig, LogFormat, LoggingConfig, ReplayConfig,
    ServerConfig, StreamConfig,
};
