#![cfg_attr(not(test), forbid(unsafe_code))]

//! HTTP surface and command-line tools for FleetReplay.

pub mod app_state;
pub mod commands;
pub mod handlers;
pub mod http;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod services;
mod tracer;
