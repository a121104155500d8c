//! Offline commands that work on a trips file without starting the server.

pub mod check;
pub mod replay;
