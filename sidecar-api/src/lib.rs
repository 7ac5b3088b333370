//! Optional HTTP API to manage the game server's data directory.

pub mod config;
pub mod error;
pub mod handlers;
pub mod paths;
pub mod rate_limit;
pub mod router;
pub mod server;
