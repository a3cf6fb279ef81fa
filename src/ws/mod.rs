//! WebSocket client library
//!
//! Reusable WebSocket client with automatic reconnection, ping/pong handling,
//! a reconnect cap and cooperative shutdown.

mod client;
mod types;

pub use client::WsClient;
pub use types::{WsConfig, WsError, WsMessage};
