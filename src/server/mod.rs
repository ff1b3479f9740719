//! WebSocket server module
//!
//! Accepts WebSocket connections and feeds their events into the relay.

mod handler;
mod websocket;

pub use websocket::*;
