//! Outbound channel abstraction
//!
//! A `Channel` is the relay's only outbound primitive: hand it a text payload
//! and it either accepts it for delivery or reports why it can't.

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// Errors that can occur when delivering to a channel
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel closed")]
    Closed,
}

/// Result type for channel operations
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Send-capable handle to one connected client
pub trait Channel: Send + Sync {
    /// Deliver a text payload to the client
    fn send(&self, payload: &str) -> ChannelResult<()>;
}

/// Channel backed by a WebSocket connection's outbound queue
///
/// Sending only enqueues the frame. The connection's writer task owns the
/// socket sink and performs the actual I/O, so once that task is gone every
/// send fails with `ChannelError::Closed`.
#[derive(Debug, Clone)]
pub struct WsChannel {
    tx: mpsc::UnboundedSender<Message>,
}

impl WsChannel {
    /// Wrap a connection's outbound queue
    pub fn new(tx: mpsc::UnboundedSender<Message>) -> Self {
        Self { tx }
    }
}

impl Channel for WsChannel {
    fn send(&self, payload: &str) -> ChannelResult<()> {
        self.tx
            .send(Message::Text(payload.to_string()))
            .map_err(|_| ChannelError::Closed)
    }
}
