//! Relay event reporting
//!
//! Lifecycle and message events are reported to an `EventSink`. Sinks only
//! observe; nothing they do feeds back into relay control flow.

use std::io::Write;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::ClientId;

/// Kinds of events reported by the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A client connected and was registered
    Connected,
    /// A client closed its connection
    Disconnected,
    /// A client sent a message
    Message,
    /// The transport reported a failure for a client
    Error,
    /// Delivery to one recipient failed during a fan-out
    DeliveryFailed,
}

/// A single reported event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelayEvent {
    pub kind: EventKind,
    pub client_id: ClientId,
    /// Payload for `Message`, failure description for `Error` and `DeliveryFailed`
    #[serde(skip_serializing_if = "String::is_empty")]
    pub detail: String,
    pub at: DateTime<Utc>,
}

impl RelayEvent {
    pub fn new(kind: EventKind, client_id: ClientId, detail: impl Into<String>) -> Self {
        Self {
            kind,
            client_id,
            detail: detail.into(),
            at: Utc::now(),
        }
    }

    pub fn connected(client_id: ClientId) -> Self {
        Self::new(EventKind::Connected, client_id, "")
    }

    pub fn disconnected(client_id: ClientId) -> Self {
        Self::new(EventKind::Disconnected, client_id, "")
    }

    pub fn message(client_id: ClientId, payload: impl Into<String>) -> Self {
        Self::new(EventKind::Message, client_id, payload)
    }

    pub fn error(client_id: ClientId, cause: impl Into<String>) -> Self {
        Self::new(EventKind::Error, client_id, cause)
    }

    pub fn delivery_failed(client_id: ClientId, cause: impl Into<String>) -> Self {
        Self::new(EventKind::DeliveryFailed, client_id, cause)
    }
}

/// Passive observer of relay events
pub trait EventSink: Send + Sync {
    fn report(&self, event: &RelayEvent);
}

/// Sink that writes events through `tracing` in console form
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn report(&self, event: &RelayEvent) {
        let id = &event.client_id;
        match event.kind {
            EventKind::Connected => info!("[{}]: connected", id),
            EventKind::Disconnected => info!("[{}]: disconnected", id),
            EventKind::Message => info!("[{}]: {}", id, event.detail),
            EventKind::Error => warn!("[{}]: error [{}]", id, event.detail),
            EventKind::DeliveryFailed => warn!("[{}]: delivery failed [{}]", id, event.detail),
        }
    }
}

/// Sink that writes one JSON object per event
pub struct JsonSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Consume the sink and return the underlying writer
    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl JsonSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> EventSink for JsonSink<W> {
    fn report(&self, event: &RelayEvent) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to serialize event for {}: {}", event.client_id, e);
                return;
            }
        };

        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(e) = writeln!(writer, "{}", line).and_then(|_| writer.flush()) {
            warn!("Failed to write event: {}", e);
        }
    }
}
