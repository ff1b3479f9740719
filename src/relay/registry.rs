//! Connection registry
//!
//! Maintains the live mapping from client identifier to connection state.
//! Every operation goes through a single `RwLock`, so a snapshot never sees
//! a half-applied register or unregister.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::Channel;

/// Opaque identifier of a connection, unique for its lifetime
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Create an identifier from a transport-assigned token
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ClientId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Lightweight identity attached to a connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub id: ClientId,
    /// May be empty; nothing in the relay assigns one
    pub display_name: String,
}

impl Identity {
    /// Create an identity with an empty display name
    pub fn new(id: ClientId) -> Self {
        Self {
            id,
            display_name: String::new(),
        }
    }

    #[allow(dead_code)]
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }
}

/// State held for one connected client
#[derive(Clone)]
pub struct ConnectionState {
    /// Outbound handle for this client
    pub channel: Arc<dyn Channel>,
    pub identity: Identity,
    /// Updated on every inbound message. Informational only.
    pub last_active_at: DateTime<Utc>,
}

impl fmt::Debug for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionState")
            .field("identity", &self.identity)
            .field("last_active_at", &self.last_active_at)
            .finish_non_exhaustive()
    }
}

/// Thread-safe registry of connected clients
#[derive(Default)]
pub struct Registry {
    connections: RwLock<HashMap<ClientId, ConnectionState>>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection
    ///
    /// An existing entry with the same id is overwritten (last writer wins).
    pub async fn register(&self, id: ClientId, channel: Arc<dyn Channel>, identity: Identity) {
        let state = ConnectionState {
            channel,
            identity,
            last_active_at: Utc::now(),
        };

        let replaced = self.connections.write().await.insert(id.clone(), state);
        if replaced.is_some() {
            debug!("Client {} re-registered, previous entry replaced", id);
        }
    }

    /// Remove a connection, returning its state if it was present
    ///
    /// Unregistering an absent id is a no-op.
    pub async fn unregister(&self, id: &ClientId) -> Option<ConnectionState> {
        self.connections.write().await.remove(id)
    }

    /// Refresh a client's last activity time
    ///
    /// Silently ignores ids that are no longer registered, since a message can
    /// race with that client's disconnect.
    pub async fn touch(&self, id: &ClientId) {
        if let Some(state) = self.connections.write().await.get_mut(id) {
            state.last_active_at = Utc::now();
        }
    }

    /// Point-in-time copy of all entries
    ///
    /// The lock is released before this returns, so callers can perform I/O
    /// on the entries without blocking registry mutations.
    pub async fn snapshot(&self) -> Vec<(ClientId, ConnectionState)> {
        self.connections
            .read()
            .await
            .iter()
            .map(|(id, state)| (id.clone(), state.clone()))
            .collect()
    }

    /// Look up a single connection
    pub async fn get(&self, id: &ClientId) -> Option<ConnectionState> {
        self.connections.read().await.get(id).cloned()
    }

    /// Identifiers of all connected clients
    pub async fn ids(&self) -> HashSet<ClientId> {
        self.connections.read().await.keys().cloned().collect()
    }

    /// Check if a client is registered
    #[cfg(test)]
    pub async fn contains(&self, id: &ClientId) -> bool {
        self.connections.read().await.contains_key(id)
    }

    /// Number of connected clients
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}
