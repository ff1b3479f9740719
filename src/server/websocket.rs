//! WebSocket server implementation
//!
//! Provides a WebSocket server that listens on a configurable port and hands
//! every accepted connection to the relay.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::{error, info, warn};

use super::handler::handle_connection;
use crate::relay::ConnectionLifecycle;

/// How long shutdown waits for open connections to close
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Configuration for the WebSocket server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind: String,
    /// Port to listen on
    pub port: u16,
    /// Endpoint path clients must request
    pub path: String,
    /// Maximum inbound message size in bytes
    pub max_message_size: Option<usize>,
}

impl ServerConfig {
    /// Create a new server configuration
    pub fn new(bind: String, port: u16) -> Self {
        Self {
            bind,
            port,
            path: "/ws".to_string(),
            max_message_size: None,
        }
    }

    /// Set the endpoint path
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set the maximum inbound message size
    pub fn with_max_message_size(mut self, max_message_size: Option<usize>) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// WebSocket protocol settings, if any differ from the defaults
    pub fn ws_config(&self) -> Option<WebSocketConfig> {
        self.max_message_size.map(|limit| {
            let mut config = WebSocketConfig::default();
            config.max_message_size = Some(limit);
            config.max_frame_size = Some(limit);
            config
        })
    }
}

/// WebSocket server feeding connections into the relay
pub struct WebSocketServer {
    config: Arc<ServerConfig>,
    lifecycle: Arc<ConnectionLifecycle>,
    shutdown_tx: broadcast::Sender<()>,
}

impl WebSocketServer {
    /// Create a new WebSocket server
    pub fn new(config: ServerConfig, lifecycle: Arc<ConnectionLifecycle>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config: Arc::new(config),
            lifecycle,
            shutdown_tx,
        }
    }

    /// Get a shutdown signal receiver (for external components to listen for shutdown)
    #[allow(dead_code)]
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Trigger server shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Bind the listener and run the server
    pub async fn run(&self) -> anyhow::Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Bind the configured address
    pub async fn bind(&self) -> std::io::Result<TcpListener> {
        TcpListener::bind(self.config.socket_addr()).await
    }

    /// Accept connections on `listener` until shutdown
    ///
    /// Each connection is handled on its own task. On shutdown every open
    /// connection is sent a Close frame and unregistered; this returns once
    /// those tasks finish or `SHUTDOWN_GRACE` runs out.
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        let addr = listener.local_addr()?;
        info!("WebSocket relay listening on ws://{}{}", addr, self.config.path);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                // Accept new connections
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let lifecycle = Arc::clone(&self.lifecycle);
                            let config = Arc::clone(&self.config);
                            let shutdown_rx = self.shutdown_tx.subscribe();

                            connections.spawn(async move {
                                if let Err(e) = handle_connection(stream, peer_addr, lifecycle, shutdown_rx, config).await {
                                    error!("Connection error from {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                // Reap finished connection tasks
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                // Handle shutdown signal
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping server");
                    break;
                }
            }
        }

        if !connections.is_empty() {
            info!("Closing {} active connections...", connections.len());
            let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
                while connections.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                warn!(
                    "{} connections still open after {:?}, aborting",
                    connections.len(),
                    SHUTDOWN_GRACE
                );
                connections.abort_all();
            }
        }

        if !self.lifecycle.registry().is_empty().await {
            let mut stale: Vec<_> = self.lifecycle.registry().ids().await.into_iter().collect();
            stale.sort();
            warn!("Clients left registered after shutdown: {:?}", stale);
        }

        Ok(())
    }
}
