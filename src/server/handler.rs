//! WebSocket connection handler
//!
//! Upgrades a single TCP connection, registers it with the relay and maps
//! socket events onto the connection lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::{accept_hdr_async_with_config, tungstenite::Message};
use tracing::{debug, info, warn};

use super::ServerConfig;
use crate::relay::{ConnectionLifecycle, WsChannel};

/// How long the writer task may take to flush after the connection ends
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Handle a single WebSocket connection
pub(super) async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    lifecycle: Arc<ConnectionLifecycle>,
    mut shutdown_rx: broadcast::Receiver<()>,
    config: Arc<ServerConfig>,
) -> anyhow::Result<()> {
    debug!("New connection from {}", peer_addr);

    // Upgrade to WebSocket, only on the configured endpoint path
    let endpoint = config.path.clone();
    let check_path = move |request: &Request, response: Response| {
        let path = request.uri().path();
        if path == endpoint {
            Ok(response)
        } else {
            warn!("Rejecting upgrade from {} for unknown path {}", peer_addr, path);
            let mut rejection = ErrorResponse::new(Some(format!("No endpoint at {}", path)));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            Err(rejection)
        }
    };
    let ws_stream = accept_hdr_async_with_config(stream, check_path, config.ws_config()).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // All outbound frames go through this queue; the writer task owns the sink
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    let mut writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if let Err(e) = ws_sender.send(message).await {
                debug!("Write to {} failed: {}", peer_addr, e);
                break;
            }
            if closing {
                break;
            }
        }
    });

    let client_id = lifecycle
        .on_connect(Arc::new(WsChannel::new(out_tx.clone())))
        .await;
    info!("Client {} connected from {}", client_id, peer_addr);

    // Message handling loop
    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        lifecycle.on_message(&client_id, &text).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        warn!("Received binary message from {} ({} bytes), ignoring", client_id, data.len());
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = out_tx.send(Message::Pong(data));
                    }
                    Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                    Some(Ok(Message::Close(_))) | None => {
                        lifecycle.on_close(&client_id).await;
                        break;
                    }
                    Some(Err(e)) => {
                        lifecycle.on_error(&client_id, &e).await;
                        break;
                    }
                }
            }
            // Handle shutdown signal
            _ = shutdown_rx.recv() => {
                debug!("Shutdown signal received, closing connection to {}", client_id);
                let _ = out_tx.send(Message::Close(None));
                lifecycle.on_close(&client_id).await;
                break;
            }
        }
    }

    // Let queued frames flush; a lingering snapshot may still hold a channel clone
    drop(out_tx);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        writer.abort();
    }

    info!("Connection {} from {} closed", client_id, peer_addr);
    Ok(())
}
