//! WebSocket Relay Server
//!
//! Accepts WebSocket clients and relays every text message a client sends to
//! all other connected clients.

mod config;
mod console;
mod relay;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::AsyncWrite;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use config::{EventFormat, RelayConfig, CONFIG_FILE};
use console::Console;
use relay::{ConnectionLifecycle, EventSink, JsonSink, TracingSink};
use server::{ServerConfig, WebSocketServer};

/// WebSocket Relay Server
///
/// Relays each client's messages to every other connected client
#[derive(Parser, Debug)]
#[command(name = "ws-relay")]
#[command(version, about, long_about = None)]
struct Args {
    /// Port to listen on [default: 9000]
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address [default: 127.0.0.1]
    #[arg(long)]
    bind: Option<String>,

    /// Path to the configuration file
    #[arg(short, long, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Don't read operator commands from stdin
    #[arg(long)]
    no_console: bool,

    /// Write relay events as JSON lines on stdout
    #[arg(long)]
    json_events: bool,
}

impl Args {
    /// Apply command line overrides on top of the file configuration
    fn apply(&self, mut config: RelayConfig) -> RelayConfig {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(bind) = &self.bind {
            config.bind = bind.clone();
        }
        if self.no_console {
            config.console = false;
        }
        if self.json_events {
            config.event_format = EventFormat::Json;
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = args.apply(RelayConfig::load(&args.config)?);

    // Initialize logging; JSON events keep stdout to themselves
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(log_writer(config.event_format))
        .with_target(false)
        .compact()
        .init();

    info!("WebSocket Relay v{}", env!("CARGO_PKG_VERSION"));

    let sink: Arc<dyn EventSink> = match config.event_format {
        EventFormat::Text => Arc::new(TracingSink),
        EventFormat::Json => Arc::new(JsonSink::stdout()),
    };

    if config.evict_on_send_failure {
        info!("Clients will be evicted on delivery failure");
    }
    let lifecycle =
        Arc::new(ConnectionLifecycle::new(sink).with_eviction(config.evict_on_send_failure));

    let server_config = ServerConfig::new(config.bind.clone(), config.port)
        .with_path(config.path.clone())
        .with_max_message_size(config.max_message_size);

    // Create and start the WebSocket server
    let server = Arc::new(WebSocketServer::new(server_config, Arc::clone(&lifecycle)));
    let server_handle = Arc::clone(&server);

    // Spawn shutdown signal handler
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Initiating graceful shutdown...");
        server_handle.shutdown();
    });

    if config.console {
        let console = Console::new(Arc::clone(&lifecycle));
        let output = console_output(config.event_format);
        tokio::spawn(async move {
            if let Err(e) = console.run(output).await {
                error!("Console stopped: {}", e);
            }
        });
    }

    // Run the server
    server.run().await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Log destination for the given event format
fn log_writer(format: EventFormat) -> BoxMakeWriter {
    if format.owns_stdout() {
        BoxMakeWriter::new(std::io::stderr)
    } else {
        BoxMakeWriter::new(std::io::stdout)
    }
}

/// Console reply destination for the given event format
fn console_output(format: EventFormat) -> Box<dyn AsyncWrite + Send + Unpin> {
    if format.owns_stdout() {
        Box::new(tokio::io::stderr())
    } else {
        Box::new(tokio::io::stdout())
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}
