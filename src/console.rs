//! Operator console
//!
//! Reads commands from stdin so an operator can inspect connected clients and
//! push messages to them:
//!
//! - `/clients` lists connected clients
//! - `/send <id> <message>` sends to one client
//! - `/help` shows the command list
//! - any other line is broadcast to every client

use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use crate::relay::{ClientId, ConnectionLifecycle};

const HELP: &str = "Commands:
  /clients              list connected clients
  /send <id> <message>  send a message to one client
  /help                 show this help
  <message>             broadcast to all clients";

/// Errors from parsing a console line
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command: {0} (try /help)")]
    Unknown(String),

    #[error("Usage: /send <id> <message>")]
    MissingArgument,
}

/// A parsed console command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Clients,
    Help,
    Send { id: ClientId, message: String },
    Broadcast(String),
}

impl ConsoleCommand {
    /// Parse one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, CommandError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Ok(None);
        }

        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Some(ConsoleCommand::Broadcast(line.to_string())));
        };

        let (name, args) = rest.split_once(' ').unwrap_or((rest, ""));
        match name {
            "clients" => Ok(Some(ConsoleCommand::Clients)),
            "help" => Ok(Some(ConsoleCommand::Help)),
            "send" => {
                let (id, message) = args
                    .trim_start()
                    .split_once(' ')
                    .ok_or(CommandError::MissingArgument)?;
                if message.is_empty() {
                    return Err(CommandError::MissingArgument);
                }
                Ok(Some(ConsoleCommand::Send {
                    id: ClientId::from(id),
                    message: message.to_string(),
                }))
            }
            other => Err(CommandError::Unknown(format!("/{}", other))),
        }
    }
}

/// Console bound to a running relay
pub struct Console {
    lifecycle: Arc<ConnectionLifecycle>,
}

impl Console {
    pub fn new(lifecycle: Arc<ConnectionLifecycle>) -> Self {
        Self { lifecycle }
    }

    /// Run one command and return the text to show the operator
    pub async fn execute(&self, command: ConsoleCommand) -> String {
        match command {
            ConsoleCommand::Help => HELP.to_string(),
            ConsoleCommand::Clients => self.list_clients().await,
            ConsoleCommand::Send { id, message } => {
                match self.lifecycle.broadcaster().send_to_one(&message, &id).await {
                    Ok(()) => format!("sent to {}", id),
                    Err(e) => e.to_string(),
                }
            }
            ConsoleCommand::Broadcast(message) => {
                let report = self.lifecycle.broadcaster().send_to_all(&message).await;
                if report.is_clean() {
                    format!("delivered to {} clients", report.delivered_count())
                } else {
                    format!(
                        "delivered to {} clients, {} failed",
                        report.delivered_count(),
                        report.failed_count()
                    )
                }
            }
        }
    }

    async fn list_clients(&self) -> String {
        let mut clients = self.lifecycle.registry().snapshot().await;
        if clients.is_empty() {
            return "no clients connected".to_string();
        }
        clients.sort_by(|(a, _), (b, _)| a.cmp(b));

        let mut lines = Vec::with_capacity(clients.len() + 1);
        lines.push(format!("{} connected:", clients.len()));
        for (id, state) in clients {
            let name = if state.identity.display_name.is_empty() {
                "-"
            } else {
                state.identity.display_name.as_str()
            };
            lines.push(format!(
                "  {}  {}  last active {}",
                id,
                name,
                state.last_active_at.format("%Y-%m-%d %H:%M:%S UTC")
            ));
        }
        lines.join("\n")
    }

    /// Read commands from stdin until it closes, writing replies to `output`
    pub async fn run<W>(self, output: W) -> anyhow::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        self.run_with(BufReader::new(tokio::io::stdin()), output)
            .await
    }

    /// Read commands from `input` until it ends, writing replies to `output`
    pub async fn run_with<R, W>(self, input: R, mut output: W) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();

        while let Some(line) = lines.next_line().await? {
            let reply = match ConsoleCommand::parse(&line) {
                Ok(Some(command)) => self.execute(command).await,
                Ok(None) => continue,
                Err(e) => {
                    warn!("{}", e);
                    e.to_string()
                }
            };
            output.write_all(reply.as_bytes()).await?;
            output.write_all(b"\n").await?;
            output.flush().await?;
        }

        debug!("Console input closed");
        Ok(())
    }
}
