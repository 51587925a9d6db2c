//! Line-oriented operator console.
//!
//! Reads one command per line and writes one reply per command:
//!
//! ```text
//! dial <endpoint> <endpoint> [...]
//! join <bridge-id> <endpoint> [...]
//! list
//! status
//! help
//! quit
//! ```
//!
//! Malformed lines and failed operations are reported on the output and the
//! console keeps reading.

use crate::errors::CcError;
use crate::orchestrator::SessionOrchestrator;
use crate::registry::ActiveCall;

use common::types::BridgeId;
use std::fmt::Write as _;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const HELP: &str = "\
commands:
  dial <endpoint> <endpoint> [...]   create a call between the endpoints
  join <bridge-id> <endpoint> [...]  add endpoints to an existing call
  list                               show active calls
  status                             show controller counters
  help                               show this text
  quit                               stop the controller";

/// A parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Dial { endpoints: Vec<String> },
    Join { bridge_id: BridgeId, endpoints: Vec<String> },
    List,
    Status,
    Help,
    Quit,
}

/// Why a line could not be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown command: {0} (try 'help')")]
    UnknownCommand(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("invalid bridge id: {0}")]
    InvalidBridgeId(String),
}

impl ConsoleCommand {
    /// Parse a line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, ParseError> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };
        let args: Vec<String> = words.map(str::to_string).collect();

        let command = match verb.to_ascii_lowercase().as_str() {
            "dial" => {
                if args.is_empty() {
                    return Err(ParseError::Usage("dial <endpoint> <endpoint> [...]"));
                }
                // Endpoint count is checked by the orchestrator.
                ConsoleCommand::Dial { endpoints: args }
            }
            "join" => {
                let mut args = args.into_iter();
                let (Some(raw_id), endpoints) = (args.next(), args.collect::<Vec<_>>()) else {
                    return Err(ParseError::Usage("join <bridge-id> <endpoint> [...]"));
                };
                if endpoints.is_empty() {
                    return Err(ParseError::Usage("join <bridge-id> <endpoint> [...]"));
                }
                let bridge_id = raw_id
                    .parse()
                    .map_err(|_| ParseError::InvalidBridgeId(raw_id.clone()))?;
                ConsoleCommand::Join {
                    bridge_id,
                    endpoints,
                }
            }
            "list" | "ls" => ConsoleCommand::List,
            "status" => ConsoleCommand::Status,
            "help" | "?" => ConsoleCommand::Help,
            "quit" | "exit" => ConsoleCommand::Quit,
            other => return Err(ParseError::UnknownCommand(other.to_string())),
        };
        Ok(Some(command))
    }
}

/// How the console loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleExit {
    /// Operator typed `quit`.
    Quit,
    /// Input closed.
    EndOfInput,
    /// Cancelled by shutdown.
    Cancelled,
}

/// Execute a command and render the reply.
///
/// `Quit` is handled by the loop and renders nothing.
pub async fn execute(orchestrator: &SessionOrchestrator, command: ConsoleCommand) -> String {
    match command {
        ConsoleCommand::Dial { endpoints } => match orchestrator.dial(endpoints.as_slice()).await {
            Ok(bridge_id) => format!("dialed: bridge {bridge_id}"),
            Err(e) => failure("dial", &e),
        },
        ConsoleCommand::Join {
            bridge_id,
            endpoints,
        } => match orchestrator.join(bridge_id, endpoints.as_slice()).await {
            Ok(()) => format!("joined {} endpoint(s) to bridge {bridge_id}", endpoints.len()),
            Err(e) => failure("join", &e),
        },
        ConsoleCommand::List => render_calls(&orchestrator.list_active_calls().await),
        ConsoleCommand::Status => {
            let status = orchestrator.status().await;
            format!(
                "bridges: {} channels: {} watchers: {} draining: {}",
                status.bridges, status.channels, status.watchers, status.draining
            )
        }
        ConsoleCommand::Help => HELP.to_string(),
        ConsoleCommand::Quit => String::new(),
    }
}

fn failure(operation: &str, error: &CcError) -> String {
    warn!(target: "cc.console", operation, kind = error.kind(), error = %error, "Command failed");
    format!("{operation} failed: {}", error.client_message())
}

/// Render the active call listing.
#[must_use]
pub fn render_calls(calls: &[ActiveCall]) -> String {
    if calls.is_empty() {
        return "no active calls".to_string();
    }
    let mut out = String::new();
    for call in calls {
        let _ = writeln!(
            out,
            "bridge {} [{}] {} member(s)",
            call.bridge_id,
            call.call_type,
            call.members.len()
        );
        for member in &call.members {
            let _ = writeln!(
                out,
                "  {} {} ({})",
                member.channel_id,
                member.endpoint,
                member.dial_state.as_str()
            );
        }
    }
    out.trim_end().to_string()
}

/// Run the console until `quit`, end of input, or cancellation.
pub async fn run_console<R, W>(
    orchestrator: Arc<SessionOrchestrator>,
    input: R,
    mut output: W,
    cancel_token: CancellationToken,
) -> std::io::Result<ConsoleExit>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    info!(target: "cc.console", "Console ready");

    loop {
        let line = tokio::select! {
            biased;

            () = cancel_token.cancelled() => {
                debug!(target: "cc.console", "Console cancelled");
                return Ok(ConsoleExit::Cancelled);
            }

            line = lines.next_line() => line?,
        };

        let Some(line) = line else {
            info!(target: "cc.console", "Console input closed");
            return Ok(ConsoleExit::EndOfInput);
        };

        let reply = match ConsoleCommand::parse(&line) {
            Ok(None) => continue,
            Ok(Some(ConsoleCommand::Quit)) => {
                info!(target: "cc.console", "Quit requested");
                output.write_all(b"bye\n").await?;
                output.flush().await?;
                return Ok(ConsoleExit::Quit);
            }
            Ok(Some(command)) => {
                debug!(target: "cc.console", command = ?command, "Executing");
                execute(&orchestrator, command).await
            }
            Err(e) => {
                debug!(target: "cc.console", line = %line, error = %e, "Unparseable line");
                e.to_string()
            }
        };

        output.write_all(reply.as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
    }
}
