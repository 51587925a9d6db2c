//! Call Controller error types.
//!
//! Every failure surfaced to the control surface carries a human-readable
//! reason via [`CcError::client_message`]. Transport details stay in logs.

use std::fmt;
use thiserror::Error;

/// Imperative command issued to the signaling backend.
///
/// Used both for error reporting and as a bounded metrics label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalingCommand {
    CreateBridge,
    DeleteBridge,
    CreateChannel,
    Dial,
    HangUp,
    AddToBridge,
    PlayAnnouncement,
    Answer,
    PlayToChannel,
}

impl SignalingCommand {
    /// Returns the command name for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SignalingCommand::CreateBridge => "create_bridge",
            SignalingCommand::DeleteBridge => "delete_bridge",
            SignalingCommand::CreateChannel => "create_channel",
            SignalingCommand::Dial => "dial",
            SignalingCommand::HangUp => "hang_up",
            SignalingCommand::AddToBridge => "add_to_bridge",
            SignalingCommand::PlayAnnouncement => "play_announcement",
            SignalingCommand::Answer => "answer",
            SignalingCommand::PlayToChannel => "play_to_channel",
        }
    }
}

impl fmt::Display for SignalingCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Call Controller error type.
#[derive(Debug, Error)]
pub enum CcError {
    /// Bad call shape (e.g. fewer than two endpoints for a dial).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Bridge not found in the session registry.
    #[error("Bridge not found: {0}")]
    BridgeNotFound(String),

    /// Channel not found in the session registry.
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    /// An external signaling command failed.
    #[error("Signaling command {command} failed: {reason}")]
    CommandFailed {
        command: SignalingCommand,
        reason: String,
    },

    /// A dial (or any signaling request) did not complete before its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Event stream transport error.
    #[error("Signaling transport error: {0}")]
    Signaling(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Controller is shutting down and no longer accepts work.
    #[error("Controller is draining")]
    Draining,

    /// Internal error with context.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CcError {
    /// Shorthand for a failed signaling command.
    pub fn command_failed(command: SignalingCommand, reason: impl Into<String>) -> Self {
        CcError::CommandFailed {
            command,
            reason: reason.into(),
        }
    }

    /// Returns `true` for the `NotFound` family.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, CcError::BridgeNotFound(_) | CcError::ChannelNotFound(_))
    }

    /// Returns a bounded error kind label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            CcError::InvalidArgument(_) => "invalid_argument",
            CcError::BridgeNotFound(_) | CcError::ChannelNotFound(_) => "not_found",
            CcError::CommandFailed { .. } => "command_failed",
            CcError::Timeout(_) => "timeout",
            CcError::Signaling(_) => "signaling",
            CcError::Config(_) => "config",
            CcError::Draining => "draining",
            CcError::Internal(_) => "internal",
        }
    }

    /// Returns a human-readable reason suitable for the console.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            CcError::InvalidArgument(msg) => msg.clone(),
            CcError::BridgeNotFound(id) => format!("No such bridge: {id}"),
            CcError::ChannelNotFound(id) => format!("No such channel: {id}"),
            CcError::CommandFailed { command, .. } => {
                format!("The telephony backend rejected {command}")
            }
            CcError::Timeout(what) => format!("Timed out waiting for {what}"),
            CcError::Draining => "Controller is shutting down".to_string(),
            CcError::Signaling(_) | CcError::Config(_) | CcError::Internal(_) => {
                "An internal error occurred".to_string()
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(
            CcError::InvalidArgument("x".to_string()).kind(),
            "invalid_argument"
        );
        assert_eq!(CcError::BridgeNotFound("b".to_string()).kind(), "not_found");
        assert_eq!(CcError::ChannelNotFound("c".to_string()).kind(), "not_found");
        assert_eq!(
            CcError::command_failed(SignalingCommand::Dial, "busy").kind(),
            "command_failed"
        );
        assert_eq!(CcError::Timeout("dial".to_string()).kind(), "timeout");
        assert_eq!(CcError::Draining.kind(), "draining");
    }

    #[test]
    fn test_not_found_family() {
        assert!(CcError::BridgeNotFound("b".to_string()).is_not_found());
        assert!(CcError::ChannelNotFound("c".to_string()).is_not_found());
        assert!(!CcError::Draining.is_not_found());
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let err = CcError::command_failed(
            SignalingCommand::AddToBridge,
            "POST http://10.0.0.5:8088/ari/bridges returned 500",
        );
        assert!(!err.client_message().contains("10.0.0.5"));
        assert_eq!(
            err.client_message(),
            "The telephony backend rejected add_to_bridge"
        );

        let err = CcError::Signaling("websocket reset by ws://10.0.0.5".to_string());
        assert_eq!(err.client_message(), "An internal error occurred");
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!(
                "{}",
                CcError::command_failed(SignalingCommand::HangUp, "404 Not Found")
            ),
            "Signaling command hang_up failed: 404 Not Found"
        );
        assert_eq!(
            format!("{}", CcError::InvalidArgument("need 2".to_string())),
            "Invalid argument: need 2"
        );
    }
}
