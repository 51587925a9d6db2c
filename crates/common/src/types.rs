//! Common data types for call controller components.
//!
//! Bridge and channel identifiers are generated locally and handed to the
//! signaling backend when the resource is created, so both sides agree on the
//! same identifier without a lookup table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Error returned when parsing an identifier from text fails.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid identifier: {0}")]
pub struct ParseIdError(String);

/// Unique identifier for a bridge (one mixing point).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BridgeId(pub Uuid);

impl BridgeId {
    /// Create a new random bridge ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BridgeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BridgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for BridgeId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| ParseIdError(s.to_string()))
    }
}

/// Unique identifier for a channel (one endpoint leg).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub Uuid);

impl ChannelId {
    /// Create a new random channel ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for ChannelId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| ParseIdError(s.to_string()))
    }
}

/// Backend-assigned identifier of a channel this controller did not create,
/// e.g. `1700000000.42` for an inbound call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InboundChannelId(String);

impl InboundChannelId {
    /// Get the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for InboundChannelId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for InboundChannelId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for InboundChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Dialable destination of a channel, e.g. `PJSIP/5001`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointAddress(String);

impl EndpointAddress {
    /// Build an address from user input.
    ///
    /// Bare extensions (`5001`) get `default_technology` prepended; anything
    /// that already carries a `TECH/` prefix is kept as is.
    #[must_use]
    pub fn normalize(raw: &str, default_technology: &str) -> Self {
        let raw = raw.trim();
        if raw.contains('/') {
            Self(raw.to_string())
        } else {
            Self(format!("{default_technology}/{raw}"))
        }
    }

    /// Get the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EndpointAddress {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for EndpointAddress {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
