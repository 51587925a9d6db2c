//! Call Controller configuration.
//!
//! Configuration is loaded from environment variables. The ARI password is
//! redacted in Debug output.

use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default ARI REST base URL.
pub const DEFAULT_ARI_URL: &str = "http://localhost:8088/ari";

/// Default ARI event WebSocket URL.
pub const DEFAULT_ARI_WS_URL: &str = "ws://localhost:8088/ari/events";

/// Default Stasis application name.
pub const DEFAULT_ARI_APPLICATION: &str = "ari-app";

/// Default ARI username.
pub const DEFAULT_ARI_USERNAME: &str = "asterisk";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8082";

/// Default dial timeout in seconds.
pub const DEFAULT_DIAL_TIMEOUT_SECONDS: u64 = 20;

/// Default technology prefix for bare extensions.
pub const DEFAULT_TECHNOLOGY: &str = "PJSIP";

/// Default announcement played when a party joins.
pub const DEFAULT_JOIN_SOUND: &str = "sound:confbridge-join";

/// Default announcement played when a bridge tears down.
pub const DEFAULT_LEAVE_SOUND: &str = "sound:confbridge-leave";

/// Default greeting played to answered inbound calls.
pub const DEFAULT_GREETING_SOUND: &str = "sound:hello-world";

/// Default conference floor: a conference drains once fewer members remain.
pub const DEFAULT_CONFERENCE_MIN_MEMBERS: usize = 1;

/// Default graceful shutdown deadline in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECONDS: u64 = 30;

/// Default instance ID prefix.
pub const DEFAULT_CC_ID_PREFIX: &str = "cc";

/// Announcement and teardown policy shared by the orchestrator and watchers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPolicy {
    /// Sound played on the bridge when a party joins.
    pub join_sound: String,
    /// Sound played on the bridge when it starts draining.
    pub leave_sound: String,
    /// A conference drains when its remaining membership drops below this.
    pub conference_min_members: usize,
    /// Deadline for a single endpoint dial.
    pub dial_timeout: Duration,
    /// Technology prepended to bare extensions.
    pub default_technology: String,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            join_sound: DEFAULT_JOIN_SOUND.to_string(),
            leave_sound: DEFAULT_LEAVE_SOUND.to_string(),
            conference_min_members: DEFAULT_CONFERENCE_MIN_MEMBERS,
            dial_timeout: Duration::from_secs(DEFAULT_DIAL_TIMEOUT_SECONDS),
            default_technology: DEFAULT_TECHNOLOGY.to_string(),
        }
    }
}

/// Call Controller configuration.
#[derive(Clone)]
pub struct Config {
    /// ARI REST base URL (default: "http://localhost:8088/ari").
    pub ari_url: String,

    /// ARI event WebSocket URL (default: "ws://localhost:8088/ari/events").
    pub ari_ws_url: String,

    /// Stasis application name events are subscribed for.
    pub ari_application: String,

    /// ARI username.
    pub ari_username: String,

    /// ARI password.
    /// Protected by `SecretString` to prevent accidental logging.
    pub ari_password: SecretString,

    /// Health endpoint bind address (default: "0.0.0.0:8082").
    pub health_bind_address: String,

    /// Unique identifier for this controller instance.
    pub cc_id: String,

    /// Whether the stdin console intake runs.
    pub console_enabled: bool,

    /// Whether inbound calls entering the application are answered.
    pub inbound_enabled: bool,

    /// Sound played to an answered inbound call. Empty skips the greeting.
    pub greeting_sound: String,

    /// Graceful shutdown deadline.
    pub shutdown_timeout: Duration,

    /// Session lifecycle policy.
    pub policy: SessionPolicy,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("ari_url", &self.ari_url)
            .field("ari_ws_url", &self.ari_ws_url)
            .field("ari_application", &self.ari_application)
            .field("ari_username", &self.ari_username)
            .field("ari_password", &"[REDACTED]")
            .field("health_bind_address", &self.health_bind_address)
            .field("cc_id", &self.cc_id)
            .field("console_enabled", &self.console_enabled)
            .field("inbound_enabled", &self.inbound_enabled)
            .field("greeting_sound", &self.greeting_sound)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("policy", &self.policy)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let ari_password = SecretString::from(
            vars.get("CC_ARI_PASSWORD")
                .ok_or_else(|| ConfigError::MissingEnvVar("CC_ARI_PASSWORD".to_string()))?
                .clone(),
        );

        let string_or = |key: &str, default: &str| {
            vars.get(key)
                .cloned()
                .unwrap_or_else(|| default.to_string())
        };

        let ari_url = string_or("CC_ARI_URL", DEFAULT_ARI_URL);
        let ari_ws_url = string_or("CC_ARI_WS_URL", DEFAULT_ARI_WS_URL);
        let ari_application = string_or("CC_ARI_APPLICATION", DEFAULT_ARI_APPLICATION);
        let ari_username = string_or("CC_ARI_USERNAME", DEFAULT_ARI_USERNAME);
        let health_bind_address = string_or("CC_HEALTH_BIND_ADDRESS", DEFAULT_HEALTH_BIND_ADDRESS);

        let dial_timeout_seconds: u64 = parse_or(
            vars,
            "CC_DIAL_TIMEOUT_SECONDS",
            DEFAULT_DIAL_TIMEOUT_SECONDS,
        )?;
        if dial_timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "CC_DIAL_TIMEOUT_SECONDS must be greater than 0".to_string(),
            ));
        }

        let conference_min_members: usize = parse_or(
            vars,
            "CC_CONFERENCE_MIN_MEMBERS",
            DEFAULT_CONFERENCE_MIN_MEMBERS,
        )?;
        if conference_min_members == 0 {
            return Err(ConfigError::InvalidValue(
                "CC_CONFERENCE_MIN_MEMBERS must be at least 1".to_string(),
            ));
        }

        let shutdown_timeout_seconds: u64 = parse_or(
            vars,
            "CC_SHUTDOWN_TIMEOUT_SECONDS",
            DEFAULT_SHUTDOWN_TIMEOUT_SECONDS,
        )?;

        let console_enabled = parse_or(vars, "CC_CONSOLE_ENABLED", true)?;
        let inbound_enabled = parse_or(vars, "CC_INBOUND_ENABLED", true)?;
        let greeting_sound = string_or("CC_GREETING_SOUND", DEFAULT_GREETING_SOUND);

        let policy = SessionPolicy {
            join_sound: string_or("CC_JOIN_SOUND", DEFAULT_JOIN_SOUND),
            leave_sound: string_or("CC_LEAVE_SOUND", DEFAULT_LEAVE_SOUND),
            conference_min_members,
            dial_timeout: Duration::from_secs(dial_timeout_seconds),
            default_technology: string_or("CC_DEFAULT_TECHNOLOGY", DEFAULT_TECHNOLOGY),
        };

        // Generate instance ID
        let cc_id = vars.get("CC_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_CC_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            ari_url,
            ari_ws_url,
            ari_application,
            ari_username,
            ari_password,
            health_bind_address,
            cc_id,
            console_enabled,
            inbound_enabled,
            greeting_sound,
            shutdown_timeout: Duration::from_secs(shutdown_timeout_seconds),
            policy,
        })
    }
}

/// Parse an optional variable, rejecting values that are present but malformed.
fn parse_or<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key}={raw}"))),
        None => Ok(default),
    }
}
