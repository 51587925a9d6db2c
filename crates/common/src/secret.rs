//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] types used for signaling backend credentials.
//! `SecretString` implements `Debug` with redaction, so any struct deriving
//! `Debug` that holds one is safe to pass to `tracing` fields.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct AriCredentials {
//!     username: String,
//!     password: SecretString,
//! }
//!
//! let creds = AriCredentials {
//!     username: "asterisk".to_string(),
//!     password: SecretString::from("testing123"),
//! };
//!
//! assert!(!format!("{creds:?}").contains("testing123"));
//! assert_eq!(creds.password.expose_secret(), "testing123");
//! ```

pub use secrecy::{ExposeSecret, SecretString};
