//! Common utilities and types shared across call controller components.

#![warn(clippy::pedantic)]

/// Module for common data types (bridge, channel and endpoint identifiers)
pub mod types;

/// Module for secret types that prevent accidental logging
pub mod secret;
