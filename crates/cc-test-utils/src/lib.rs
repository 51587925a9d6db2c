//! # CC Test Utilities
//!
//! Shared test utilities for the Call Controller (CC).
//!
//! ## Modules
//!
//! - `fixtures` - Pre-configured test data (config variables, endpoint lists)
//! - `polling` - Async helpers for waiting on eventually-consistent state
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cc_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let config = Config::from_vars(&test_config_vars()).unwrap();
//!     let endpoints = TestEndpoints::new(3).build();
//!
//!     let bridge_id = orchestrator.dial(&endpoints).await.unwrap();
//!
//!     assert!(wait_until(WAIT, || async {
//!         registry.member_count(bridge_id).await == Ok(3)
//!     }).await);
//! }
//! ```

pub mod fixtures;
pub mod polling;

// Re-export commonly used items
pub use fixtures::*;
pub use polling::*;
