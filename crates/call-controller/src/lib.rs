//! Call Controller (CC) Library
//!
//! Event-driven call session manager for telephony backends that expose a
//! command API plus an asynchronous event stream (Asterisk ARI). The
//! controller is responsible for:
//!
//! - Creating bridges and originating channels towards endpoints
//! - Tracking which channels are members of which bridge
//! - Classifying each bridge as a two-party call or a conference
//! - Tearing a bridge down at the right moment, exactly once
//! - Answering and greeting inbound calls
//!
//! # Architecture
//!
//! ```text
//! Console / caller
//! └── SessionOrchestrator (dial, join, list)
//!     ├── SessionRegistry (bridges, channels, memberships)
//!     ├── SignalingBackend (ARI REST commands + event stream)
//!     └── supervises N BridgeWatchers (one per bridge)
//! ```
//!
//! # Key Design Decisions
//!
//! - **One watcher per bridge**: membership events for a bridge are applied
//!   in order by a single task; bridges never block one another
//! - **Monotonic classification**: a conference never reverts to a call
//! - **Idempotent teardown**: the registry purge happens once, so racing
//!   drains see `NotFound` instead of tearing down twice
//!
//! # Modules
//!
//! - [`actors`] - Per-bridge lifecycle watchers
//! - [`classifier`] - Call/conference classification
//! - [`config`] - Service configuration from environment
//! - [`console`] - Operator line commands
//! - [`errors`] - Error types
//! - [`inbound`] - Answering and greeting inbound calls
//! - [`lifecycle`] - Bridge lifecycle states and drain rules
//! - [`observability`] - Health endpoints and Prometheus metrics
//! - [`orchestrator`] - Public dial/join/list operations
//! - [`registry`] - Concurrent session registry
//! - [`signaling`] - Backend seam, ARI adapter and in-memory mock

pub mod actors;
pub mod classifier;
pub mod config;
pub mod console;
pub mod errors;
pub mod inbound;
pub mod lifecycle;
pub mod observability;
pub mod orchestrator;
pub mod registry;
pub mod signaling;
