//! Observability for the Call Controller.
//!
//! Actor loops use `#[instrument(skip_all)]` with explicit fields. Metric
//! labels are bounded by enums in code:
//! - `call_type`: call, conference
//! - `event`: party_joined, party_left, session_ended
//! - `command`: the nine signaling commands
//! - `outcome`: success, error, timeout (commands); greeted, answer_failed,
//!   greeting_failed (inbound calls)
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `cc_bridges_active` | Gauge | `call_type` | Live bridges per call type |
//! | `cc_watchers_active` | Gauge | none | Running lifecycle watchers |
//! | `cc_events_total` | Counter | `event` | Signaling events processed by watchers |
//! | `cc_commands_total` | Counter | `command`, `outcome` | Signaling commands issued |
//! | `cc_command_duration_seconds` | Histogram | `command` | Signaling command latency |
//! | `cc_teardowns_total` | Counter | `outcome` | Bridge drains |
//! | `cc_watcher_panics_total` | Counter | none | Watcher tasks that panicked |
//! | `cc_inbound_calls_total` | Counter | `outcome` | Inbound calls answered by the intake |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::{
    init_metrics_recorder, record_command, record_event, record_inbound_call, record_teardown,
    record_watcher_panic, set_bridges_active, set_watchers_active,
};
