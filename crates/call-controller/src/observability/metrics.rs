//! Metrics definitions for the Call Controller.
//!
//! All metrics follow Prometheus naming conventions:
//! - `cc_` prefix for Call Controller
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used to render
/// `/metrics`.
///
/// Command latency buckets cover fast REST calls up to a full dial timeout.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("cc_command".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000,
                30.000,
            ],
        )
        .map_err(|e| format!("Failed to set command duration buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

/// Set the number of live bridges of one call type.
///
/// Metric: `cc_bridges_active`
/// Labels: `call_type` (call, conference)
pub fn set_bridges_active(call_type: &str, count: usize) {
    // usize to f64 conversion is safe for realistic bridge counts
    #[allow(clippy::cast_precision_loss)]
    gauge!("cc_bridges_active", "call_type" => call_type.to_string()).set(count as f64);
}

/// Set the number of running watchers.
///
/// Metric: `cc_watchers_active`
pub fn set_watchers_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("cc_watchers_active").set(count as f64);
}

/// Record a signaling event handled by a watcher.
///
/// Metric: `cc_events_total`
/// Labels: `event`
pub fn record_event(event: &str) {
    counter!("cc_events_total", "event" => event.to_string()).increment(1);
}

/// Record a signaling command outcome and its latency.
///
/// Metrics: `cc_commands_total`, `cc_command_duration_seconds`
/// Labels: `command`, `outcome` (success, error, timeout)
pub fn record_command(command: &str, outcome: &str, duration: Duration) {
    counter!("cc_commands_total",
        "command" => command.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!("cc_command_duration_seconds", "command" => command.to_string())
        .record(duration.as_secs_f64());
}

/// Record a finished bridge drain.
///
/// Metric: `cc_teardowns_total`
/// Labels: `outcome` (clean, partial, already_gone)
pub fn record_teardown(outcome: &str) {
    counter!("cc_teardowns_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record a watcher task panic.
///
/// Metric: `cc_watcher_panics_total`
///
/// ALERT: Any non-zero value indicates a bug.
pub fn record_watcher_panic() {
    counter!("cc_watcher_panics_total").increment(1);
}

/// Record an inbound call handled by the intake.
///
/// Metric: `cc_inbound_calls_total`
/// Labels: `outcome` (greeted, answer_failed, greeting_failed)
pub fn record_inbound_call(outcome: &str) {
    counter!("cc_inbound_calls_total", "outcome" => outcome.to_string()).increment(1);
}
