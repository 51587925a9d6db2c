//! Polling helpers.
//!
//! Watchers react to events on their own tasks, so tests observe their
//! effects by polling rather than sleeping for a fixed time.

use std::future::Future;
use std::time::Duration;

/// Default deadline for [`wait_until`] in tests.
pub const WAIT: Duration = Duration::from_secs(2);

/// Interval between polls.
pub const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Poll `condition` until it returns `true` or `timeout` elapses.
///
/// Returns whether the condition was met. Works under a paused tokio clock,
/// since the sleeps auto-advance time.
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Assert that `condition` becomes true within `timeout`.
///
/// # Panics
///
/// Panics with `what` if the deadline passes first.
pub async fn assert_eventually<F, Fut>(timeout: Duration, what: &str, condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    assert!(
        wait_until(timeout, condition).await,
        "condition not met within {timeout:?}: {what}"
    );
}
