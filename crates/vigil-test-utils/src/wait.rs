//! Polling helpers for asynchronous assertions.

use std::time::Duration;

use tokio::time::Instant;
use vigil_audit::IndexAuditTrail;

/// Longest single sleep between polls.
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Polls `condition` with exponentially growing sleeps until it holds or
/// `timeout` elapses.
///
/// Returns the final value of `condition`.
pub async fn await_busy<F>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    let mut interval = Duration::from_millis(1);
    loop {
        if condition() {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
        interval = (interval * 2).min(MAX_POLL_INTERVAL);
    }
}

/// Waits until the trail has no queued or in-flight events.
pub async fn await_drained(trail: &IndexAuditTrail, timeout: Duration) -> bool {
    await_busy(|| trail.peek().is_none(), timeout).await
}
