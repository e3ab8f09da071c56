//! Deadline-bounded polling
//!
//! Used for transaction confirmation and account status changes. The loop
//! never spawns: dropping the returned future stops it.

use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::trace;

/// Result of a polling loop that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready(T),
    /// Deadline reached without a value
    TimedOut { waited: Duration },
}

/// Call `attempt` every `interval` until it yields a value.
///
/// `Ok(None)` means "not yet". An error ends the loop immediately. The
/// deadline is checked after each attempt, so the last attempt happens at or
/// after `timeout`.
pub async fn poll_until<T, E, F, Fut>(
    interval: Duration,
    timeout: Duration,
    mut attempt: F,
) -> Result<PollOutcome<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let started = Instant::now();
    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        if let Some(value) = attempt().await? {
            return Ok(PollOutcome::Ready(value));
        }
        let waited = started.elapsed();
        if waited >= timeout {
            return Ok(PollOutcome::TimedOut { waited });
        }
        trace!(attempts, waited_ms = waited.as_millis() as u64, "Not ready, polling again");
        sleep(interval).await;
    }
}
