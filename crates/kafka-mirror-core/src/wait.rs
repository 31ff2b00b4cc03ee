//! Polling until cluster metadata reflects an administrative change.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

/// Fixed-interval polling bounded by an overall timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    /// Delay between two checks
    pub interval: Duration,
    /// Total time allowed before giving up
    pub timeout: Duration,
}

impl PollSchedule {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Outcome of a wait that ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitElapsed {
    /// Number of times the predicate was evaluated
    pub attempts: u32,
    /// Time spent waiting
    pub elapsed: Duration,
}

/// Evaluate `check` until it returns `true` or `schedule.timeout` elapses.
///
/// The predicate runs once immediately and then after every
/// `schedule.interval`. It is never started once the deadline has passed, so
/// a zero timeout still gets exactly one check. Returns the number of checks
/// it took on success.
pub async fn wait_until<F, Fut>(
    schedule: PollSchedule,
    mut check: F,
) -> std::result::Result<u32, WaitElapsed>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();
    let deadline = start + schedule.timeout;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        if check().await {
            trace!("Condition held after {} attempt(s)", attempts);
            return Ok(attempts);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(WaitElapsed {
                attempts,
                elapsed: now - start,
            });
        }

        let next = (now + schedule.interval).min(deadline);
        tokio::time::sleep_until(next).await;
    }
}
