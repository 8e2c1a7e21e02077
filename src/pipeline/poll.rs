//! Fixed-interval polling with an optional bound.

use std::future::Future;
use std::time::Duration;
use tracing::info;

/// How to poll for a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// `None` polls until the condition holds.
    pub max_attempts: Option<u32>,
    /// Log a "still waiting" line every this many unsuccessful polls. Zero disables it.
    pub report_every: u32,
}

impl PollPolicy {
    /// Unbounded polling at `interval`.
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
            report_every: 10,
        }
    }

    pub fn bounded(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn reporting_every(mut self, polls: u32) -> Self {
        self.report_every = polls;
        self
    }
}

/// Result of [`poll_until`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready { value: T, attempts: u32 },
    Exhausted { attempts: u32 },
}

/// Call `check` until it yields `Some`, sleeping `policy.interval` between
/// attempts. A `check` error ends polling immediately.
///
/// `check` receives the 1-based attempt number.
pub async fn poll_until<T, E, F, Fut>(
    policy: &PollPolicy,
    waiting_for: &str,
    mut check: F,
) -> Result<PollOutcome<T>, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        if let Some(value) = check(attempts).await? {
            return Ok(PollOutcome::Ready { value, attempts });
        }
        if policy.max_attempts.is_some_and(|max| attempts >= max) {
            return Ok(PollOutcome::Exhausted { attempts });
        }
        if policy.report_every > 0 && attempts % policy.report_every == 0 {
            info!("Still waiting for {} ({} polls)", waiting_for, attempts);
        }
        tokio::time::sleep(policy.interval).await;
    }
}
