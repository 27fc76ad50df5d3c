//! Bounded retry and polling
//!
//! Every wait in the attach and rollback flows is a fixed-interval retry
//! loop: poll a storage instance until it is available, retry an iSCSI login,
//! retry a format. [`RetryPolicy`] describes the interval and the retry
//! budget; [`retry`] and [`poll_until`] drive an operation with it through
//! `backoff`'s tokio-aware retry loop.

use crate::error::{Error, Result};
use backoff::backoff::{Backoff, Constant};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

// =============================================================================
// Retry Policy
// =============================================================================

/// Fixed-interval retry budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay between attempts
    pub interval: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
}

impl RetryPolicy {
    /// Create a policy
    pub const fn new(interval: Duration, max_retries: u32) -> Self {
        Self {
            interval,
            max_retries,
        }
    }

    /// Total number of attempts this policy allows
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Backoff schedule for this policy
    pub fn backoff(&self) -> BoundedConstant {
        BoundedConstant::new(self.interval, self.max_retries)
    }
}

/// Constant backoff that gives up after a number of retries
#[derive(Debug, Clone)]
pub struct BoundedConstant {
    interval: Duration,
    max_retries: u32,
    remaining: u32,
}

impl BoundedConstant {
    pub fn new(interval: Duration, max_retries: u32) -> Self {
        Self {
            interval,
            max_retries,
            remaining: max_retries,
        }
    }
}

impl Backoff for BoundedConstant {
    fn reset(&mut self) {
        self.remaining = self.max_retries;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(self.interval)
    }
}

// =============================================================================
// Retry
// =============================================================================

/// Retry an operation under a policy
///
/// The operation classifies its own failures: `backoff::Error::transient`
/// is retried, `backoff::Error::permanent` (and `?` on a plain [`Error`])
/// stops immediately. When the budget runs out the last transient error is
/// returned.
pub async fn retry<T, F, Fut>(policy: RetryPolicy, what: &str, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, backoff::Error<Error>>>,
{
    backoff::future::retry_notify(policy.backoff(), operation, |err: Error, wait: Duration| {
        debug!("{} failed, retrying in {:?}: {}", what, wait, err);
    })
    .await
}

// =============================================================================
// Polling
// =============================================================================

enum Probe {
    NotReady,
    Failed(Error),
}

/// Poll until `probe` yields a value, failing with [`Error::PollTimeout`]
/// once the policy's budget is spent
///
/// `probe` returns `Ok(None)` while the subject is not ready yet; an `Err`
/// aborts the poll immediately.
pub async fn poll_until<T, F, Fut>(policy: RetryPolicy, subject: &str, probe: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    match poll_with(policy.backoff(), subject, probe).await {
        Ok(value) => Ok(value),
        Err(Probe::Failed(e)) => Err(e),
        Err(Probe::NotReady) => Err(Error::PollTimeout {
            subject: subject.to_string(),
            attempts: policy.max_attempts(),
        }),
    }
}

/// Poll at a fixed interval until `probe` yields a value, without a budget
pub async fn poll_forever<T, F, Fut>(interval: Duration, subject: &str, probe: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    match poll_with(Constant::new(interval), subject, probe).await {
        Ok(value) => Ok(value),
        Err(Probe::Failed(e)) => Err(e),
        Err(Probe::NotReady) => Err(Error::Internal(format!(
            "unbounded poll of {} gave up",
            subject
        ))),
    }
}

async fn poll_with<T, B, F, Fut>(
    schedule: B,
    subject: &str,
    mut probe: F,
) -> std::result::Result<T, Probe>
where
    B: Backoff,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    backoff::future::retry_notify(
        schedule,
        || {
            let attempt = probe();
            async move {
                match attempt.await {
                    Ok(Some(value)) => Ok(value),
                    Ok(None) => Err(backoff::Error::transient(Probe::NotReady)),
                    Err(e) => Err(backoff::Error::permanent(Probe::Failed(e))),
                }
            }
        },
        |_: Probe, wait: Duration| {
            debug!("Waiting {:?} for {}", wait, subject);
        },
    )
    .await
}
