//! Parallel Task Runner
//!
//! Runs a fixed list of work items across a bounded pool of concurrent
//! tasks and waits for every one of them. Work items report their results
//! through shared containers the caller owns; the runner only collects
//! failures.

use crate::error::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

/// Default worker bound
pub const DEFAULT_WORKERS: usize = 20;

/// Outcome of a run
#[derive(Debug, Default)]
pub struct RunReport {
    /// Items that finished without error
    pub completed: usize,
    /// Errors of the items that failed, in completion order
    pub failures: Vec<Error>,
}

impl RunReport {
    /// Whether every item succeeded
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Surface the first failure, if any
    pub fn into_result(self) -> Result<usize> {
        match self.failures.into_iter().next() {
            Some(e) => Err(e),
            None => Ok(self.completed),
        }
    }
}

/// Bounded fan-out executor
#[derive(Debug, Clone)]
pub struct TaskRunner {
    max_workers: usize,
}

impl TaskRunner {
    /// Create a runner allowing at most `max_workers` items in flight
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
        }
    }

    /// Worker bound
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Run `work` over every item and return once all of them finished
    ///
    /// A failing or panicking item is logged and recorded in the report; it
    /// never stops the remaining items.
    pub async fn run<I, T, F, Fut>(&self, items: I, work: F) -> RunReport
    where
        I: IntoIterator<Item = T>,
        T: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let work = Arc::new(work);
        let mut set = JoinSet::new();
        let mut report = RunReport::default();

        for item in items {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    report
                        .failures
                        .push(Error::TaskFailed(format!("worker pool closed: {}", e)));
                    break;
                }
            };
            let work = work.clone();
            set.spawn(async move {
                let _permit = permit;
                work(item).await
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(())) => report.completed += 1,
                Ok(Err(e)) => {
                    warn!("Task failed: {}", e);
                    report.failures.push(e);
                }
                Err(e) => {
                    warn!("Task aborted: {}", e);
                    report.failures.push(Error::TaskFailed(e.to_string()));
                }
            }
        }

        report
    }
}

impl Default for TaskRunner {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}
