//! Bounded concurrent fan-out
//!
//! Runs a batch of per-region operations concurrently, at most
//! [`MAX_WORKERS`] at a time, and joins them all. Results come back in
//! submission order regardless of completion order. A batch always runs to
//! completion: there is no cancellation or timeout, so a hung call stalls the
//! whole join.
//!
//! Arguments shared by every task are captured by reference in the task
//! futures, e.g. `wait(regions.iter().map(|r| r.instances(&req)))`.

use std::future::Future;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::{GeoNetError, Result, TaskFailure};

/// Upper bound on concurrently running tasks
pub const MAX_WORKERS: usize = 50;

/// Run every task and return each outcome, in submission order
pub async fn wait_settled<I, F, T>(tasks: I) -> Vec<Result<T>>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T>>,
{
    wait_settled_with(MAX_WORKERS, tasks).await
}

/// [`wait_settled`] with an explicit worker limit
pub async fn wait_settled_with<I, F, T>(limit: usize, tasks: I) -> Vec<Result<T>>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T>>,
{
    let semaphore = Semaphore::new(limit.max(1));
    let semaphore = &semaphore;

    let futures: Vec<_> = tasks
        .into_iter()
        .map(|task| async move {
            let _permit = semaphore
                .acquire()
                .await
                .map_err(|e| GeoNetError::General(e.into()))?;
            task.await
        })
        .collect();

    debug!(count = futures.len(), limit, "Waiting on task batch");
    join_all(futures).await
}

/// Run every task; fail the batch if any task failed.
///
/// On failure every per-task error is kept with its submission index in
/// [`GeoNetError::Batch`].
pub async fn wait<I, F, T>(tasks: I) -> Result<Vec<T>>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T>>,
{
    settle(wait_settled(tasks).await)
}

/// Fold settled outcomes into all values or one aggregate error
pub fn settle<T>(results: Vec<Result<T>>) -> Result<Vec<T>> {
    let total = results.len();
    let mut values = Vec::with_capacity(total);
    let mut failures = Vec::new();

    for (index, result) in results.into_iter().enumerate() {
        match result {
            Ok(value) => values.push(value),
            Err(error) => failures.push(TaskFailure { index, error }),
        }
    }

    if failures.is_empty() {
        Ok(values)
    } else {
        warn!(total, failed = failures.len(), "Task batch failed");
        Err(GeoNetError::Batch { total, failures })
    }
}
