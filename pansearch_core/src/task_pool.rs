//! Bounded concurrent batch execution with a per-task timeout.
//!
//! The dispatcher fans a query out to every active plugin through this pool;
//! a slow task costs its own slot for at most the hard cap, never the batch.

use futures::stream::{self, StreamExt};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Run every task with at most `concurrency` in flight, each capped at
/// `timeout`. The output preserves input order; a task that times out (or
/// resolves to `None` itself) yields `None` in its slot.
pub async fn execute_batch_with_timeout<T, F>(
    tasks: Vec<F>,
    concurrency: usize,
    timeout: Duration,
) -> Vec<Option<T>>
where
    F: Future<Output = Option<T>> + Send,
    T: Send,
{
    let total = tasks.len();
    if total == 0 {
        return Vec::new();
    }
    let concurrency = concurrency.max(1);

    let mut indexed: Vec<(usize, Option<T>)> = stream::iter(tasks.into_iter().enumerate())
        .map(|(idx, task)| async move {
            match tokio::time::timeout(timeout, task).await {
                Ok(output) => (idx, output),
                Err(_) => {
                    debug!(target: "pansearch.task_pool", task = idx, "task hit the hard cap");
                    (idx, None)
                }
            }
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;

    indexed.sort_by_key(|(idx, _)| *idx);
    indexed.into_iter().map(|(_, output)| output).collect()
}
