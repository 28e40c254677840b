// src/ingest/runner.rs
//! Bounded-concurrency execution of independent, fallible tasks.

use futures::stream::{self, StreamExt};
use std::future::Future;

/// Outbound enrichment requests in flight at once.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Run `task` over `items` with at most `limit` futures in flight.
///
/// Results come back in input order. A task that returns `Err` yields `None`
/// in its slot; the batch always runs to the end. Everything is polled on the
/// caller's task, nothing is spawned.
pub async fn run_bounded<T, R, F, Fut>(items: Vec<T>, limit: usize, task: F) -> Vec<Option<R>>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = anyhow::Result<R>>,
{
    let total = items.len();
    let mut slots: Vec<Option<R>> = std::iter::repeat_with(|| None).take(total).collect();

    let settled: Vec<(usize, anyhow::Result<R>)> = stream::iter(
        items
            .into_iter()
            .enumerate()
            .map(|(idx, item)| {
                let fut = task(item);
                async move { (idx, fut.await) }
            }),
    )
    .buffer_unordered(limit.max(1))
    .collect()
    .await;

    let mut failed = 0usize;
    for (idx, res) in settled {
        match res {
            Ok(v) => slots[idx] = Some(v),
            Err(e) => {
                failed += 1;
                tracing::warn!(target: "ingest", index = idx, error = ?e, "task failed; no result");
            }
        }
    }
    if failed > 0 {
        tracing::debug!(target: "ingest", total, failed, "bounded run finished with failures");
    }
    slots
}
