//! Bounded worker pool
//!
//! A fixed number of tasks pull indices from a shared cursor and send
//! `(index, result)` back to the collector, which writes each result into
//! its input slot. The collector also owns the batch clock: a warning timer
//! and a hard deadline that cancels everything still in flight.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Limits for one batch
#[derive(Debug, Clone, Copy)]
pub(crate) struct PoolLimits {
    pub workers: usize,
    pub deadline: Duration,
    pub warn_after: Duration,
}

/// How a batch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BatchStatus {
    Completed,
    DeadlineExceeded,
    Cancelled,
}

#[derive(Debug)]
pub(crate) struct BatchOutput<R> {
    /// One slot per input, `None` where no result arrived
    pub slots: Vec<Option<R>>,
    pub status: BatchStatus,
}

/// Run `task` over every item with at most `limits.workers` in flight.
///
/// `task` receives the batch token and returns `None` when it gave up
/// because that token fired. Returns once every item is done, the deadline
/// passes, or `parent` is cancelled.
pub(crate) async fn run_bounded<T, R, F, Fut>(
    label: &'static str,
    items: Arc<[T]>,
    limits: PoolLimits,
    parent: &CancellationToken,
    task: F,
) -> BatchOutput<R>
where
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
    F: Fn(T, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<R>> + Send + 'static,
{
    let len = items.len();
    let mut slots: Vec<Option<R>> = std::iter::repeat_with(|| None).take(len).collect();
    if len == 0 {
        return BatchOutput {
            slots,
            status: BatchStatus::Completed,
        };
    }

    let started = Instant::now();
    let workers = limits.workers.clamp(1, len);
    let batch = parent.child_token();
    let cursor = Arc::new(AtomicUsize::new(0));
    let task = Arc::new(task);
    let (tx, mut rx) = mpsc::channel::<(usize, R)>(workers * 2);

    let mut set = JoinSet::new();
    for _ in 0..workers {
        let items = items.clone();
        let cursor = cursor.clone();
        let batch = batch.clone();
        let task = task.clone();
        let tx = tx.clone();
        set.spawn(async move {
            while !batch.is_cancelled() {
                let index = cursor.fetch_add(1, Ordering::Relaxed);
                let Some(item) = items.get(index) else {
                    break;
                };
                if let Some(result) = (*task)(item.clone(), batch.clone()).await {
                    if tx.send((index, result)).await.is_err() {
                        break;
                    }
                }
            }
        });
    }
    drop(tx);

    tracing::debug!(batch = label, items = len, workers, "batch started");

    let warn = sleep_until(started + limits.warn_after);
    let deadline = sleep_until(started + limits.deadline);
    tokio::pin!(warn, deadline);
    let mut warned = false;

    let status = loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some((index, result)) => slots[index] = Some(result),
                None => break BatchStatus::Completed,
            },
            _ = &mut warn, if !warned => {
                warned = true;
                let done = slots.iter().filter(|s| s.is_some()).count();
                tracing::warn!(
                    batch = label,
                    elapsed = ?started.elapsed(),
                    done,
                    total = len,
                    "batch is taking longer than expected"
                );
            }
            _ = &mut deadline => break BatchStatus::DeadlineExceeded,
            _ = parent.cancelled() => break BatchStatus::Cancelled,
        }
    };

    if status != BatchStatus::Completed {
        batch.cancel();
        set.abort_all();
        while let Ok((index, result)) = rx.try_recv() {
            slots[index] = Some(result);
        }
        let missing = slots.iter().filter(|s| s.is_none()).count();
        tracing::warn!(
            batch = label,
            elapsed = ?started.elapsed(),
            missing,
            total = len,
            status = ?status,
            "batch stopped early"
        );
    } else {
        tracing::debug!(batch = label, elapsed = ?started.elapsed(), "batch finished");
    }

    BatchOutput { slots, status }
}
