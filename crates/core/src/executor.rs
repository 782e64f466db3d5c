//! Bounded fan-out of independent work items
//!
//! Workers run as tokio tasks. Each worker sends its outcome over a channel
//! and the joining task merges them, so workers never share a mutable
//! collection.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;

use crate::error::{Error, Result};

/// How items are scheduled onto workers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheduling {
    /// Fixed-size batches; each batch is joined before the next starts
    #[default]
    Batched,
    /// A fixed pool draining the queue; no stall at batch boundaries
    Pooled,
}

/// Dispatches work items to at most `max_concurrency` concurrent workers
#[derive(Debug, Clone, Copy)]
pub struct FanOut {
    max_concurrency: usize,
    scheduling: Scheduling,
}

impl FanOut {
    pub fn new(max_concurrency: usize, scheduling: Scheduling) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            scheduling,
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn scheduling(&self) -> Scheduling {
        self.scheduling
    }

    /// Run `work` for every item and return each item with its outcome
    ///
    /// Outcomes are in completion order. An item whose worker never reported
    /// (it panicked) is paired with an [`Error::Unclassified`].
    pub async fn run<T, O, F, Fut>(&self, items: Vec<T>, work: F) -> Vec<(T, Result<O>)>
    where
        T: Clone + Send + 'static,
        O: Send + 'static,
        F: Fn(T) -> Fut,
        Fut: Future<Output = O> + Send + 'static,
    {
        if items.is_empty() {
            return Vec::new();
        }

        let mut results = Vec::with_capacity(items.len());
        match self.scheduling {
            Scheduling::Batched => {
                let total = items.len();
                for (batch_no, batch) in items.chunks(self.max_concurrency).enumerate() {
                    tracing::debug!(
                        batch = batch_no,
                        done = results.len(),
                        total = total,
                        "Starting batch"
                    );
                    let batch = batch.to_vec();
                    results.extend(collect(batch, None, &work).await);
                }
            }
            Scheduling::Pooled => {
                let limit = Arc::new(Semaphore::new(self.max_concurrency));
                results.extend(collect(items, Some(limit), &work).await);
            }
        }
        results
    }
}

/// Spawn one worker per item and wait for all of them
///
/// With a semaphore, spawning waits for a free permit, so at most the
/// semaphore's size of workers exist at once.
async fn collect<T, O, F, Fut>(
    items: Vec<T>,
    limit: Option<Arc<Semaphore>>,
    work: &F,
) -> Vec<(T, Result<O>)>
where
    T: Clone + Send + 'static,
    O: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = O> + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<(usize, O)>();
    let mut workers = JoinSet::new();
    let mut pending: Vec<Option<T>> = Vec::with_capacity(items.len());

    for (index, item) in items.into_iter().enumerate() {
        let permit = match &limit {
            Some(semaphore) => match semaphore.clone().acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => {
                    pending.push(Some(item));
                    continue;
                }
            },
            None => None,
        };

        let job = work(item.clone());
        pending.push(Some(item));
        let tx = tx.clone();
        workers.spawn(async move {
            let outcome = job.await;
            drop(permit);
            // The receiver outlives every worker
            let _ = tx.send((index, outcome));
        });
    }
    drop(tx);

    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "Worker terminated abnormally");
        }
    }

    let mut results = Vec::with_capacity(pending.len());
    while let Some((index, outcome)) = rx.recv().await {
        if let Some(item) = pending.get_mut(index).and_then(Option::take) {
            results.push((item, Ok(outcome)));
        }
    }
    for item in pending.into_iter().flatten() {
        results.push((
            item,
            Err(Error::Unclassified("worker did not report an outcome".into())),
        ));
    }
    results
}
