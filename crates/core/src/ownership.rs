//! Bulk ownership transfer
//!
//! Dispatches one transfer per node through [`FanOut`], each wrapped in the
//! retry policy. Only the retry shape is handled here; what ownership means
//! is up to the store.

use std::sync::Arc;

use serde::Serialize;

use crate::context::CloneContext;
use crate::error::{Error, ErrorKind};
use crate::executor::{FanOut, Scheduling};
use crate::report::FailureRecord;
use crate::retry::{Attempt, CallKind, RetryPolicy};
use crate::traits::RemoteStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOptions {
    pub max_concurrency: usize,
    /// When false nothing is sent; every id is only counted as planned
    pub execute: bool,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            execute: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransferReport {
    pub planned: usize,
    pub transferred: usize,
    pub missing: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FailureRecord>,
}

enum TransferOutcome {
    Transferred,
    Missing,
    Skipped(String),
    Failed(Error),
}

/// Transfer ownership of every node in `ids` to `new_owner`
pub async fn transfer_ownership<S: RemoteStore + ?Sized + 'static>(
    store: Arc<S>,
    retry: &RetryPolicy,
    ctx: &CloneContext,
    ids: Vec<String>,
    new_owner: &str,
    options: TransferOptions,
) -> TransferReport {
    let mut report = TransferReport {
        planned: ids.len(),
        ..Default::default()
    };

    if !options.execute {
        for id in &ids {
            tracing::info!(id = %id, new_owner = %new_owner, "Would transfer ownership (dry run)");
        }
        return report;
    }

    let retry = retry.clone();
    let ctx = ctx.clone();
    let owner = new_owner.to_string();
    let fan_out = FanOut::new(options.max_concurrency, Scheduling::Batched);

    let results = fan_out
        .run(ids, move |id: String| {
            let store = store.clone();
            let retry = retry.clone();
            let ctx = ctx.clone();
            let owner = owner.clone();
            async move {
                let attempt = retry
                    .attempt(&ctx, CallKind::TransferOwnership, || {
                        store.transfer_ownership(&id, &owner)
                    })
                    .await;
                match attempt {
                    Ok(Attempt::Done(())) => TransferOutcome::Transferred,
                    Ok(Attempt::Missing) => TransferOutcome::Missing,
                    Ok(Attempt::Restricted(reason)) => TransferOutcome::Skipped(reason),
                    Err(e) => TransferOutcome::Failed(e),
                }
            }
        })
        .await;

    for (id, outcome) in results {
        match outcome.unwrap_or_else(TransferOutcome::Failed) {
            TransferOutcome::Transferred => {
                tracing::info!(id = %id, new_owner = %new_owner, "Ownership transferred");
                report.transferred += 1;
            }
            TransferOutcome::Missing => report.missing += 1,
            TransferOutcome::Skipped(reason) => {
                report.skipped += 1;
                report.failures.push(FailureRecord {
                    kind: ErrorKind::PermissionRestricted,
                    source_id: id.clone(),
                    name: id,
                    message: reason,
                });
            }
            TransferOutcome::Failed(e) if e.is_cancellation() => report.cancelled = true,
            TransferOutcome::Failed(e) => {
                tracing::warn!(id = %id, error = %e, "Ownership transfer failed");
                report.failed += 1;
                report.failures.push(FailureRecord {
                    kind: e.kind(),
                    source_id: id.clone(),
                    name: id,
                    message: e.to_string(),
                });
            }
        }
    }
    report
}
