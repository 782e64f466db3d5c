//! Folder tree replication
//!
//! [`FolderCloner`] mirrors a source folder into a destination parent. Work is
//! driven from an explicit stack: visiting a folder creates its copy, lists
//! its children, then pushes the folder's leaf batch followed by its
//! subfolders. Subfolder subtrees therefore finish, depth-first and one at a
//! time, before the folder's own leaves are copied.
//!
//! Leaf copies go through the [`FanOut`] executor with the configured
//! concurrency. Each folder's batch is independent; an optional tree-wide
//! semaphore (`global_limit`) additionally caps folder creations and copies
//! across the whole operation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, SemaphorePermit};

use crate::config::{CloneConfig, Config};
use crate::context::CloneContext;
use crate::enumerate::Enumerator;
use crate::error::{Error, ErrorKind, Result};
use crate::executor::FanOut;
use crate::report::CloneReport;
use crate::retry::{Attempt, CallKind, RetryPolicy};
use crate::traits::{RemoteNode, RemoteStore};

/// One leaf copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyTask {
    pub source_id: String,
    pub destination_parent_id: String,
    pub desired_name: String,
    /// Reported size of the source, for byte accounting
    pub size: Option<u64>,
}

impl CopyTask {
    fn for_node(node: &RemoteNode, destination_parent_id: &str, desired_name: &str) -> Self {
        Self {
            source_id: node.id.clone(),
            destination_parent_id: destination_parent_id.to_string(),
            desired_name: desired_name.to_string(),
            size: node.size,
        }
    }
}

/// Result of one leaf copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyOutcome {
    Copied { destination_id: String },
    /// Refused for permission reasons
    Skipped(String),
    Missing,
    Failed { kind: ErrorKind, message: String },
    Cancelled,
}

/// Pending work on the stack
#[derive(Debug)]
enum Frame {
    Folder(FolderJob),
    Copy(Vec<CopyTask>),
}

#[derive(Debug, Clone)]
struct FolderJob {
    source_id: String,
    name: String,
    parent_id: String,
}

/// Source to destination mapping for one clone operation
///
/// A source id is claimed the first time it is reached, so nodes linked from
/// several parents are cloned once. Destination ids created by this run are
/// remembered so the walk never descends into its own output.
#[derive(Debug, Default)]
struct CloneMapping {
    targets: HashMap<String, Option<String>>,
    created: HashSet<String>,
}

impl CloneMapping {
    /// Claim `source_id`; false if it was already claimed
    fn claim(&mut self, source_id: &str) -> bool {
        if self.targets.contains_key(source_id) {
            return false;
        }
        self.targets.insert(source_id.to_string(), None);
        true
    }

    fn record(&mut self, source_id: &str, destination_id: &str) {
        self.targets
            .insert(source_id.to_string(), Some(destination_id.to_string()));
        self.created.insert(destination_id.to_string());
    }

    fn destination_of(&self, source_id: &str) -> Option<&str> {
        self.targets.get(source_id).and_then(|t| t.as_deref())
    }

    fn is_own_output(&self, id: &str) -> bool {
        self.created.contains(id)
    }
}

/// State of a single clone operation
struct CloneRun {
    ctx: CloneContext,
    mapping: CloneMapping,
    limit: Option<Arc<Semaphore>>,
    report: CloneReport,
}

/// Children of a visited folder, split by how they are cloned
struct Expansion {
    folders: Vec<FolderJob>,
    tasks: Vec<CopyTask>,
}

/// Recursively mirrors folders within a [`RemoteStore`]
pub struct FolderCloner<S: ?Sized> {
    store: Arc<S>,
    config: CloneConfig,
    retry: RetryPolicy,
    fan_out: FanOut,
    ctx: CloneContext,
}

impl<S: RemoteStore + ?Sized + 'static> FolderCloner<S> {
    pub fn new(store: Arc<S>, config: &Config) -> Self {
        Self {
            store,
            fan_out: FanOut::new(config.clone.max_concurrency, config.clone.scheduling),
            config: config.clone.clone(),
            retry: RetryPolicy::new(config.retry.clone()),
            ctx: CloneContext::new(),
        }
    }

    /// Run under an externally controlled cancellation context
    pub fn with_context(mut self, ctx: CloneContext) -> Self {
        self.ctx = ctx;
        self
    }

    pub fn context(&self) -> &CloneContext {
        &self.ctx
    }

    /// Mirror `source_id` as `new_name` inside `destination_parent_id`
    ///
    /// Fails only when the source itself cannot be resolved or its copy
    /// cannot be created. Everything below the root is best-effort and
    /// accounted for in the returned report.
    pub async fn clone_folder(
        &self,
        source_id: &str,
        new_name: &str,
        destination_parent_id: &str,
    ) -> Result<CloneReport> {
        let ctx = match self.config.timeout_secs {
            Some(secs) => self.ctx.clone().with_timeout(Duration::from_secs(secs)),
            None => self.ctx.clone(),
        };
        let mut run = CloneRun {
            ctx,
            mapping: CloneMapping::default(),
            limit: self
                .config
                .global_limit
                .map(|n| Arc::new(Semaphore::new(n.max(1)))),
            report: CloneReport::default(),
        };
        run.mapping.claim(source_id);

        let root = FolderJob {
            source_id: source_id.to_string(),
            name: new_name.to_string(),
            parent_id: destination_parent_id.to_string(),
        };

        let expansion = match self.visit_root(&mut run, &root).await {
            Ok(Some(expansion)) => expansion,
            Ok(None) => return Ok(run.report),
            Err(e) if e.is_cancellation() => {
                run.report.cancelled = true;
                return Ok(run.report);
            }
            Err(e) => {
                tracing::error!(source_id = %source_id, error = %e, "Clone aborted");
                return Err(e);
            }
        };

        let mut stack = Vec::new();
        push_expansion(&mut stack, expansion);

        while let Some(frame) = stack.pop() {
            if run.ctx.check().is_err() {
                run.report.cancelled = true;
                break;
            }
            match frame {
                Frame::Folder(job) => {
                    run.report.children_processed += 1;
                    match self.visit(&mut run, &job).await {
                        Ok(expansion) => push_expansion(&mut stack, expansion),
                        Err(e) => {
                            if !e.is_cancellation() {
                                tracing::error!(
                                    source_id = %job.source_id,
                                    name = %job.name,
                                    error = %e,
                                    "Subtree not cloned"
                                );
                            }
                            run.report.record_failure(&job.source_id, &job.name, &e);
                        }
                    }
                }
                Frame::Copy(tasks) => self.copy_leaves(&mut run, tasks).await,
            }
        }

        tracing::info!(
            source_id = %source_id,
            folders = run.report.folders_created,
            files = run.report.files_copied,
            skipped = run.report.skipped,
            failed = run.report.failed,
            cancelled = run.report.cancelled,
            "Clone finished"
        );
        Ok(run.report)
    }

    /// Resolve the root; a leaf root is copied directly and yields no expansion
    async fn visit_root(&self, run: &mut CloneRun, root: &FolderJob) -> Result<Option<Expansion>> {
        let source = self.resolve(&run.ctx, &root.source_id).await?;
        if source.is_folder() {
            return self.expand(run, root).await.map(Some);
        }

        let task = CopyTask::for_node(&source, &root.parent_id, &root.name);
        let outcome = copy_one(
            self.store.as_ref(),
            &self.retry,
            &run.ctx,
            run.limit.as_deref(),
            &task,
        )
        .await;
        record_copy(&mut run.report, &mut run.mapping, &task, outcome);
        Ok(None)
    }

    async fn visit(&self, run: &mut CloneRun, job: &FolderJob) -> Result<Expansion> {
        self.resolve(&run.ctx, &job.source_id).await?;
        self.expand(run, job).await
    }

    /// Create the destination folder and split the source's children
    async fn expand(&self, run: &mut CloneRun, job: &FolderJob) -> Result<Expansion> {
        let created = self
            .create_folder(&run.ctx, run.limit.as_deref(), &job.name, &job.parent_id)
            .await?;
        run.mapping.record(&job.source_id, &created.id);
        run.report.folders_created += 1;
        tracing::info!(
            source_id = %job.source_id,
            folder_id = %created.id,
            name = %job.name,
            "Created folder"
        );

        let listing = Enumerator::from_config(self.store.as_ref(), &self.config)
            .list_children(&run.ctx, &job.source_id)
            .await;
        if listing.cancelled {
            run.report.cancelled = true;
        } else if !listing.complete {
            run.report.truncated_listings += 1;
        }
        run.report.children_listed += listing.nodes.len();

        let mut expansion = Expansion {
            folders: Vec::new(),
            tasks: Vec::new(),
        };
        for child in &listing.nodes {
            if run.mapping.is_own_output(&child.id) {
                run.report.children_processed += 1;
                continue;
            }
            if !run.mapping.claim(&child.id) {
                tracing::debug!(
                    source_id = %child.id,
                    destination_id = run.mapping.destination_of(&child.id).unwrap_or("pending"),
                    "Already cloned through another parent"
                );
                run.report.duplicates += 1;
                run.report.children_processed += 1;
                continue;
            }

            if child.is_folder() {
                expansion.folders.push(FolderJob {
                    source_id: child.id.clone(),
                    name: child.name.clone(),
                    parent_id: created.id.clone(),
                });
            } else {
                expansion
                    .tasks
                    .push(CopyTask::for_node(child, &created.id, &child.name));
            }
        }
        Ok(expansion)
    }

    async fn copy_leaves(&self, run: &mut CloneRun, tasks: Vec<CopyTask>) {
        let store = self.store.clone();
        let retry = self.retry.clone();
        let ctx = run.ctx.clone();
        let limit = run.limit.clone();

        let results = self
            .fan_out
            .run(tasks, move |task: CopyTask| {
                let store = store.clone();
                let retry = retry.clone();
                let ctx = ctx.clone();
                let limit = limit.clone();
                async move { copy_one(store.as_ref(), &retry, &ctx, limit.as_deref(), &task).await }
            })
            .await;

        for (task, outcome) in results {
            let outcome = outcome.unwrap_or_else(|e| CopyOutcome::Failed {
                kind: e.kind(),
                message: e.to_string(),
            });
            record_copy(&mut run.report, &mut run.mapping, &task, outcome);
        }
    }

    async fn resolve(&self, ctx: &CloneContext, id: &str) -> Result<RemoteNode> {
        let attempt = self
            .retry
            .attempt(ctx, CallKind::GetNode, || self.store.get_node(id))
            .await?;
        match attempt {
            Attempt::Done(node) => Ok(node),
            Attempt::Missing => Err(Error::NotFound(id.to_string())),
            Attempt::Restricted(reason) => Err(Error::PermissionRestricted(reason)),
        }
    }

    async fn create_folder(
        &self,
        ctx: &CloneContext,
        limit: Option<&Semaphore>,
        name: &str,
        parent_id: &str,
    ) -> Result<RemoteNode> {
        let _permit = acquire(ctx, limit).await?;
        let attempt = self
            .retry
            .attempt(ctx, CallKind::CreateFolder, || {
                self.store.create_folder(name, parent_id)
            })
            .await?;
        match attempt {
            Attempt::Done(node) => Ok(node),
            Attempt::Missing => Err(Error::NotFound(parent_id.to_string())),
            Attempt::Restricted(reason) => Err(Error::PermissionRestricted(reason)),
        }
    }
}

fn push_expansion(stack: &mut Vec<Frame>, expansion: Expansion) {
    if !expansion.tasks.is_empty() {
        stack.push(Frame::Copy(expansion.tasks));
    }
    stack.extend(expansion.folders.into_iter().rev().map(Frame::Folder));
}

async fn acquire<'a>(
    ctx: &CloneContext,
    limit: Option<&'a Semaphore>,
) -> Result<Option<SemaphorePermit<'a>>> {
    match limit {
        Some(semaphore) => {
            let permit = ctx
                .run(async { semaphore.acquire().await.map_err(|_| Error::Cancelled) })
                .await?;
            Ok(Some(permit))
        }
        None => Ok(None),
    }
}

async fn copy_one<S: RemoteStore + ?Sized>(
    store: &S,
    retry: &RetryPolicy,
    ctx: &CloneContext,
    limit: Option<&Semaphore>,
    task: &CopyTask,
) -> CopyOutcome {
    let _permit = match acquire(ctx, limit).await {
        Ok(permit) => permit,
        Err(_) => return CopyOutcome::Cancelled,
    };

    let attempt = retry
        .attempt(ctx, CallKind::Copy, || {
            store.copy_node(
                &task.source_id,
                &task.destination_parent_id,
                &task.desired_name,
            )
        })
        .await;

    match attempt {
        Ok(Attempt::Done(node)) => {
            tracing::debug!(
                source_id = %task.source_id,
                destination_id = %node.id,
                name = %task.desired_name,
                "Copied"
            );
            CopyOutcome::Copied {
                destination_id: node.id,
            }
        }
        Ok(Attempt::Missing) => CopyOutcome::Missing,
        Ok(Attempt::Restricted(reason)) => CopyOutcome::Skipped(reason),
        Err(e) if e.is_cancellation() => CopyOutcome::Cancelled,
        Err(e) => {
            tracing::warn!(
                source_id = %task.source_id,
                name = %task.desired_name,
                error = %e,
                "Copy failed"
            );
            CopyOutcome::Failed {
                kind: e.kind(),
                message: e.to_string(),
            }
        }
    }
}

fn record_copy(
    report: &mut CloneReport,
    mapping: &mut CloneMapping,
    task: &CopyTask,
    outcome: CopyOutcome,
) {
    let (id, name) = (task.source_id.as_str(), task.desired_name.as_str());
    match outcome {
        CopyOutcome::Copied { destination_id } => {
            mapping.record(id, &destination_id);
            report.files_copied += 1;
            report.bytes_copied += task.size.unwrap_or(0);
        }
        CopyOutcome::Skipped(reason) => report.record_skip(id, name, reason),
        CopyOutcome::Missing => report.record_missing(id, name),
        CopyOutcome::Failed { kind, message } => report.record_failed(id, name, kind, message),
        CopyOutcome::Cancelled => {
            report.cancelled = true;
            return;
        }
    }
    report.children_processed += 1;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_claims_once() {
        let mut mapping = CloneMapping::default();
        assert!(mapping.claim("src"));
        assert!(!mapping.claim("src"));
        assert_eq!(mapping.destination_of("src"), None);

        mapping.record("src", "dst");
        assert_eq!(mapping.destination_of("src"), Some("dst"));
        assert!(mapping.is_own_output("dst"));
        assert!(!mapping.is_own_output("src"));
    }

    #[test]
    fn test_stack_order_runs_subfolders_before_leaves() {
        let job = |id: &str| FolderJob {
            source_id: id.to_string(),
            name: id.to_string(),
            parent_id: "p".to_string(),
        };
        let task = CopyTask {
            source_id: "leaf".to_string(),
            destination_parent_id: "p".to_string(),
            desired_name: "leaf".to_string(),
            size: None,
        };

        let mut stack = Vec::new();
        push_expansion(
            &mut stack,
            Expansion {
                folders: vec![job("a"), job("b")],
                tasks: vec![task],
            },
        );

        let order: Vec<String> = std::iter::from_fn(|| stack.pop())
            .map(|frame| match frame {
                Frame::Folder(job) => job.source_id,
                Frame::Copy(tasks) => format!("copy:{}", tasks.len()),
            })
            .collect();
        assert_eq!(order, ["a", "b", "copy:1"]);
    }

    #[test]
    fn test_record_copy_counts_bytes() {
        let mut report = CloneReport::default();
        let mut mapping = CloneMapping::default();
        let task = CopyTask {
            source_id: "s".to_string(),
            destination_parent_id: "p".to_string(),
            desired_name: "s.bin".to_string(),
            size: Some(1500),
        };

        record_copy(
            &mut report,
            &mut mapping,
            &task,
            CopyOutcome::Copied {
                destination_id: "d".to_string(),
            },
        );
        record_copy(&mut report, &mut mapping, &task, CopyOutcome::Cancelled);

        assert_eq!(report.files_copied, 1);
        assert_eq!(report.bytes_copied, 1500);
        assert_eq!(report.children_processed, 1);
        assert!(report.cancelled);
        assert_eq!(mapping.destination_of("s"), Some("d"));
    }
}
