//! Paginated child enumeration
//!
//! Listing is best-effort: a transient failure earns the same page one more
//! request after a fixed pause, and any other failure ends the listing with
//! whatever was gathered so far. [`Listing::complete`] tells callers whether
//! the result was truncated, and [`Listing::cancelled`] whether the run's
//! token or deadline stopped it rather than the store.

use std::collections::HashSet;
use std::time::Duration;

use crate::config::CloneConfig;
use crate::context::CloneContext;
use crate::error::{ErrorKind, Result};
use crate::traits::{ListOptions, ListPage, MAX_PAGE_SIZE, RemoteNode, RemoteStore};

/// Result of enumerating one folder (or a whole subtree)
#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub nodes: Vec<RemoteNode>,

    /// Pages successfully fetched
    pub pages: usize,

    /// False when a failure cut the enumeration short
    pub complete: bool,

    /// Set when cancellation or the deadline ended the enumeration
    pub cancelled: bool,
}

/// Continuation state for one enumeration
#[derive(Debug, Default)]
struct PageCursor {
    token: Option<String>,
    nodes: Vec<RemoteNode>,
    pages: usize,
}

impl PageCursor {
    fn finish(self, complete: bool) -> Listing {
        Listing {
            nodes: self.nodes,
            pages: self.pages,
            complete,
            cancelled: false,
        }
    }

    fn interrupt(self) -> Listing {
        Listing {
            cancelled: true,
            ..self.finish(false)
        }
    }
}

/// Lists folder children, following continuation tokens
pub struct Enumerator<'a, S: ?Sized> {
    store: &'a S,
    page_size: u32,
    retry_delay: Duration,
    query_suffix: &'a str,
}

impl<'a, S: RemoteStore + ?Sized> Enumerator<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            page_size: MAX_PAGE_SIZE,
            retry_delay: Duration::from_secs(3),
            query_suffix: "",
        }
    }

    pub fn from_config(store: &'a S, config: &'a CloneConfig) -> Self {
        Self::new(store)
            .page_size(config.page_size)
            .retry_delay(Duration::from_millis(config.list_retry_delay_ms))
            .query_suffix(&config.query_suffix)
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn query_suffix(mut self, suffix: &'a str) -> Self {
        self.query_suffix = suffix;
        self
    }

    /// Query selecting the direct children of `folder_id`
    pub fn child_query(&self, folder_id: &str) -> String {
        format!(
            "'{}' in parents{}",
            folder_id.replace('\'', "\\'"),
            self.query_suffix
        )
    }

    /// Fetch every direct child of `folder_id`
    pub async fn list_children(&self, ctx: &CloneContext, folder_id: &str) -> Listing {
        let query = self.child_query(folder_id);
        let mut cursor = PageCursor::default();

        loop {
            let page = match self.fetch_page(ctx, &query, &cursor).await {
                Ok(Some(page)) => page,
                Ok(None) => {
                    tracing::warn!(
                        folder_id = %folder_id,
                        fetched = cursor.nodes.len(),
                        "Listing truncated"
                    );
                    return cursor.finish(false);
                }
                Err(e) => {
                    tracing::debug!(folder_id = %folder_id, error = %e, "Listing interrupted");
                    return cursor.interrupt();
                }
            };

            let next = page.continuation().map(str::to_owned);
            cursor.nodes.extend(page.items);
            cursor.pages += 1;
            tracing::debug!(
                folder_id = %folder_id,
                pages = cursor.pages,
                total = cursor.nodes.len(),
                "Fetched page"
            );

            match next {
                Some(token) => cursor.token = Some(token),
                None => return cursor.finish(true),
            }
        }
    }

    /// Fetch every node below `folder_id`, each node at most once
    ///
    /// Walks with an explicit stack so deep trees do not grow the call stack.
    pub async fn list_descendants(&self, ctx: &CloneContext, folder_id: &str) -> Listing {
        let mut result = Listing {
            complete: true,
            ..Listing::default()
        };
        let mut seen = HashSet::from([folder_id.to_string()]);
        let mut stack = vec![folder_id.to_string()];

        while let Some(current) = stack.pop() {
            if ctx.check().is_err() {
                result.complete = false;
                result.cancelled = true;
                break;
            }

            let listing = self.list_children(ctx, &current).await;
            result.pages += listing.pages;
            result.complete &= listing.complete;
            result.cancelled |= listing.cancelled;

            for node in listing.nodes {
                if !seen.insert(node.id.clone()) {
                    continue;
                }
                if node.is_folder() {
                    stack.push(node.id.clone());
                }
                result.nodes.push(node);
            }
        }
        result
    }

    /// One page, with a single retry on a transient failure
    ///
    /// `Ok(None)` means the store gave up on the page; `Err` is reserved for
    /// cancellation and the deadline.
    async fn fetch_page(
        &self,
        ctx: &CloneContext,
        query: &str,
        cursor: &PageCursor,
    ) -> Result<Option<ListPage>> {
        let options = ListOptions {
            page_token: cursor.token.clone(),
            page_size: self.page_size,
        };

        let error = match ctx
            .run(self.store.list_children(query, options.clone()))
            .await
        {
            Ok(page) => return Ok(Some(page)),
            Err(e) if e.is_cancellation() => return Err(e),
            Err(e) => e,
        };

        if error.kind() != ErrorKind::Transient {
            tracing::warn!(query = %query, error = %error, "List failed");
            return Ok(None);
        }

        tracing::warn!(
            query = %query,
            delay_ms = self.retry_delay.as_millis(),
            error = %error,
            "Transient list failure, retrying page"
        );
        ctx.sleep(self.retry_delay).await?;

        match ctx.run(self.store.list_children(query, options)).await {
            Ok(page) => Ok(Some(page)),
            Err(e) if e.is_cancellation() => Err(e),
            Err(e) => {
                tracing::warn!(query = %query, error = %e, "List retry failed");
                Ok(None)
            }
        }
    }
}
