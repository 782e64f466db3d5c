//! Retry policy with exponential backoff and jitter
//!
//! Wraps a single remote call. Failures are classified through
//! [`Error::kind`]: transient ones are retried up to the configured attempt
//! budget, missing and restricted nodes end the call without an error, and
//! everything else is handed back to the caller.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::Serialize;

use crate::config::{RetryConfig, RetrySettings};
use crate::context::CloneContext;
use crate::error::{Error, ErrorKind, Result};

/// Remote call families, each with its own backoff settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    GetNode,
    Copy,
    CreateFolder,
    TransferOwnership,
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallKind::GetNode => "get_node",
            CallKind::Copy => "copy",
            CallKind::CreateFolder => "create_folder",
            CallKind::TransferOwnership => "transfer_ownership",
        };
        f.write_str(name)
    }
}

/// Terminal, non-error results of a retried call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt<T> {
    /// The call succeeded
    Done(T),
    /// The store reported the node as missing
    Missing,
    /// The store refused the call for permission reasons
    Restricted(String),
}

/// Classification-based retry around one remote call
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    settings: RetrySettings,
}

impl RetryPolicy {
    pub fn new(settings: RetrySettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &RetrySettings {
        &self.settings
    }

    /// Run `operation` until it succeeds, hits a terminal classification,
    /// or exhausts the attempt budget for `call`
    ///
    /// # Example
    /// ```ignore
    /// let copied = policy
    ///     .attempt(&ctx, CallKind::Copy, || store.copy_node(id, parent, name))
    ///     .await?;
    /// ```
    pub async fn attempt<T, F, Fut>(
        &self,
        ctx: &CloneContext,
        call: CallKind,
        mut operation: F,
    ) -> Result<Attempt<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let config = self.settings.for_call(call);
        let mut attempt = 0;

        loop {
            attempt += 1;
            ctx.check()?;

            let error = match ctx.run(operation()).await {
                Ok(value) => return Ok(Attempt::Done(value)),
                Err(e) => e,
            };

            match error.kind() {
                ErrorKind::NotFound => {
                    tracing::debug!(call = %call, error = %error, "Node not found");
                    return Ok(Attempt::Missing);
                }
                ErrorKind::PermissionRestricted => {
                    tracing::warn!(call = %call, error = %error, "Skipping restricted node");
                    return Ok(Attempt::Restricted(error.to_string()));
                }
                ErrorKind::Transient => {
                    if attempt >= config.max_attempts {
                        tracing::warn!(
                            call = %call,
                            attempts = attempt,
                            error = %error,
                            "Giving up after repeated transient errors"
                        );
                        return Err(Error::RetryExhausted {
                            call,
                            attempts: attempt,
                            last: Box::new(error),
                        });
                    }

                    let backoff = calculate_backoff(config, attempt);
                    tracing::debug!(
                        call = %call,
                        attempt = attempt,
                        backoff_ms = backoff.as_millis(),
                        error = %error,
                        "Retrying after transient error"
                    );
                    ctx.sleep(backoff).await?;
                }
                ErrorKind::Unclassified | ErrorKind::RetryExhausted | ErrorKind::Cancelled => {
                    return Err(error);
                }
            }
        }
    }
}

/// Calculate backoff duration with jitter
fn calculate_backoff(config: &RetryConfig, attempt: u32) -> Duration {
    // Exponential backoff: initial * 2^(attempt-1)
    let base_ms = config
        .initial_backoff_ms
        .saturating_mul(1u64 << (attempt.saturating_sub(1)).min(10));
    let capped_ms = base_ms.min(config.max_backoff_ms);

    let jitter_ms = rand_jitter(capped_ms);
    Duration::from_millis(capped_ms + jitter_ms)
}

/// Generate pseudo-random jitter without external RNG dependency
fn rand_jitter(max: u64) -> u64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    nanos % max.max(1)
}

/// Retry configuration builder for easy customization
#[derive(Debug, Clone)]
pub struct RetryBuilder {
    max_attempts: u32,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
}

impl RetryBuilder {
    pub fn new() -> Self {
        let defaults = RetryConfig::default();
        Self {
            max_attempts: defaults.max_attempts,
            initial_backoff_ms: defaults.initial_backoff_ms,
            max_backoff_ms: defaults.max_backoff_ms,
        }
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    pub fn initial_backoff_ms(mut self, ms: u64) -> Self {
        self.initial_backoff_ms = ms;
        self
    }

    pub fn max_backoff_ms(mut self, ms: u64) -> Self {
        self.max_backoff_ms = ms;
        self
    }

    pub fn build(self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            initial_backoff_ms: self.initial_backoff_ms,
            max_backoff_ms: self.max_backoff_ms,
        }
    }
}

impl Default for RetryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
