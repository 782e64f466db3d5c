//! dc-core: Tree replication engine for drive-clone
//!
//! This crate clones a folder hierarchy on a remote hierarchical store into a
//! new location, including:
//! - Paginated child enumeration with partial-result reporting
//! - Classification-based retry with bounded exponential backoff
//! - Bounded concurrent fan-out of leaf copies
//! - Cancellation and deadline propagation
//! - Bulk ownership transfer
//!
//! The engine only talks to the store through the [`RemoteStore`] trait, so
//! it is independent of any particular HTTP API and can be tested against
//! an in-memory store.

pub mod cloner;
pub mod config;
pub mod context;
pub mod enumerate;
pub mod error;
pub mod executor;
pub mod ownership;
pub mod report;
pub mod retry;
pub mod traits;

pub use cloner::{CopyTask, FolderCloner};
pub use config::{CloneConfig, Config, ConfigManager, RetryConfig, RetrySettings};
pub use context::CloneContext;
pub use enumerate::{Enumerator, Listing};
pub use error::{Error, ErrorKind, Result};
pub use executor::{FanOut, Scheduling};
pub use ownership::{TransferOptions, TransferReport, transfer_ownership};
pub use report::{CloneReport, FailureRecord};
pub use retry::{Attempt, CallKind, RetryBuilder, RetryPolicy};
pub use traits::{ListOptions, ListPage, MAX_PAGE_SIZE, NodeKind, RemoteNode, RemoteStore};
