//! Aggregated outcome of a clone operation

use std::fmt;

use serde::Serialize;

use crate::error::{Error, ErrorKind};

/// A node that was skipped or could not be cloned
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub source_id: String,
    pub name: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Counters for one clone operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CloneReport {
    pub folders_created: usize,
    pub files_copied: usize,
    pub bytes_copied: u64,

    /// Leaf copies refused for permission reasons
    pub skipped: usize,

    /// Nodes that disappeared before they could be cloned
    pub missing: usize,

    /// Leaf copies and subtrees that failed
    pub failed: usize,

    /// Nodes reached a second time through another parent
    pub duplicates: usize,

    /// Children returned by all listings
    pub children_listed: usize,

    /// Children that reached a final state
    pub children_processed: usize,

    /// Listings that ended early
    pub truncated_listings: usize,

    pub cancelled: bool,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FailureRecord>,
}

impl CloneReport {
    /// Every listing was complete, nothing failed and the run was not cancelled
    pub fn is_complete(&self) -> bool {
        self.failed == 0 && self.truncated_listings == 0 && !self.cancelled
    }

    pub(crate) fn record_skip(&mut self, source_id: &str, name: &str, reason: String) {
        self.skipped += 1;
        self.push_record(source_id, name, ErrorKind::PermissionRestricted, reason);
    }

    pub(crate) fn record_missing(&mut self, source_id: &str, name: &str) {
        self.missing += 1;
        self.push_record(
            source_id,
            name,
            ErrorKind::NotFound,
            format!("{source_id} no longer exists"),
        );
    }

    pub(crate) fn record_failure(&mut self, source_id: &str, name: &str, error: &Error) {
        if error.is_cancellation() {
            self.cancelled = true;
            return;
        }
        if error.kind() == ErrorKind::NotFound {
            self.record_missing(source_id, name);
            return;
        }
        self.record_failed(source_id, name, error.kind(), error.to_string());
    }

    pub(crate) fn record_failed(
        &mut self,
        source_id: &str,
        name: &str,
        kind: ErrorKind,
        message: String,
    ) {
        self.failed += 1;
        self.push_record(source_id, name, kind, message);
    }

    fn push_record(&mut self, source_id: &str, name: &str, kind: ErrorKind, message: String) {
        self.failures.push(FailureRecord {
            source_id: source_id.to_string(),
            name: name.to_string(),
            kind,
            message,
        });
    }
}

impl fmt::Display for CloneReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} folders created, {} files copied ({}), {} skipped, {} missing, {} failed",
            self.folders_created,
            self.files_copied,
            humansize::format_size(self.bytes_copied, humansize::DECIMAL),
            self.skipped,
            self.missing,
            self.failed,
        )?;
        if self.duplicates > 0 {
            write!(f, ", {} duplicates", self.duplicates)?;
        }
        if self.truncated_listings > 0 {
            write!(
                f,
                ", {} listings truncated ({}/{} children processed)",
                self.truncated_listings, self.children_processed, self.children_listed
            )?;
        }
        if self.cancelled {
            f.write_str(" (cancelled)")?;
        }
        Ok(())
    }
}
