//! Error types for dc-core
//!
//! Store adapters translate their transport and API failures into these
//! variants. The engine only ever looks at [`Error::kind`], never at message
//! text.

use serde::Serialize;
use thiserror::Error;

use crate::retry::CallKind;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the replication engine and its store adapters
#[derive(Debug, Error)]
pub enum Error {
    /// The node (or its parent) does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The store asked us to slow down
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Temporary server-side failure (5xx class)
    #[error("Server error: {0}")]
    ServerTransient(String),

    /// Connection reset, timeout and similar transport failures
    #[error("Network error: {0}")]
    Network(String),

    /// The caller may not copy or share this node
    #[error("Permission restricted: {0}")]
    PermissionRestricted(String),

    /// Any failure the adapter could not classify
    #[error("{0}")]
    Unclassified(String),

    /// A transient failure persisted past the configured attempt budget
    #[error("{call} gave up after {attempts} attempts: {last}")]
    RetryExhausted {
        call: CallKind,
        attempts: u32,
        last: Box<Error>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse failure classes the retry policy and reports work with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Transient,
    PermissionRestricted,
    Unclassified,
    RetryExhausted,
    Cancelled,
}

impl Error {
    /// Classify this error for retry and reporting decisions
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::RateLimited(_) | Error::ServerTransient(_) | Error::Network(_) => {
                ErrorKind::Transient
            }
            Error::PermissionRestricted(_) => ErrorKind::PermissionRestricted,
            Error::RetryExhausted { .. } => ErrorKind::RetryExhausted,
            Error::Cancelled | Error::DeadlineExceeded => ErrorKind::Cancelled,
            Error::Unclassified(_) | Error::Config(_) | Error::Io(_) => ErrorKind::Unclassified,
        }
    }

    /// True when the failure came from cancellation or an expired deadline
    pub fn is_cancellation(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Transient => "transient",
            ErrorKind::PermissionRestricted => "permission_restricted",
            ErrorKind::Unclassified => "unclassified",
            ErrorKind::RetryExhausted => "retry_exhausted",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_variants_share_a_kind() {
        assert_eq!(
            Error::RateLimited("429".to_string()).kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            Error::ServerTransient("503".to_string()).kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            Error::Network("connection reset".to_string()).kind(),
            ErrorKind::Transient
        );
    }

    #[test]
    fn test_terminal_kinds() {
        assert_eq!(Error::NotFound("x".to_string()).kind(), ErrorKind::NotFound);
        assert_eq!(
            Error::PermissionRestricted("x".to_string()).kind(),
            ErrorKind::PermissionRestricted
        );
        assert_eq!(
            Error::Config("bad".to_string()).kind(),
            ErrorKind::Unclassified
        );
        assert!(Error::DeadlineExceeded.is_cancellation());
        assert!(!Error::Unclassified("duplicate name".to_string()).is_cancellation());
    }

    #[test]
    fn test_retry_exhausted_message_names_the_call() {
        let err = Error::RetryExhausted {
            call: CallKind::Copy,
            attempts: 3,
            last: Box::new(Error::ServerTransient("503".to_string())),
        };
        assert_eq!(err.kind(), ErrorKind::RetryExhausted);
        assert_eq!(
            err.to_string(),
            "copy gave up after 3 attempts: Server error: 503"
        );
    }
}
