//! Error types for sift
//!
//! Every fallible operation in the workspace returns [`SiftResult`]. The
//! variants follow the failure taxonomy of the write path:
//!
//! - `Corruption`: persisted index state could not be decoded. Sticky at the
//!   partition context level and never retried.
//! - `Unavailable`: the partition is closed, offline, or has no context. The
//!   caller should try another replica.
//! - `Interrupted`: cooperative cancellation observed after a batch.
//! - `MergeFailed`: one merge sub-task failed; the cause is kept as `source`.
//!
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use std::error::Error as StdError;
use std::io;
use thiserror::Error;

/// Result type alias for sift operations
pub type SiftResult<T> = std::result::Result<T, SiftError>;

/// Error types for the sift indexing core
#[derive(Debug, Error)]
pub enum SiftError {
    /// Structural failure reading or writing persisted index state
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// Partition cannot serve the request; try elsewhere
    #[error("Partition unavailable: {0}")]
    Unavailable(String),

    /// Indexing thread was interrupted
    #[error("Interrupted: {0}")]
    Interrupted(String),

    /// A merge sub-task failed
    #[error("Merge of {index} failed: {source}")]
    MergeFailed {
        /// Name of the delta index whose merge failed
        index: String,
        /// Underlying failure
        #[source]
        source: Box<SiftError>,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid argument supplied by a caller
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration could not be read or is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Executor refused to accept more work
    #[error("Executor queue is full")]
    Backpressure,

    /// A pooled task panicked instead of returning
    #[error("Task panicked: {0}")]
    Panicked(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SiftError {
    /// Create a corruption error
    pub fn corruption(msg: impl Into<String>) -> Self {
        SiftError::Corruption(msg.into())
    }

    /// Create an unavailability error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        SiftError::Unavailable(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        SiftError::InvalidInput(msg.into())
    }

    /// Wrap a sub-index failure raised during merge
    pub fn merge_failed(index: impl Into<String>, source: SiftError) -> Self {
        SiftError::MergeFailed {
            index: index.into(),
            source: Box::new(source),
        }
    }

    /// True if this error, or any error in its cause chain, is a corruption.
    pub fn is_corruption(&self) -> bool {
        let mut current: Option<&(dyn StdError + 'static)> = Some(self);
        while let Some(err) = current {
            let found = err
                .downcast_ref::<SiftError>()
                .or_else(|| err.downcast_ref::<Box<SiftError>>().map(|b| &**b));
            if let Some(SiftError::Corruption(_)) = found {
                return true;
            }
            current = err.source();
        }
        false
    }

    /// True if the caller should route the request to another replica.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, SiftError::Unavailable(_))
    }

    /// True if this is an interruption abort
    pub fn is_interrupted(&self) -> bool {
        matches!(self, SiftError::Interrupted(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_corruption() {
        let err = SiftError::corruption("checksum mismatch");
        let msg = err.to_string();
        assert!(msg.contains("Corruption"));
        assert!(msg.contains("checksum mismatch"));
    }

    #[test]
    fn test_error_display_merge_failed() {
        let err = SiftError::merge_failed("authz", SiftError::Serialization("bad".into()));
        let msg = err.to_string();
        assert!(msg.contains("authz"));
        assert!(msg.contains("bad"));
    }

    #[test]
    fn test_corruption_found_through_cause_chain() {
        let nested = SiftError::merge_failed(
            "field:primary",
            SiftError::merge_failed("inner", SiftError::corruption("crc")),
        );
        assert!(nested.is_corruption());
    }

    #[test]
    fn test_non_corruption_chain() {
        let err = SiftError::merge_failed("sip", SiftError::Backpressure);
        assert!(!err.is_corruption());
        assert!(!SiftError::unavailable("closed").is_corruption());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: SiftError = io_err.into();
        assert!(matches!(err, SiftError::Io(_)));
    }

    #[test]
    fn test_classifiers() {
        assert!(SiftError::unavailable("x").is_unavailable());
        assert!(SiftError::Interrupted("x".into()).is_interrupted());
        assert!(!SiftError::Backpressure.is_unavailable());
    }
}
