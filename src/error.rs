//! Error taxonomy for the batch pipeline.
//!
//! Per-item failures ([`ProcessingError`]) are folded into error
//! [`TransformResult`](crate::image_processing::TransformResult)s and never
//! abort a batch. Request-level failures ([`RunError`]) and flush failures
//! ([`PersistenceError`]) are returned to the caller.

use thiserror::Error;

/// Failure of a storage collaborator (object store or metadata store).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Failure while validating, decoding, transforming or storing one item.
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Failed to decode image: {0}")]
    Decode(String),
    #[error("Transform failed: {0}")]
    Transform(String),
    #[error("Failed to store processed image: {0}")]
    Storage(#[from] StoreError),
}

impl ProcessingError {
    pub fn decode(err: impl std::fmt::Display) -> Self {
        Self::Decode(err.to_string())
    }

    pub fn transform(err: impl std::fmt::Display) -> Self {
        Self::Transform(err.to_string())
    }
}

/// Whole-request failure. Nothing is recorded in the ledger when this is returned.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RunError {
    #[error("Session id must not be empty")]
    EmptySessionId,
    #[error("Too many files in one request: {count} (max {max})")]
    TooManyItems { count: usize, max: usize },
}

/// Flushing a session's results to the metadata store failed.
///
/// The ledger entry is left in place so the flush can be retried.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Failed to persist {count} results for session {session_id}: {source}")]
    Insert {
        session_id: String,
        count: usize,
        #[source]
        source: StoreError,
    },
}

/// Bin-packing could not run on the given input. Always recovered by fixed chunking.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PartitionError {
    #[error("Batch capacity must be greater than zero")]
    ZeroCapacity,
    #[error("Item {index} is malformed: declared {declared} bytes, actual {actual}")]
    MalformedItem {
        index: usize,
        declared: u64,
        actual: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_converts_into_processing_error() {
        let err: ProcessingError = StoreError::NotFound("dev/a.jpg".to_string()).into();
        assert!(matches!(err, ProcessingError::Storage(_)));
        assert_eq!(
            err.to_string(),
            "Failed to store processed image: Object not found: dev/a.jpg"
        );
    }

    #[test]
    fn test_persistence_error_keeps_source() {
        use std::error::Error as _;

        let err = PersistenceError::Insert {
            session_id: "s1".to_string(),
            count: 3,
            source: StoreError::Backend("connection refused".to_string()),
        };
        assert!(err.to_string().contains("3 results for session s1"));
        assert!(err.source().is_some());
    }
}
