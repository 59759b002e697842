// src/utils/errors.rs
//! Error types for the event pipeline
//!
//! Most pipeline operations are non-fatal by contract and degrade to
//! "drop this item" or "retry later". `PipelineError` is returned only from
//! fallible setup paths (directory creation, configuration loading) and from
//! the internal helpers that the public operations log and swallow.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Storage directory or batch file could not be used
    #[error("storage failed: {0}")]
    StorageFailed(String),

    /// Advisory file lock could not be acquired in time
    #[error("timed out after {elapsed:?} waiting for lock on {path}")]
    LockTimeout { path: PathBuf, elapsed: Duration },

    /// Item is larger than the configured limits
    #[error("item of {size} bytes exceeds the limit of {limit} bytes")]
    ItemTooLarge { size: u64, limit: u64 },

    /// Consent migration failed
    #[error("migration failed: {0}")]
    MigrationFailed(String),

    /// Invalid or unreadable configuration
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Background worker could not accept the job
    #[error("worker unavailable: {0}")]
    WorkerUnavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<::config::ConfigError> for PipelineError {
    fn from(e: ::config::ConfigError) -> Self {
        PipelineError::ConfigError(e.to_string())
    }
}

impl PipelineError {
    /// Whether the error means the target file vanished underneath us
    pub fn is_not_found(&self) -> bool {
        matches!(self, PipelineError::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_detection() {
        let err: PipelineError =
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(err.is_not_found());

        let err = PipelineError::StorageFailed("disk".to_string());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_display() {
        let err = PipelineError::ItemTooLarge { size: 10, limit: 5 };
        assert_eq!(
            err.to_string(),
            "item of 10 bytes exceeds the limit of 5 bytes"
        );
    }
}
