//! Error types for the PVC Snapshot Operator

use thiserror::Error;

/// Result type for the operator
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the operator
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(String),

    /// A work item key that is not of the form `namespace/name`
    #[error("Invalid work item key: {0}")]
    InvalidKey(String),

    /// Validation error in a SnapshotRequest spec; never retried
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Some claim snapshots in a processing cycle failed
    #[error("Snapshot creation failed for {failed} of {matched} matched claims")]
    PartialFailure {
        /// Claims matched by the selector
        matched: usize,
        /// Claims whose snapshot creation failed
        failed: usize,
    },

    /// The watcher never completed its initial list within the startup timeout
    #[error("Timed out waiting for the initial SnapshotRequest sync")]
    SyncTimeout,
}

impl Error {
    /// Whether retrying the work item can possibly succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Error::ValidationError(_) | Error::InvalidKey(_))
    }
}
