//! Error types for torrent-drive
//!
//! Caller misuse ([`JobError`], [`Error::InvalidSource`]) is reported synchronously and never
//! touches persisted state. Adapter failures are split into [`TransferError`] and
//! [`UploadError`]; the latter carries the retryable/permanent distinction the upload
//! coordinator's backoff policy keys on.

use crate::types::{JobId, JobState};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for torrent-drive operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for torrent-drive
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "upload.chunk_size")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Source locator is not a usable magnet URI
    #[error("invalid source: {0}")]
    InvalidSource(String),

    /// Caller misuse of a job operation
    #[error("job error: {0}")]
    Job(#[from] JobError),

    /// Metadata could not be resolved for a job
    #[error("metadata unavailable for job {id}: {reason}")]
    MetadataUnavailable {
        /// Job whose metadata could not be resolved
        id: JobId,
        /// Why resolution failed
        reason: String,
    },

    /// Transfer adapter error
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Upload adapter error
    #[error("upload error: {0}")]
    Upload(#[from] UploadError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Shutdown in progress - not accepting new jobs
    #[error("shutdown in progress: not accepting new jobs")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// A stored row could not be decoded into a job
    #[error("invalid row: {0}")]
    InvalidRow(String),
}

/// Errors caused by calling a job operation at the wrong time or with bad input
#[derive(Debug, Error)]
pub enum JobError {
    /// Job does not exist (or was deleted)
    #[error("job not found: {0}")]
    NotFound(JobId),

    /// Operation not valid in the job's current state
    #[error("cannot {operation} job {id} in state {current_state}")]
    InvalidState {
        /// Job the operation was attempted on
        id: JobId,
        /// The operation being attempted (e.g., "pause")
        operation: String,
        /// The job's state at the time of the call
        current_state: JobState,
    },

    /// File selection was empty or referenced files the job does not have
    #[error("invalid selection for job {id}: {reason}")]
    InvalidSelection {
        /// Job the selection was made for
        id: JobId,
        /// What was wrong with the selection
        reason: String,
    },
}

/// Errors reported by a [`TransferAdapter`](crate::adapters::TransferAdapter)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransferError {
    /// Transfer engine could not be reached or is not ready
    #[error("transfer engine unavailable: {0}")]
    Unavailable(String),

    /// Engine has no transfer for this job
    #[error("no transfer for job {0}")]
    UnknownJob(JobId),

    /// Engine refused the request (bad locator, no peers with metadata, ...)
    #[error("transfer rejected: {0}")]
    Rejected(String),

    /// Adapter call exceeded its bounded wait
    #[error("transfer call timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors reported by an [`UploadAdapter`](crate::adapters::UploadAdapter)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UploadError {
    /// Transient failure (network error, rate limit, 5xx); the chunk may be resent
    #[error("retryable upload failure: {0}")]
    Retryable(String),

    /// Non-retryable failure (invalid credentials, quota exceeded, ...)
    #[error("permanent upload failure: {0}")]
    Permanent(String),

    /// Adapter call exceeded its bounded wait
    #[error("upload call timed out after {0:?}")]
    Timeout(Duration),
}

impl Error {
    /// Shorthand for [`JobError::InvalidState`]
    pub fn invalid_state(id: JobId, operation: impl Into<String>, current_state: JobState) -> Self {
        Error::Job(JobError::InvalidState {
            id,
            operation: operation.into(),
            current_state,
        })
    }

    /// Shorthand for [`JobError::InvalidSelection`]
    pub fn invalid_selection(id: JobId, reason: impl Into<String>) -> Self {
        Error::Job(JobError::InvalidSelection {
            id,
            reason: reason.into(),
        })
    }

    /// Shorthand for [`JobError::NotFound`]
    pub fn not_found(id: JobId) -> Self {
        Error::Job(JobError::NotFound(id))
    }

    /// True for errors caused by the caller rather than by an adapter or storage
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidSource(_) | Error::Job(_) | Error::ShuttingDown
        )
    }
}
