//! Job store
//!
//! The orchestrator persists every job through the [`JobStore`] trait. Two implementations
//! are provided:
//! - [`Database`]: SQLite, the durable store used for restart recovery
//! - [`MemoryJobStore`]: in-process map for embedding and tests
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`jobs`] - Job CRUD

use crate::error::Result;
use crate::types::{Job, JobId, JobState};
use async_trait::async_trait;
use sqlx::{FromRow, sqlite::SqlitePool};

mod jobs;
mod memory;
mod migrations;

pub use memory::MemoryJobStore;

/// Durable record of every job
///
/// Implementations must keep `list_jobs` in submission order, which restart recovery
/// relies on to preserve FIFO admission.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job
    async fn insert_job(&self, job: &Job) -> Result<()>;

    /// Fetch a job by id
    async fn get_job(&self, id: JobId) -> Result<Option<Job>>;

    /// Overwrite an existing job; returns `false` (and stores nothing) if it does not exist
    async fn update_job(&self, job: &Job) -> Result<bool>;

    /// Remove a job; returns `false` if it did not exist
    async fn delete_job(&self, id: JobId) -> Result<bool>;

    /// All jobs, oldest first
    async fn list_jobs(&self) -> Result<Vec<Job>>;

    /// Jobs in one state, oldest first
    async fn list_jobs_by_state(&self, state: JobState) -> Result<Vec<Job>> {
        Ok(self
            .list_jobs()
            .await?
            .into_iter()
            .filter(|job| job.state == state)
            .collect())
    }
}

/// Job row from the `jobs` table
#[derive(Debug, Clone, FromRow)]
struct JobRow {
    id: String,
    source: String,
    name: Option<String>,
    info_hash: Option<String>,
    total_size: Option<i64>,
    selected: String,
    state: String,
    error_cause: Option<String>,
    error_message: Option<String>,
    error_retries: i64,
    remote_refs: String,
    created_at: i64,
    updated_at: i64,
}

/// File row from the `job_files` table
#[derive(Debug, Clone, FromRow)]
struct JobFileRow {
    job_id: String,
    file_index: i64,
    path: String,
    size_bytes: i64,
}

/// Database handle for torrent-drive
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
