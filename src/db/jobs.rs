//! Job CRUD operations.

use crate::error::DatabaseError;
use crate::types::{FailureCause, FileEntry, Job, JobFailure, JobId, JobState};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{Sqlite, Transaction};
use std::collections::HashMap;

use super::{Database, JobFileRow, JobRow, JobStore};

const JOB_COLUMNS: &str = r#"
    id, source, name, info_hash, total_size, selected, state,
    error_cause, error_message, error_retries, remote_refs,
    created_at, updated_at
"#;

fn query_failed(context: &str, e: impl std::fmt::Display) -> Error {
    Error::Database(DatabaseError::QueryFailed(format!("{context}: {e}")))
}

fn invalid_row(message: String) -> Error {
    Error::Database(DatabaseError::InvalidRow(message))
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl JobRow {
    fn into_job(self, files: Vec<FileEntry>) -> Result<Job> {
        let id: JobId = self
            .id
            .parse()
            .map_err(|e| invalid_row(format!("bad job id '{}': {}", self.id, e)))?;
        let state = JobState::parse(&self.state)
            .ok_or_else(|| invalid_row(format!("job {id} has unknown state '{}'", self.state)))?;
        let failure = match self.error_cause {
            Some(cause) => Some(JobFailure {
                cause: FailureCause::parse(&cause).ok_or_else(|| {
                    invalid_row(format!("job {id} has unknown failure cause '{cause}'"))
                })?,
                message: self.error_message.unwrap_or_default(),
                retries: u32::try_from(self.error_retries).unwrap_or_default(),
            }),
            None => None,
        };

        Ok(Job {
            id,
            source: self.source,
            name: self.name,
            info_hash: self.info_hash,
            total_size: self.total_size.map(|s| u64::try_from(s).unwrap_or_default()),
            files,
            selected: serde_json::from_str(&self.selected)?,
            state,
            failure,
            remote_refs: serde_json::from_str(&self.remote_refs)?,
            created_at: from_millis(self.created_at),
            updated_at: from_millis(self.updated_at),
        })
    }
}

impl From<JobFileRow> for FileEntry {
    fn from(row: JobFileRow) -> Self {
        FileEntry {
            index: usize::try_from(row.file_index).unwrap_or_default(),
            path: row.path,
            size: u64::try_from(row.size_bytes).unwrap_or_default(),
        }
    }
}

impl Database {
    /// Insert a new job record together with its file list
    pub async fn insert_job(&self, job: &Job) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_failed("Failed to begin transaction", e))?;

        sqlx::query(&format!(
            "INSERT INTO jobs ({JOB_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(job.id.to_string())
        .bind(&job.source)
        .bind(&job.name)
        .bind(&job.info_hash)
        .bind(job.total_size.map(to_i64))
        .bind(serde_json::to_string(&job.selected)?)
        .bind(job.state.as_str())
        .bind(job.failure.as_ref().map(|f| f.cause.as_str()))
        .bind(job.failure.as_ref().map(|f| f.message.clone()))
        .bind(job.failure.as_ref().map_or(0, |f| i64::from(f.retries)))
        .bind(serde_json::to_string(&job.remote_refs)?)
        .bind(job.created_at.timestamp_millis())
        .bind(job.updated_at.timestamp_millis())
        .execute(&mut *tx)
        .await
        .map_err(|e| query_failed("Failed to insert job", e))?;

        Self::write_files(&mut tx, job).await?;

        tx.commit()
            .await
            .map_err(|e| query_failed("Failed to commit job insert", e))?;
        Ok(())
    }

    /// Get a job by ID
    pub async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| query_failed("Failed to get job", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let files = sqlx::query_as::<_, JobFileRow>(
            "SELECT job_id, file_index, path, size_bytes FROM job_files WHERE job_id = ? ORDER BY file_index",
        )
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to get job files", e))?
        .into_iter()
        .map(FileEntry::from)
        .collect();

        row.into_job(files).map(Some)
    }

    /// Overwrite a job record; returns false if no such job exists
    pub async fn update_job(&self, job: &Job) -> Result<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_failed("Failed to begin transaction", e))?;

        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                name = ?, info_hash = ?, total_size = ?, selected = ?, state = ?,
                error_cause = ?, error_message = ?, error_retries = ?, remote_refs = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&job.name)
        .bind(&job.info_hash)
        .bind(job.total_size.map(to_i64))
        .bind(serde_json::to_string(&job.selected)?)
        .bind(job.state.as_str())
        .bind(job.failure.as_ref().map(|f| f.cause.as_str()))
        .bind(job.failure.as_ref().map(|f| f.message.clone()))
        .bind(job.failure.as_ref().map_or(0, |f| i64::from(f.retries)))
        .bind(serde_json::to_string(&job.remote_refs)?)
        .bind(job.updated_at.timestamp_millis())
        .bind(job.id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| query_failed("Failed to update job", e))?;

        if result.rows_affected() == 0 {
            // Nothing to roll back, the transaction is simply dropped
            return Ok(false);
        }

        // The file list is written once, when metadata arrives
        let stored_files: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM job_files WHERE job_id = ?")
                .bind(job.id.to_string())
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| query_failed("Failed to count job files", e))?;
        if stored_files == 0 {
            Self::write_files(&mut tx, job).await?;
        }

        tx.commit()
            .await
            .map_err(|e| query_failed("Failed to commit job update", e))?;
        Ok(true)
    }

    /// Delete a job (its files cascade)
    pub async fn delete_job(&self, id: JobId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| query_failed("Failed to delete job", e))?;
        Ok(result.rows_affected() > 0)
    }

    /// List all jobs in submission order
    pub async fn list_jobs(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at ASC, rowid ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to list jobs", e))?;

        self.attach_files(rows).await
    }

    /// List jobs in one state, in submission order
    pub async fn list_jobs_by_state(&self, state: JobState) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE state = ? ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to list jobs by state", e))?;

        self.attach_files(rows).await
    }

    async fn attach_files(&self, rows: Vec<JobRow>) -> Result<Vec<Job>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let mut files: HashMap<String, Vec<FileEntry>> = HashMap::new();
        let file_rows = sqlx::query_as::<_, JobFileRow>(
            "SELECT job_id, file_index, path, size_bytes FROM job_files ORDER BY job_id, file_index",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to list job files", e))?;
        for row in file_rows {
            files.entry(row.job_id.clone()).or_default().push(row.into());
        }

        rows.into_iter()
            .map(|row| {
                let job_files = files.remove(&row.id).unwrap_or_default();
                row.into_job(job_files)
            })
            .collect()
    }

    async fn write_files(tx: &mut Transaction<'_, Sqlite>, job: &Job) -> Result<()> {
        for file in &job.files {
            sqlx::query(
                "INSERT INTO job_files (job_id, file_index, path, size_bytes) VALUES (?, ?, ?, ?)",
            )
            .bind(job.id.to_string())
            .bind(i64::try_from(file.index).unwrap_or(i64::MAX))
            .bind(&file.path)
            .bind(to_i64(file.size))
            .execute(&mut **tx)
            .await
            .map_err(|e| query_failed("Failed to insert job file", e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for Database {
    async fn insert_job(&self, job: &Job) -> Result<()> {
        Database::insert_job(self, job).await
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        Database::get_job(self, id).await
    }

    async fn update_job(&self, job: &Job) -> Result<bool> {
        Database::update_job(self, job).await
    }

    async fn delete_job(&self, id: JobId) -> Result<bool> {
        Database::delete_job(self, id).await
    }

    async fn list_jobs(&self) -> Result<Vec<Job>> {
        Database::list_jobs(self).await
    }

    async fn list_jobs_by_state(&self, state: JobState) -> Result<Vec<Job>> {
        Database::list_jobs_by_state(self, state).await
    }
}
