//! In-process job store.

use super::JobStore;
use crate::error::Result;
use crate::types::{Job, JobId};
use crate::utils::lock;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Job store backed by a map; contents are lost when the process exits
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    next_seq: u64,
    // Insertion sequence keeps list order stable for jobs created in the same instant
    jobs: HashMap<JobId, (u64, Job)>,
}

impl MemoryJobStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored jobs
    pub fn len(&self) -> usize {
        lock(&self.inner).jobs.len()
    }

    /// Whether the store holds no jobs
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert_job(&self, job: &Job) -> Result<()> {
        let mut inner = lock(&self.inner);
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.jobs.insert(job.id, (seq, job.clone()));
        Ok(())
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        Ok(lock(&self.inner).jobs.get(&id).map(|(_, job)| job.clone()))
    }

    async fn update_job(&self, job: &Job) -> Result<bool> {
        let mut inner = lock(&self.inner);
        match inner.jobs.get_mut(&job.id) {
            Some((_, stored)) => {
                *stored = job.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_job(&self, id: JobId) -> Result<bool> {
        Ok(lock(&self.inner).jobs.remove(&id).is_some())
    }

    async fn list_jobs(&self) -> Result<Vec<Job>> {
        let inner = lock(&self.inner);
        let mut jobs: Vec<&(u64, Job)> = inner.jobs.values().collect();
        jobs.sort_by_key(|(seq, job)| (job.created_at, *seq));
        Ok(jobs.into_iter().map(|(_, job)| job.clone()).collect())
    }
}
