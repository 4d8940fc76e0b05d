//! Per-job serialization cells

use crate::types::{Epoch, JobId, Ticket};
use crate::utils::lock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// State guarded by a job's lock
#[derive(Debug)]
pub(crate) struct JobCell {
    /// Epoch issued when the job was registered
    pub(crate) epoch: Epoch,
    /// Set by delete while holding the lock; waiters must give up
    pub(crate) removed: bool,
}

/// Map of live jobs to their locks
///
/// Every mutation of a job happens while holding its cell. Coordinator outcomes carry the
/// epoch they were issued under and are dropped when the cell is gone or was re-issued.
#[derive(Clone, Default)]
pub(crate) struct JobRegistry {
    cells: Arc<Mutex<HashMap<JobId, Arc<AsyncMutex<JobCell>>>>>,
    next_epoch: Arc<AtomicU64>,
}

impl JobRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Create (or replace) the job's cell under a fresh epoch
    pub(crate) fn register(&self, id: JobId) -> Epoch {
        let epoch = self.next_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let cell = Arc::new(AsyncMutex::new(JobCell {
            epoch,
            removed: false,
        }));
        lock(&self.cells).insert(id, cell);
        epoch
    }

    pub(crate) fn remove(&self, id: JobId) {
        lock(&self.cells).remove(&id);
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.cells).len()
    }

    /// Lock a live job; `None` if it is unknown or was deleted while we waited
    pub(crate) async fn lock(&self, id: JobId) -> Option<OwnedMutexGuard<JobCell>> {
        let cell = lock(&self.cells).get(&id).cloned()?;
        let guard = cell.lock_owned().await;
        (!guard.removed).then_some(guard)
    }

    /// Lock a job only if `ticket` was issued under its current epoch
    pub(crate) async fn lock_ticket(&self, ticket: Ticket) -> Option<OwnedMutexGuard<JobCell>> {
        let guard = self.lock(ticket.job_id).await?;
        (guard.epoch == ticket.epoch).then_some(guard)
    }
}
