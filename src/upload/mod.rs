//! Upload coordinator
//!
//! Mirrors the download coordinator's admission policy with its own slot count. Each
//! admitted job uploads its selected files one after another, in index order, through
//! resumable sessions sent in fixed-size chunks. Transient failures are retried per chunk
//! with exponential backoff; permanent failures fail the job at once.

mod session;
mod worker;

pub use crate::download::SlotState;
pub use session::UploadSession;

use crate::adapters::UploadAdapter;
use crate::config::{RetryConfig, UploadConfig};
use crate::progress::{ProgressBus, ProgressSnapshot};
use crate::types::{Epoch, Job, JobId, Outcome, Ticket};
use crate::utils::{escapes_root, job_download_dir, lock, remote_path};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One file of an upload plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    /// Metadata index
    pub index: usize,
    /// Where the transfer left the file
    pub local_path: PathBuf,
    /// Remote destination path
    pub destination: String,
    /// Size in bytes
    pub size: u64,
}

/// Immutable projection of a job handed to the upload coordinator
#[derive(Debug, Clone)]
pub struct UploadPlan {
    /// Job identity and epoch
    pub ticket: Ticket,
    /// Files to upload, in index order
    pub files: Vec<UploadFile>,
}

impl UploadPlan {
    /// Plan the selected files of `job`: local copies under `download_dir/<job id>`,
    /// destinations under `[remote_folder/]<job name>`
    ///
    /// Fails if a file path would leave either of those roots.
    pub fn for_job(
        ticket: Ticket,
        job: &Job,
        download_dir: &Path,
        remote_folder: Option<&str>,
    ) -> Result<Self, String> {
        let job_dir = job_download_dir(download_dir, job.id);
        let job_name = job.name.clone().unwrap_or_else(|| job.id.to_string());
        let files = job
            .selected_files()
            .into_iter()
            .map(|file| {
                let unsafe_path = || format!("file {} has unsafe path '{}'", file.index, file.path);
                if escapes_root(&file.path) {
                    return Err(unsafe_path());
                }
                let destination =
                    remote_path(remote_folder, &job_name, &file.path).ok_or_else(unsafe_path)?;
                Ok(UploadFile {
                    index: file.index,
                    local_path: job_dir.join(&file.path),
                    destination,
                    size: file.size,
                })
            })
            .collect::<Result<Vec<_>, String>>()?;
        Ok(Self { ticket, files })
    }

    /// Sum of the file sizes
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

/// Bounded pool of concurrent uploads
#[derive(Clone)]
pub struct UploadCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    adapter: Arc<dyn UploadAdapter>,
    bus: ProgressBus,
    outcomes: mpsc::UnboundedSender<Outcome>,
    config: UploadConfig,
    retry: RetryConfig,
    slots: Mutex<Slots>,
}

#[derive(Default)]
struct Slots {
    active: HashMap<JobId, ActiveUpload>,
    waiting: VecDeque<UploadPlan>,
    closed: bool,
}

struct ActiveUpload {
    epoch: Epoch,
    cancel: CancellationToken,
    purge: Arc<AtomicBool>,
}

/// Cancellation handles given to a worker
#[derive(Clone)]
struct Abort {
    cancel: CancellationToken,
    purge: Arc<AtomicBool>,
}

impl Abort {
    fn purge_requested(&self) -> bool {
        self.purge.load(Ordering::SeqCst)
    }
}

impl UploadCoordinator {
    /// Create a coordinator reporting outcomes on `outcomes`
    pub fn new(
        adapter: Arc<dyn UploadAdapter>,
        bus: ProgressBus,
        outcomes: mpsc::UnboundedSender<Outcome>,
        config: UploadConfig,
        retry: RetryConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                adapter,
                bus,
                outcomes,
                config,
                retry,
                slots: Mutex::new(Slots::default()),
            }),
        }
    }

    /// Start the upload now if a slot is free, otherwise queue it
    pub fn enqueue(&self, plan: UploadPlan) {
        let job_id = plan.ticket.job_id;
        {
            let mut slots = lock(&self.inner.slots);
            if slots.closed {
                tracing::debug!(job_id = %job_id, "coordinator closed, ignoring upload");
                return;
            }
            if slots.active.contains_key(&job_id)
                || slots.waiting.iter().any(|p| p.ticket.job_id == job_id)
            {
                tracing::warn!(job_id = %job_id, "upload already enqueued");
                return;
            }
            slots.waiting.push_back(plan);
            tracing::debug!(
                job_id = %job_id,
                waiting = slots.waiting.len(),
                active = slots.active.len(),
                "upload queued"
            );
        }
        self.pump();
    }

    /// Abort a job's upload
    ///
    /// A waiting job leaves the queue. An active job's in-flight chunk is abandoned and its
    /// session dropped; with `purge` the worker also discards the partial remote session.
    pub fn cancel(&self, job_id: JobId, purge: bool) -> SlotState {
        let state = {
            let mut slots = lock(&self.inner.slots);
            if let Some(active) = slots.active.remove(&job_id) {
                active.purge.store(purge, Ordering::SeqCst);
                active.cancel.cancel();
                SlotState::Active
            } else if let Some(pos) = slots.waiting.iter().position(|p| p.ticket.job_id == job_id)
            {
                slots.waiting.remove(pos);
                SlotState::Waiting
            } else {
                SlotState::Untracked
            }
        };
        if state == SlotState::Active {
            tracing::info!(job_id = %job_id, purge, "upload cancelled");
            self.pump();
        }
        state
    }

    /// Cancel every worker without purging and refuse further uploads
    pub fn shutdown(&self) {
        let mut slots = lock(&self.inner.slots);
        slots.closed = true;
        for (_, active) in slots.active.drain() {
            active.cancel.cancel();
        }
        slots.waiting.clear();
    }

    /// Jobs currently uploading
    pub fn active_count(&self) -> usize {
        lock(&self.inner.slots).active.len()
    }

    /// Jobs waiting for a slot, in admission order
    pub fn waiting(&self) -> Vec<JobId> {
        lock(&self.inner.slots)
            .waiting
            .iter()
            .map(|p| p.ticket.job_id)
            .collect()
    }

    /// Where a job currently sits
    pub fn slot_state(&self, job_id: JobId) -> SlotState {
        let slots = lock(&self.inner.slots);
        if slots.active.contains_key(&job_id) {
            SlotState::Active
        } else if slots.waiting.iter().any(|p| p.ticket.job_id == job_id) {
            SlotState::Waiting
        } else {
            SlotState::Untracked
        }
    }

    fn pump(&self) {
        let mut admitted = Vec::new();
        {
            let mut slots = lock(&self.inner.slots);
            while !slots.closed && slots.active.len() < self.inner.config.max_concurrent_uploads {
                let Some(plan) = slots.waiting.pop_front() else {
                    break;
                };
                let abort = Abort {
                    cancel: CancellationToken::new(),
                    purge: Arc::new(AtomicBool::new(false)),
                };
                slots.active.insert(
                    plan.ticket.job_id,
                    ActiveUpload {
                        epoch: plan.ticket.epoch,
                        cancel: abort.cancel.clone(),
                        purge: abort.purge.clone(),
                    },
                );
                admitted.push((plan, abort));
            }
        }

        for (plan, abort) in admitted {
            tracing::info!(
                job_id = %plan.ticket.job_id,
                files = plan.files.len(),
                bytes = plan.total_bytes(),
                "upload admitted"
            );
            self.spawn_worker(plan, abort);
        }
    }

    fn release(&self, ticket: Ticket) {
        let released = {
            let mut slots = lock(&self.inner.slots);
            match slots.active.get(&ticket.job_id) {
                Some(active) if active.epoch == ticket.epoch => {
                    slots.active.remove(&ticket.job_id);
                    true
                }
                _ => false,
            }
        };
        if released {
            self.pump();
        }
    }

    /// Publish only while the ticket still owns its slot
    fn publish_if_active(&self, ticket: Ticket, snapshot: ProgressSnapshot) {
        let slots = lock(&self.inner.slots);
        if slots
            .active
            .get(&ticket.job_id)
            .is_some_and(|active| active.epoch == ticket.epoch)
        {
            self.inner.bus.publish(snapshot);
        }
    }

    fn report(&self, outcome: Outcome) {
        if self.inner.outcomes.send(outcome).is_err() {
            tracing::debug!("outcome receiver gone, dropping upload outcome");
        }
    }
}
