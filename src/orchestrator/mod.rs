//! Job orchestration façade split into focused submodules.
//!
//! The `Orchestrator` struct and its methods are organized by domain:
//! - [`control`] - Caller operations (submit, fetch metadata, start, pause, resume, delete)
//! - [`callbacks`] - Coordinator outcomes applied to jobs
//! - [`lifecycle`] - Restart recovery and shutdown
//! - [`registry`] - Per-job locks and epochs
//!
//! The orchestrator is the only writer of the job store. Every mutation of a job happens
//! while holding that job's lock, and no lock is held across a transfer or upload adapter
//! call.

mod callbacks;
mod control;
mod lifecycle;
mod registry;
mod transitions;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::adapters::{TransferAdapter, UploadAdapter};
use crate::config::Config;
use crate::db::{Database, JobStore};
use crate::download::DownloadCoordinator;
use crate::error::{Error, Result};
use crate::progress::{ProgressBus, ProgressSnapshot, ProgressSubscription};
use crate::types::{Event, Job, JobId, JobState};
use crate::upload::UploadCoordinator;
use registry::JobRegistry;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

/// Capacity of the lifecycle event channel
const EVENT_BUFFER: usize = 1000;

/// Main orchestrator instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct Orchestrator {
    /// Job persistence
    pub(crate) store: Arc<dyn JobStore>,
    /// Peer-to-peer transfer engine
    pub(crate) transfer: Arc<dyn TransferAdapter>,
    /// Progress fan-out
    pub(crate) bus: ProgressBus,
    /// Lifecycle event broadcast channel sender
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Per-job locks and epochs
    pub(crate) registry: JobRegistry,
    /// Bounded transfer pool
    pub(crate) downloads: DownloadCoordinator,
    /// Bounded upload pool
    pub(crate) uploads: UploadCoordinator,
    /// Whether new submissions are accepted (cleared by shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Stops the outcome loop
    pub(crate) shutdown_token: CancellationToken,
}

impl Orchestrator {
    /// Create an orchestrator over an existing store
    ///
    /// This:
    /// - Validates the configuration
    /// - Creates the download directory
    /// - Starts the coordinators and the outcome loop
    /// - Restores unfinished jobs from the store
    pub async fn new(
        config: Config,
        store: Arc<dyn JobStore>,
        transfer: Arc<dyn TransferAdapter>,
        upload: Arc<dyn UploadAdapter>,
    ) -> Result<Self> {
        config.validate()?;

        tokio::fs::create_dir_all(&config.download.download_dir)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create download directory '{}': {}",
                        config.download.download_dir.display(),
                        e
                    ),
                ))
            })?;

        let (event_tx, _rx) = broadcast::channel(EVENT_BUFFER);
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let bus = ProgressBus::new();

        let downloads = DownloadCoordinator::new(
            transfer.clone(),
            bus.clone(),
            outcome_tx.clone(),
            config.download.clone(),
        );
        let uploads = UploadCoordinator::new(
            upload.clone(),
            bus.clone(),
            outcome_tx,
            config.upload.clone(),
            config.retry.clone(),
        );

        tracing::info!(
            transfer_adapter = transfer.name(),
            upload_adapter = upload.name(),
            max_concurrent_downloads = config.download.max_concurrent_downloads,
            max_concurrent_uploads = config.upload.max_concurrent_uploads,
            "Orchestrator initialized"
        );

        let orchestrator = Self {
            store,
            transfer,
            bus,
            event_tx,
            config: Arc::new(config),
            registry: JobRegistry::new(),
            downloads,
            uploads,
            accepting_new: Arc::new(AtomicBool::new(true)),
            shutdown_token: CancellationToken::new(),
        };

        orchestrator.spawn_outcome_loop(outcome_rx);
        orchestrator.restore().await?;

        Ok(orchestrator)
    }

    /// Create an orchestrator backed by SQLite at `config.persistence.database_path`
    pub async fn open(
        config: Config,
        transfer: Arc<dyn TransferAdapter>,
        upload: Arc<dyn UploadAdapter>,
    ) -> Result<Self> {
        let db = Database::new(&config.persistence.database_path).await?;
        Self::new(config, Arc::new(db), transfer, upload).await
    }

    /// Subscribe to lifecycle events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all events independently.
    /// A subscriber that falls behind by more than 1000 events receives
    /// `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Lifecycle events as a stream; lagged gaps are logged and skipped
    pub fn event_stream(&self) -> impl Stream<Item = Event> + Send + 'static {
        BroadcastStream::new(self.event_tx.subscribe()).filter_map(|result| match result {
            Ok(event) => Some(event),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event subscriber lagged");
                None
            }
        })
    }

    /// Subscribe to progress snapshots for every job
    ///
    /// No snapshots are replayed; use [`snapshot`](Self::snapshot) for the current view.
    pub fn subscribe_progress(&self) -> ProgressSubscription {
        self.bus.subscribe()
    }

    /// Point-in-time progress of one job
    ///
    /// Falls back to an idle snapshot built from the stored job when nothing has been
    /// sampled. The state always comes from the store.
    pub async fn snapshot(&self, id: JobId) -> Result<ProgressSnapshot> {
        let job = self.get_job(id).await?;
        let mut snapshot = self
            .bus
            .latest(id)
            .unwrap_or_else(|| ProgressSnapshot::idle(&job));
        snapshot.state = job.state;
        if snapshot.last_error.is_none() {
            snapshot.last_error = job.failure.map(|f| f.message);
        }
        Ok(snapshot)
    }

    /// Fetch one job
    pub async fn get_job(&self, id: JobId) -> Result<Job> {
        self.store
            .get_job(id)
            .await?
            .ok_or_else(|| Error::not_found(id))
    }

    /// All jobs in submission order
    pub async fn list_jobs(&self) -> Result<Vec<Job>> {
        self.store.list_jobs().await
    }

    /// Jobs currently in `state`, in submission order
    pub async fn list_jobs_by_state(&self, state: JobState) -> Result<Vec<Job>> {
        self.store.list_jobs_by_state(state).await
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Emit an event to all subscribers; dropped silently when nobody listens
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}
