//! Startup recovery and shutdown coordination.

use super::Orchestrator;
use crate::error::Result;
use crate::types::{Event, FailureCause, JobFailure, JobState, Ticket};
use std::sync::atomic::Ordering;

impl Orchestrator {
    /// Pick up jobs left unfinished by a previous run, oldest first
    ///
    /// - `metadata_pending`: resolution is retried in the background
    /// - `downloading` / `paused`: re-admitted to the download pool (paused jobs start held)
    /// - `download_complete`: moved to `uploading` and enqueued
    /// - `uploading`: enqueued again from the first byte, as sessions are not persisted
    pub(crate) async fn restore(&self) -> Result<()> {
        let jobs = self.store.list_jobs().await?;
        let mut resumed = 0usize;

        for job in jobs {
            let id = job.id;
            let epoch = self.registry.register(id);
            let ticket = Ticket { job_id: id, epoch };
            let Some(_cell) = self.registry.lock(id).await else {
                continue;
            };
            let mut job = job;

            match job.state {
                JobState::MetadataPending => {
                    let orchestrator = self.clone();
                    let source = job.source.clone();
                    tokio::spawn(async move {
                        if let Err(e) = orchestrator.resolve_metadata(ticket, &source).await {
                            tracing::warn!(job_id = %id, error = %e, "metadata retry after restart failed");
                        }
                    });
                }
                JobState::Downloading | JobState::Paused if job.selected.is_empty() => {
                    self.fail(
                        &mut job,
                        JobFailure::new(
                            FailureCause::TransferFailed,
                            "restored without a file selection",
                            0,
                        ),
                    )
                    .await?;
                    continue;
                }
                JobState::Downloading | JobState::Paused => {
                    let paused = job.state == JobState::Paused;
                    self.downloads.admit(self.transfer_plan(&job, epoch, paused));
                }
                JobState::DownloadComplete => {
                    self.advance(&mut job, JobState::Uploading).await?;
                    self.enqueue_upload(&mut job, epoch).await?;
                }
                JobState::Uploading => {
                    self.enqueue_upload(&mut job, epoch).await?;
                }
                JobState::Queued
                | JobState::MetadataReady
                | JobState::Uploaded
                | JobState::Error => continue,
            }

            tracing::info!(job_id = %id, state = %job.state, "job restored");
            resumed += 1;
        }

        tracing::info!(
            registered = self.registry.len(),
            resumed,
            "restored jobs from store"
        );
        Ok(())
    }

    /// Stop all work and refuse new submissions
    ///
    /// Workers are cancelled without purging anything. Jobs keep their persisted state, so
    /// the next [`Orchestrator::new`] over the same store resumes them.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.accepting_new.store(false, Ordering::SeqCst);
        tracing::info!("Stopped accepting new jobs");

        self.downloads.shutdown();
        self.uploads.shutdown();
        self.shutdown_token.cancel();
        tracing::info!("Cancelled active transfers and uploads");

        self.emit_event(Event::Shutdown);
        tracing::info!("Graceful shutdown complete");
        Ok(())
    }
}
