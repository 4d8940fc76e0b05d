//! Coordinator outcomes applied to jobs.

use super::Orchestrator;
use crate::error::Result;
use crate::progress::ProgressSnapshot;
use crate::types::{Event, JobFailure, JobId, JobState, Outcome, RemoteRef, Ticket};
use crate::utils::job_download_dir;
use tokio::sync::mpsc;

impl Orchestrator {
    /// Drain coordinator outcomes until shutdown, one task per outcome
    pub(super) fn spawn_outcome_loop(&self, mut outcomes: mpsc::UnboundedReceiver<Outcome>) {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            loop {
                let outcome = tokio::select! {
                    _ = orchestrator.shutdown_token.cancelled() => break,
                    outcome = outcomes.recv() => match outcome {
                        Some(outcome) => outcome,
                        None => break,
                    },
                };
                let handler = orchestrator.clone();
                tokio::spawn(async move { handler.handle_outcome(outcome).await });
            }
            tracing::debug!("outcome loop stopped");
        });
    }

    pub(crate) async fn handle_outcome(&self, outcome: Outcome) {
        let ticket = outcome.ticket();
        let result = match outcome {
            Outcome::DownloadComplete { ticket } => self.on_download_complete(ticket).await,
            Outcome::UploadComplete { ticket, refs } => self.on_upload_complete(ticket, refs).await,
            Outcome::Failed { ticket, failure } => self.on_failure(ticket, failure).await,
        };
        if let Err(e) = result {
            tracing::warn!(job_id = %ticket.job_id, error = %e, "failed to apply coordinator outcome");
        }
    }

    /// `downloading → download_complete → uploading`, then hand off to the upload pool
    pub(crate) async fn on_download_complete(&self, ticket: Ticket) -> Result<()> {
        let id = ticket.job_id;
        let Some(_cell) = self.registry.lock_ticket(ticket).await else {
            tracing::debug!(job_id = %id, "ignoring stale download completion");
            return Ok(());
        };
        let Some(mut job) = self.store.get_job(id).await? else {
            return Ok(());
        };

        match job.state {
            JobState::Downloading => {}
            // A pause that raced the final sample
            JobState::Paused => self.advance(&mut job, JobState::Downloading).await?,
            state => {
                tracing::debug!(job_id = %id, state = %state, "ignoring download completion");
                return Ok(());
            }
        }

        self.advance(&mut job, JobState::DownloadComplete).await?;
        self.advance(&mut job, JobState::Uploading).await?;
        self.enqueue_upload(&mut job, ticket.epoch).await
    }

    /// `uploading → uploaded`, recording where each file landed
    pub(crate) async fn on_upload_complete(&self, ticket: Ticket, refs: Vec<RemoteRef>) -> Result<()> {
        let id = ticket.job_id;
        let cleanup = {
            let Some(_cell) = self.registry.lock_ticket(ticket).await else {
                tracing::debug!(job_id = %id, "ignoring stale upload completion");
                return Ok(());
            };
            let Some(mut job) = self.store.get_job(id).await? else {
                return Ok(());
            };
            if job.state != JobState::Uploading {
                tracing::debug!(job_id = %id, state = %job.state, "ignoring upload completion");
                return Ok(());
            }

            job.remote_refs = refs;
            self.advance(&mut job, JobState::Uploaded).await?;
            tracing::info!(job_id = %id, files = job.remote_refs.len(), "job uploaded");
            self.emit_event(Event::Uploaded {
                id,
                refs: job.remote_refs.clone(),
            });
            self.bus.publish(ProgressSnapshot::idle(&job));
            self.config.upload.delete_local_after_upload
        };

        if cleanup {
            self.remove_local_copy(id).await;
        }
        Ok(())
    }

    /// `→ error`; ignored for jobs already failed or uploaded
    pub(crate) async fn on_failure(&self, ticket: Ticket, failure: JobFailure) -> Result<()> {
        let id = ticket.job_id;
        let Some(_cell) = self.registry.lock_ticket(ticket).await else {
            tracing::debug!(job_id = %id, cause = %failure.cause, "ignoring stale failure");
            return Ok(());
        };
        let Some(mut job) = self.store.get_job(id).await? else {
            return Ok(());
        };
        self.fail(&mut job, failure).await
    }

    /// Stop seeding and delete the job's download directory
    async fn remove_local_copy(&self, id: JobId) {
        self.downloads.stop_transfer(id, true).await;
        let dir = job_download_dir(&self.config.download.download_dir, id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => tracing::info!(job_id = %id, path = %dir.display(), "local copy removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                job_id = %id,
                path = %dir.display(),
                error = %e,
                "failed to remove local copy"
            ),
        }
    }
}
