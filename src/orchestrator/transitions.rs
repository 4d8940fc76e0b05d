//! State changes: persisted first, then announced.

use super::Orchestrator;
use crate::adapters::TransferRequest;
use crate::download::TransferPlan;
use crate::error::{Error, Result};
use crate::progress::ProgressSnapshot;
use crate::types::{Epoch, Event, FailureCause, Job, JobFailure, JobId, JobState, Ticket};
use crate::upload::UploadPlan;
use crate::utils::job_download_dir;

impl Orchestrator {
    /// Load a job that must exist
    pub(crate) async fn load(&self, id: JobId) -> Result<Job> {
        self.get_job(id).await
    }

    /// Write a job back; a missing record is never re-created
    pub(crate) async fn persist(&self, job: &mut Job) -> Result<()> {
        job.updated_at = chrono::Utc::now();
        if !self.store.update_job(job).await? {
            return Err(Error::not_found(job.id));
        }
        Ok(())
    }

    /// Move a job along the lifecycle graph, persist it and announce the change
    pub(crate) async fn advance(&self, job: &mut Job, next: JobState) -> Result<()> {
        let from = job.transition(next)?;
        self.persist(job).await?;
        tracing::info!(job_id = %job.id, from = %from, to = %next, "job state changed");
        self.emit_event(Event::StateChanged {
            id: job.id,
            from,
            to: next,
        });
        Ok(())
    }

    /// Record a failure and move to `error`; already-finished jobs are left alone
    pub(crate) async fn fail(&self, job: &mut Job, failure: JobFailure) -> Result<()> {
        if job.state.is_terminal() {
            tracing::debug!(
                job_id = %job.id,
                state = %job.state,
                cause = %failure.cause,
                "ignoring failure for finished job"
            );
            return Ok(());
        }

        tracing::warn!(
            job_id = %job.id,
            cause = %failure.cause,
            retries = failure.retries,
            error = %failure.message,
            "job failed"
        );
        job.failure = Some(failure.clone());
        self.advance(job, JobState::Error).await?;
        self.emit_event(Event::Failed {
            id: job.id,
            cause: failure.cause,
            message: failure.message,
        });
        self.bus.publish(ProgressSnapshot::idle(job));
        Ok(())
    }

    pub(crate) fn transfer_plan(&self, job: &Job, epoch: Epoch, start_paused: bool) -> TransferPlan {
        TransferPlan {
            ticket: Ticket {
                job_id: job.id,
                epoch,
            },
            request: TransferRequest {
                job_id: job.id,
                source: job.source.clone(),
                selected: job.selected.iter().copied().collect(),
                save_dir: job_download_dir(&self.config.download.download_dir, job.id),
            },
            selected_bytes: job.selected_bytes(),
            start_paused,
        }
    }

    /// Queue an `uploading` job's files; a plan that cannot be laid out fails the job
    pub(crate) async fn enqueue_upload(&self, job: &mut Job, epoch: Epoch) -> Result<()> {
        let plan = UploadPlan::for_job(
            Ticket {
                job_id: job.id,
                epoch,
            },
            job,
            &self.config.download.download_dir,
            self.config.upload.remote_folder.as_deref(),
        );
        match plan {
            Ok(plan) => {
                self.uploads.enqueue(plan);
                Ok(())
            }
            Err(reason) => {
                self.fail(job, JobFailure::new(FailureCause::UploadFailed, reason, 0))
                    .await
            }
        }
    }
}
