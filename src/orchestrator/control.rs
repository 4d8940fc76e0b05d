//! Caller-facing job control (submit/fetch/start/pause/resume/delete).

use super::Orchestrator;
use crate::download::SlotState;
use crate::error::{Error, Result, TransferError};
use crate::source::SourceLocator;
use crate::types::{Event, FailureCause, Job, JobFailure, JobId, JobState, Metadata, Ticket};
use std::collections::BTreeSet;
use std::sync::atomic::Ordering;

impl Orchestrator {
    /// Accept a magnet locator and create a `queued` job
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidSource`] if the locator is not a well-formed magnet URI
    /// - [`Error::ShuttingDown`] after [`shutdown`](Self::shutdown)
    pub async fn submit(&self, source: &str) -> Result<JobId> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let locator = SourceLocator::parse(source)?;
        let job = Job::new(JobId::new(), locator.as_str());
        self.store.insert_job(&job).await?;
        self.registry.register(job.id);

        tracing::info!(
            job_id = %job.id,
            info_hash = locator.info_hash(),
            name = locator.display_name().unwrap_or_default(),
            "job submitted"
        );
        self.emit_event(Event::Submitted {
            id: job.id,
            source: job.source,
        });
        Ok(job.id)
    }

    /// Resolve a job's metadata, or return it if it is already known
    ///
    /// A `queued` job moves to `metadata_pending` while the transfer adapter resolves the
    /// locator, then to `metadata_ready`. Repeated calls after that return the cached
    /// metadata without calling the adapter.
    ///
    /// # Errors
    ///
    /// - [`Error::MetadataUnavailable`] if resolution fails or times out; the job moves to
    ///   `error`
    /// - [`JobError::InvalidState`](crate::error::JobError::InvalidState) while a resolution
    ///   is already in flight, or for a job that never got metadata
    pub async fn fetch_metadata(&self, id: JobId) -> Result<Metadata> {
        let (ticket, source) = {
            let cell = self.registry.lock(id).await.ok_or_else(|| Error::not_found(id))?;
            let mut job = self.load(id).await?;

            if job.state != JobState::Queued {
                return match (job.state, job.metadata()) {
                    (JobState::MetadataPending, _) | (_, None) => {
                        Err(Error::invalid_state(id, "fetch metadata", job.state))
                    }
                    (_, Some(metadata)) => Ok(metadata),
                };
            }

            self.advance(&mut job, JobState::MetadataPending).await?;
            (
                Ticket {
                    job_id: id,
                    epoch: cell.epoch,
                },
                job.source,
            )
        };

        self.resolve_metadata(ticket, &source).await
    }

    /// Ask the adapter for metadata and apply the result to a `metadata_pending` job
    pub(crate) async fn resolve_metadata(&self, ticket: Ticket, source: &str) -> Result<Metadata> {
        let id = ticket.job_id;
        let limit = self.config.download.metadata_timeout;
        let resolved = tokio::time::timeout(limit, self.transfer.resolve_metadata(source))
            .await
            .unwrap_or(Err(TransferError::Timeout(limit)))
            .map_err(|e| e.to_string())
            .and_then(|metadata| match metadata.validate() {
                Ok(()) => Ok(metadata),
                Err(reason) => Err(format!("invalid metadata: {reason}")),
            });

        let Some(_cell) = self.registry.lock_ticket(ticket).await else {
            tracing::debug!(job_id = %id, "job removed during metadata resolution");
            return Err(Error::not_found(id));
        };
        let mut job = self.load(id).await?;
        if job.state != JobState::MetadataPending {
            return Err(Error::invalid_state(id, "apply metadata", job.state));
        }

        match resolved {
            Ok(metadata) => {
                job.apply_metadata(&metadata);
                self.advance(&mut job, JobState::MetadataReady).await?;
                tracing::info!(
                    job_id = %id,
                    name = %metadata.name,
                    files = metadata.files.len(),
                    total_size = metadata.total_size,
                    "metadata resolved"
                );
                self.emit_event(Event::MetadataResolved {
                    id,
                    name: metadata.name.clone(),
                    total_size: metadata.total_size,
                    file_count: metadata.files.len(),
                });
                Ok(metadata)
            }
            Err(reason) => {
                self.fail(
                    &mut job,
                    JobFailure::new(FailureCause::MetadataUnavailable, reason.clone(), 0),
                )
                .await?;
                Err(Error::MetadataUnavailable { id, reason })
            }
        }
    }

    /// Record the file selection and admit the job to the download pool
    ///
    /// Duplicate indices are ignored.
    ///
    /// # Errors
    ///
    /// - [`JobError::InvalidState`](crate::error::JobError::InvalidState) unless the job is
    ///   `metadata_ready`
    /// - [`JobError::InvalidSelection`](crate::error::JobError::InvalidSelection) for an
    ///   empty selection or an index past the file list
    pub async fn start_download(&self, id: JobId, indices: &[usize]) -> Result<()> {
        let cell = self.registry.lock(id).await.ok_or_else(|| Error::not_found(id))?;
        let mut job = self.load(id).await?;

        if job.state != JobState::MetadataReady {
            return Err(Error::invalid_state(id, "start download", job.state));
        }
        let selected: BTreeSet<usize> = indices.iter().copied().collect();
        if selected.is_empty() {
            return Err(Error::invalid_selection(id, "no files selected"));
        }
        if let Some(index) = selected.iter().find(|&&i| i >= job.files.len()) {
            return Err(Error::invalid_selection(
                id,
                format!("file index {index} out of range ({} files)", job.files.len()),
            ));
        }

        job.selected = selected;
        self.advance(&mut job, JobState::Downloading).await?;
        tracing::info!(
            job_id = %id,
            files = job.selected.len(),
            bytes = job.selected_bytes(),
            "download requested"
        );
        self.downloads.admit(self.transfer_plan(&job, cell.epoch, false));
        Ok(())
    }

    /// Pause a `downloading` job; it keeps its transfer slot
    pub async fn pause(&self, id: JobId) -> Result<()> {
        self.set_paused(id, true).await
    }

    /// Resume a `paused` job
    pub async fn resume(&self, id: JobId) -> Result<()> {
        self.set_paused(id, false).await
    }

    async fn set_paused(&self, id: JobId, paused: bool) -> Result<()> {
        let (required, next, operation) = if paused {
            (JobState::Downloading, JobState::Paused, "pause")
        } else {
            (JobState::Paused, JobState::Downloading, "resume")
        };

        let slot = {
            let _cell = self.registry.lock(id).await.ok_or_else(|| Error::not_found(id))?;
            let mut job = self.load(id).await?;
            if job.state != required {
                return Err(Error::invalid_state(id, operation, job.state));
            }
            self.advance(&mut job, next).await?;
            self.downloads.set_paused(id, paused)
        };

        if slot == SlotState::Active {
            self.downloads.forward_pause(id, paused).await;
        }
        Ok(())
    }

    /// Remove a job in any state
    ///
    /// Work in either pool is cancelled and the record deleted. Outcomes still in flight
    /// for the job are ignored. With `purge`, the transfer adapter is asked to drop local
    /// data and a partial remote session is discarded.
    pub async fn delete(&self, id: JobId, purge: bool) -> Result<()> {
        let (job, download_slot) = {
            let mut cell = self.registry.lock(id).await.ok_or_else(|| Error::not_found(id))?;
            let job = self.load(id).await?;

            self.store.delete_job(id).await?;
            cell.removed = true;
            self.registry.remove(id);

            let upload_slot = self.uploads.cancel(id, purge);
            let download_slot = self.downloads.detach(id);
            self.bus.forget(id);
            tracing::info!(
                job_id = %id,
                state = %job.state,
                purge,
                download = ?download_slot,
                upload = ?upload_slot,
                "job deleted"
            );
            (job, download_slot)
        };

        self.emit_event(Event::Removed { id });

        // The engine may still hold a finished, failed or paused-out transfer
        let engine_knows_job = match download_slot {
            SlotState::Active => true,
            SlotState::Waiting => false,
            SlotState::Untracked => job.selected_bytes() > 0,
        };
        if engine_knows_job {
            self.downloads.stop_transfer(id, purge).await;
        }
        Ok(())
    }
}
