//! Per-job upload worker: sessions, chunks, retries, progress.

use super::{Abort, UploadCoordinator, UploadFile, UploadPlan, UploadSession};
use crate::config::RetryConfig;
use crate::error::UploadError;
use crate::progress::{PhaseStats, ProgressSnapshot, RateWindow, percent_of};
use crate::retry::{IsRetryable, with_retry};
use crate::types::{FailureCause, JobFailure, JobId, JobState, Outcome, RemoteRef, Ticket};
use std::future::Future;
use std::io::SeekFrom;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

enum WorkerExit {
    Complete(Vec<RemoteRef>),
    Failed(JobFailure),
    Cancelled,
}

/// Byte totals across all files of one job
struct JobProgress {
    total: u64,
    finished_bytes: u64,
    window: RateWindow,
}

async fn cancellable<T>(cancel: &CancellationToken, fut: impl Future<Output = T>) -> Option<T> {
    tokio::select! {
        _ = cancel.cancelled() => None,
        value = fut => Some(value),
    }
}

/// Adapter call with a bounded wait; running out of time is transient
async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, UploadError>>,
) -> Result<T, UploadError> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(UploadError::Timeout(limit)))
}

async fn read_chunk(file: Option<&mut File>, offset: u64, len: u64) -> std::io::Result<Vec<u8>> {
    let Some(file) = file else {
        return Ok(Vec::new());
    };
    file.seek(SeekFrom::Start(offset)).await?;
    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf).await?;
    Ok(buf)
}

fn failed(message: String, retries: u32) -> WorkerExit {
    WorkerExit::Failed(JobFailure::new(FailureCause::UploadFailed, message, retries))
}

/// Retries `with_retry` spent before giving up on `error`
fn retries_spent(error: &UploadError, config: &RetryConfig) -> u32 {
    if error.is_retryable() {
        config.max_retries
    } else {
        0
    }
}

impl UploadCoordinator {
    pub(super) fn spawn_worker(&self, plan: UploadPlan, abort: Abort) {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let ticket = plan.ticket;
            let job_id = ticket.job_id;

            match coordinator.run(&plan, &abort).await {
                WorkerExit::Complete(refs) => {
                    tracing::info!(job_id = %job_id, files = refs.len(), "upload complete");
                    coordinator.report(Outcome::UploadComplete { ticket, refs });
                }
                WorkerExit::Failed(failure) => {
                    tracing::warn!(
                        job_id = %job_id,
                        retries = failure.retries,
                        error = %failure.message,
                        "upload failed"
                    );
                    coordinator.report(Outcome::Failed { ticket, failure });
                }
                WorkerExit::Cancelled => {
                    tracing::debug!(job_id = %job_id, "upload worker cancelled");
                }
            }

            coordinator.release(ticket);
        });
    }

    async fn run(&self, plan: &UploadPlan, abort: &Abort) -> WorkerExit {
        let mut progress = JobProgress {
            total: plan.total_bytes(),
            finished_bytes: 0,
            window: RateWindow::new(self.inner.config.rate_window),
        };
        progress.window.record(Instant::now(), 0);

        let mut refs = Vec::with_capacity(plan.files.len());
        for file in &plan.files {
            match self.upload_file(plan.ticket, file, &mut progress, abort).await {
                Ok(remote_id) => {
                    refs.push(RemoteRef {
                        file_index: file.index,
                        path: file.destination.clone(),
                        remote_id,
                    });
                    progress.finished_bytes += file.size;
                }
                Err(exit) => return exit,
            }
        }
        WorkerExit::Complete(refs)
    }

    async fn upload_file(
        &self,
        ticket: Ticket,
        file: &UploadFile,
        progress: &mut JobProgress,
        abort: &Abort,
    ) -> Result<String, WorkerExit> {
        let job_id = ticket.job_id;
        let retry = &self.inner.retry;
        let limit = self.inner.config.chunk_timeout;
        let adapter = self.inner.adapter.as_ref();
        let destination = file.destination.as_str();

        // Zero-length files have nothing to read and may never have been written locally
        let mut local = if file.size == 0 {
            None
        } else {
            let opened = File::open(&file.local_path).await.map_err(|e| {
                failed(format!("cannot open {}: {e}", file.local_path.display()), 0)
            })?;
            Some(opened)
        };

        let size = file.size;
        let opened = cancellable(
            &abort.cancel,
            with_retry(retry, move || {
                bounded(limit, adapter.open_session(destination, size))
            }),
        )
        .await;
        let handle = match opened {
            None => return Err(WorkerExit::Cancelled),
            Some(Ok(handle)) => handle,
            Some(Err(e)) => {
                return Err(failed(
                    format!("cannot open upload session for {destination}: {e}"),
                    retries_spent(&e, retry),
                ));
            }
        };
        tracing::debug!(job_id = %job_id, file = destination, session = %handle.id, "session opened");

        let mut session = UploadSession::new(handle, destination, size);
        while !session.is_complete() {
            let offset = session.bytes_acknowledged;
            let len = session.remaining().min(self.inner.config.chunk_size);
            let chunk = match read_chunk(local.as_mut(), offset, len).await {
                Ok(chunk) => chunk,
                Err(e) => {
                    self.abandon(job_id, &session).await;
                    return Err(failed(
                        format!("cannot read {}: {e}", file.local_path.display()),
                        session.retry_count,
                    ));
                }
            };

            let sent = cancellable(
                &abort.cancel,
                bounded(limit, adapter.send_chunk(&session.handle, offset, &chunk)),
            )
            .await;
            let Some(sent) = sent else {
                return Err(self.cancelled(job_id, &session, abort).await);
            };

            let error = match sent {
                Ok(acknowledged) => {
                    if session.acknowledge(acknowledged) {
                        self.publish(ticket, &session, progress, None);
                        continue;
                    }
                    UploadError::Retryable(format!("no progress past offset {acknowledged}"))
                }
                Err(e) if e.is_retryable() => e,
                Err(e) => {
                    self.abandon(job_id, &session).await;
                    return Err(failed(
                        format!("upload of {destination} failed: {e}"),
                        session.retry_count,
                    ));
                }
            };

            let Some(delay) = session.schedule_retry(retry, Instant::now()) else {
                self.abandon(job_id, &session).await;
                return Err(failed(
                    format!(
                        "upload of {destination} failed after {} retries: {error}",
                        session.retry_count
                    ),
                    session.retry_count,
                ));
            };
            tracing::warn!(
                job_id = %job_id,
                file = destination,
                offset,
                attempt = session.retry_count,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "chunk failed, retrying"
            );
            self.publish(ticket, &session, progress, Some(error.to_string()));

            let wake = session.next_attempt_at.unwrap_or_else(Instant::now);
            if cancellable(&abort.cancel, tokio::time::sleep_until(wake))
                .await
                .is_none()
            {
                return Err(self.cancelled(job_id, &session, abort).await);
            }

            let queried = cancellable(
                &abort.cancel,
                bounded(limit, adapter.query_offset(&session.handle)),
            )
            .await;
            match queried {
                None => return Err(self.cancelled(job_id, &session, abort).await),
                Some(Ok(received)) => session.resync(received),
                Some(Err(e)) => {
                    tracing::warn!(
                        job_id = %job_id,
                        file = destination,
                        error = %e,
                        "offset query failed, resending from last acknowledged offset"
                    );
                }
            }
        }

        let handle = &session.handle;
        let finalized = cancellable(
            &abort.cancel,
            with_retry(retry, move || bounded(limit, adapter.finalize(handle))),
        )
        .await;
        match finalized {
            None => Err(self.cancelled(job_id, &session, abort).await),
            Some(Ok(remote_id)) => {
                tracing::info!(job_id = %job_id, file = destination, remote_id = %remote_id, "file uploaded");
                Ok(remote_id)
            }
            Some(Err(e)) => {
                self.abandon(job_id, &session).await;
                Err(failed(
                    format!("cannot finalize {destination}: {e}"),
                    retries_spent(&e, retry),
                ))
            }
        }
    }

    fn publish(
        &self,
        ticket: Ticket,
        session: &UploadSession,
        progress: &mut JobProgress,
        last_error: Option<String>,
    ) {
        let done = progress.finished_bytes + session.bytes_acknowledged;
        if last_error.is_none() {
            progress.window.record(Instant::now(), done);
        }
        let snapshot = ProgressSnapshot {
            job_id: ticket.job_id,
            state: JobState::Uploading,
            percent: percent_of(done, progress.total),
            bytes_done: done,
            bytes_total: progress.total,
            eta_secs: progress.window.eta_secs(progress.total.saturating_sub(done)),
            stats: PhaseStats::Upload {
                rate_bps: progress.window.rate_bps(),
                session_uri: session.handle.uri.clone(),
                current_file: Some(session.destination.clone()),
                retry_count: session.retry_count,
            },
            last_error,
            sampled_at: chrono::Utc::now(),
        };
        self.publish_if_active(ticket, snapshot);
    }

    /// Drop the session after cancellation, discarding it remotely if a purge was asked for
    async fn cancelled(&self, job_id: JobId, session: &UploadSession, abort: &Abort) -> WorkerExit {
        if abort.purge_requested() {
            self.abandon(job_id, session).await;
        } else {
            tracing::debug!(job_id = %job_id, session = %session.handle.id, "session dropped");
        }
        WorkerExit::Cancelled
    }

    /// Best-effort remote discard
    async fn abandon(&self, job_id: JobId, session: &UploadSession) {
        let limit = self.inner.config.chunk_timeout;
        match bounded(limit, self.inner.adapter.discard(&session.handle)).await {
            Ok(()) => tracing::debug!(job_id = %job_id, session = %session.handle.id, "session discarded"),
            Err(e) => tracing::warn!(
                job_id = %job_id,
                session = %session.handle.id,
                error = %e,
                "failed to discard upload session"
            ),
        }
    }
}
