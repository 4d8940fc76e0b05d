//! Per-job transfer worker: start, sample, detect completion.

use super::{DownloadCoordinator, TransferPlan};
use crate::adapters::TransferStats;
use crate::error::TransferError;
use crate::progress::{PhaseStats, ProgressSnapshot, eta_secs, percent_of};
use crate::types::{FailureCause, JobFailure, JobState, Outcome};
use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

enum WorkerExit {
    Complete,
    Failed(JobFailure),
    Cancelled,
}

/// Run an adapter call with a bounded wait; `None` if cancelled first
async fn guarded<T>(
    cancel: &CancellationToken,
    limit: Duration,
    call: impl Future<Output = Result<T, TransferError>>,
) -> Option<Result<T, TransferError>> {
    tokio::select! {
        _ = cancel.cancelled() => None,
        result = tokio::time::timeout(limit, call) => {
            Some(result.unwrap_or(Err(TransferError::Timeout(limit))))
        }
    }
}

impl DownloadCoordinator {
    pub(super) fn spawn_worker(&self, plan: TransferPlan, cancel: CancellationToken) {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let ticket = plan.ticket;
            let job_id = ticket.job_id;

            match coordinator.drive(&plan, &cancel).await {
                WorkerExit::Complete => {
                    tracing::info!(job_id = %job_id, bytes = plan.selected_bytes, "transfer complete");
                    coordinator.report(Outcome::DownloadComplete { ticket });
                }
                WorkerExit::Failed(failure) => {
                    tracing::warn!(
                        job_id = %job_id,
                        cause = %failure.cause,
                        error = %failure.message,
                        "transfer failed"
                    );
                    coordinator.report(Outcome::Failed { ticket, failure });
                }
                WorkerExit::Cancelled => {
                    tracing::debug!(job_id = %job_id, "transfer worker cancelled");
                }
            }

            coordinator.release(ticket);
        });
    }

    async fn drive(&self, plan: &TransferPlan, cancel: &CancellationToken) -> WorkerExit {
        let ticket = plan.ticket;
        let job_id = ticket.job_id;
        let limit = self.inner.config.adapter_timeout;

        if plan.selected_bytes == 0 {
            tracing::info!(job_id = %job_id, "nothing to transfer, completing immediately");
            return WorkerExit::Complete;
        }

        match guarded(cancel, limit, self.inner.adapter.start(&plan.request)).await {
            None => return WorkerExit::Cancelled,
            Some(Err(e)) => {
                return WorkerExit::Failed(JobFailure::new(
                    FailureCause::TransferFailed,
                    e.to_string(),
                    0,
                ));
            }
            Some(Ok(())) => {
                tracing::info!(
                    job_id = %job_id,
                    adapter = self.inner.adapter.name(),
                    files = plan.request.selected.len(),
                    "transfer started"
                );
            }
        }

        // A pause recorded before the engine knew the job has to be replayed
        if self.paused_flag(ticket) == Some(true) {
            self.forward_pause(job_id, true).await;
        }

        let mut ticker = tokio::time::interval(self.inner.config.sample_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut consecutive_failures = 0u32;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return WorkerExit::Cancelled,
                _ = ticker.tick() => {}
            }

            match self.paused_flag(ticket) {
                None => return WorkerExit::Cancelled,
                Some(true) => continue,
                Some(false) => {}
            }

            let Some(sample) = guarded(cancel, limit, self.inner.adapter.stats(job_id)).await
            else {
                return WorkerExit::Cancelled;
            };

            match sample {
                Ok(stats) => {
                    consecutive_failures = 0;
                    // Dropped if a pause landed while the query was in flight
                    if !self.publish_if_running(ticket, download_snapshot(plan, &stats)) {
                        continue;
                    }
                    if stats.bytes_downloaded >= plan.selected_bytes {
                        return WorkerExit::Complete;
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    tracing::warn!(
                        job_id = %job_id,
                        error = %e,
                        consecutive_failures,
                        "failed to sample transfer statistics"
                    );
                    if consecutive_failures >= self.inner.config.unresponsive_after {
                        return WorkerExit::Failed(JobFailure::new(
                            FailureCause::TransferUnresponsive,
                            format!("{consecutive_failures} consecutive statistics queries failed: {e}"),
                            consecutive_failures,
                        ));
                    }
                }
            }
        }
    }
}

fn download_snapshot(plan: &TransferPlan, stats: &TransferStats) -> ProgressSnapshot {
    let total = plan.selected_bytes;
    let done = stats.bytes_downloaded.min(total);
    ProgressSnapshot {
        job_id: plan.ticket.job_id,
        state: JobState::Downloading,
        percent: percent_of(done, total),
        bytes_done: done,
        bytes_total: total,
        eta_secs: eta_secs(total - done, stats.download_rate_bps),
        stats: PhaseStats::Download {
            download_rate_bps: stats.download_rate_bps,
            upload_rate_bps: stats.upload_rate_bps,
            peers: stats.peers,
            seeds: stats.seeds,
        },
        last_error: None,
        sampled_at: chrono::Utc::now(),
    }
}
