//! Point-in-time progress measurements

use crate::types::{Job, JobId, JobState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Phase-specific statistics carried by a [`ProgressSnapshot`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum PhaseStats {
    /// No phase is running (not started, finished, or failed)
    Idle,
    /// Peer-to-peer transfer statistics
    Download {
        /// Inbound rate in bytes per second
        download_rate_bps: u64,
        /// Outbound (seeding) rate in bytes per second
        upload_rate_bps: u64,
        /// Connected peers
        peers: u32,
        /// Connected seeds
        seeds: u32,
    },
    /// Remote upload statistics
    Upload {
        /// Rolling-average rate in bytes per second
        rate_bps: u64,
        /// Resumable session URI of the file in flight
        session_uri: Option<String>,
        /// Destination of the file in flight
        current_file: Option<String>,
        /// Retries spent on the current chunk
        retry_count: u32,
    },
}

/// Progress of one job at one moment
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Job the snapshot describes
    pub job_id: JobId,
    /// Lifecycle state at sampling time
    pub state: JobState,
    /// Completion percentage of the current phase (0.0 to 100.0)
    pub percent: f32,
    /// Bytes done in the current phase
    pub bytes_done: u64,
    /// Bytes the current phase has to move
    pub bytes_total: u64,
    /// Estimated seconds remaining, when a rate is known
    pub eta_secs: Option<u64>,
    /// Phase-specific statistics
    pub stats: PhaseStats,
    /// Last error seen by a failed attempt
    pub last_error: Option<String>,
    /// When the snapshot was taken
    pub sampled_at: DateTime<Utc>,
}

impl ProgressSnapshot {
    /// Snapshot for a job with no live measurements
    pub fn idle(job: &Job) -> Self {
        let bytes_total = if job.selected.is_empty() {
            job.total_size.unwrap_or_default()
        } else {
            job.selected_bytes()
        };
        let bytes_done = if job.state == JobState::Uploaded {
            bytes_total
        } else {
            0
        };
        Self {
            job_id: job.id,
            state: job.state,
            percent: if job.state == JobState::Uploaded {
                100.0
            } else {
                0.0
            },
            bytes_done,
            bytes_total,
            eta_secs: None,
            stats: PhaseStats::Idle,
            last_error: job.failure.as_ref().map(|f| f.message.clone()),
            sampled_at: Utc::now(),
        }
    }
}

/// `done / total * 100`, clamped to 100; zero when nothing is expected
pub fn percent_of(done: u64, total: u64) -> f32 {
    if total == 0 {
        return 0.0;
    }
    ((done as f64 / total as f64) * 100.0).min(100.0) as f32
}

/// Seconds to move `remaining` bytes at `rate_bps`, if the rate is known
pub fn eta_secs(remaining: u64, rate_bps: u64) -> Option<u64> {
    (rate_bps > 0).then(|| remaining.div_ceil(rate_bps))
}
