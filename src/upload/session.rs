//! Resumable upload session state for one file

use crate::adapters::SessionHandle;
use crate::config::RetryConfig;
use crate::retry::backoff_delay;
use std::time::Duration;
use tokio::time::Instant;

/// One file's resumable session, owned by the upload worker
///
/// Retry bookkeeping is explicit: a transient failure calls
/// [`schedule_retry`](Self::schedule_retry), which records `next_attempt_at`; the worker
/// sleeps until that instant, resyncs the offset and sends again.
#[derive(Debug, Clone)]
pub struct UploadSession {
    /// Adapter session
    pub handle: SessionHandle,
    /// Remote destination path
    pub destination: String,
    /// File size in bytes
    pub size: u64,
    /// Bytes the remote side has confirmed
    pub bytes_acknowledged: u64,
    /// Retries spent on the current chunk
    pub retry_count: u32,
    /// When the next attempt may run; `None` when no retry is pending
    pub next_attempt_at: Option<Instant>,
}

impl UploadSession {
    /// Fresh session with nothing acknowledged
    pub fn new(handle: SessionHandle, destination: impl Into<String>, size: u64) -> Self {
        Self {
            handle,
            destination: destination.into(),
            size,
            bytes_acknowledged: 0,
            retry_count: 0,
            next_attempt_at: None,
        }
    }

    /// Every byte has been acknowledged
    pub fn is_complete(&self) -> bool {
        self.bytes_acknowledged >= self.size
    }

    /// Bytes still to send
    pub fn remaining(&self) -> u64 {
        self.size.saturating_sub(self.bytes_acknowledged)
    }

    /// Record an acknowledged offset
    ///
    /// Returns `false` if the offset did not move forward. Progress clears the retry state.
    pub fn acknowledge(&mut self, offset: u64) -> bool {
        let offset = offset.min(self.size);
        if offset <= self.bytes_acknowledged {
            return false;
        }
        self.bytes_acknowledged = offset;
        self.retry_count = 0;
        self.next_attempt_at = None;
        true
    }

    /// Adopt the offset reported by the remote side after a failure
    pub fn resync(&mut self, offset: u64) {
        self.bytes_acknowledged = offset.min(self.size);
    }

    /// Schedule the next attempt after a transient failure
    ///
    /// Returns the delay, or `None` once `max_retries` retries have been spent.
    pub fn schedule_retry(&mut self, config: &RetryConfig, now: Instant) -> Option<Duration> {
        if self.retry_count >= config.max_retries {
            self.next_attempt_at = None;
            return None;
        }
        self.retry_count += 1;
        let delay = backoff_delay(config, self.retry_count);
        self.next_attempt_at = Some(now + delay);
        Some(delay)
    }
}
