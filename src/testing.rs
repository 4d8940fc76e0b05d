//! Scripted adapters and helpers shared by the unit tests.

use crate::adapters::{SessionHandle, TransferAdapter, TransferRequest, TransferStats, UploadAdapter};
use crate::config::Config;
use crate::error::{TransferError, UploadError};
use crate::types::{FileEntry, JobId, Metadata, Outcome};
use crate::utils::lock;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

pub(crate) const MAGNET: &str =
    "magnet:?xt=urn:btih:c9e15763f722f23e98a29decdfae341b98d53056&dn=fixture";

/// Metadata with one file per size, named `file<i>.bin` under a `fixture/` folder
pub(crate) fn metadata(sizes: &[u64]) -> Metadata {
    Metadata {
        name: "fixture".to_string(),
        info_hash: "c9e15763f722f23e98a29decdfae341b98d53056".to_string(),
        total_size: sizes.iter().sum(),
        files: sizes
            .iter()
            .enumerate()
            .map(|(index, size)| FileEntry {
                index,
                path: format!("fixture/file{index}.bin"),
                size: *size,
            })
            .collect(),
    }
}

/// Byte pattern written for a fixture file, so uploads can be checked end to end
pub(crate) fn payload(index: usize, size: u64) -> Vec<u8> {
    (0..size).map(|i| ((i as usize + index * 7) % 251) as u8).collect()
}

/// Config with millisecond cadences rooted in `dir`
pub(crate) fn fast_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.download.download_dir = dir.join("downloads");
    config.download.sample_interval = Duration::from_millis(10);
    config.download.unresponsive_after = 3;
    config.download.metadata_timeout = Duration::from_secs(2);
    config.download.adapter_timeout = Duration::from_secs(2);
    config.upload.chunk_timeout = Duration::from_secs(2);
    config.upload.chunk_size = 16;
    config.retry.max_retries = 3;
    config.retry.initial_delay = Duration::from_millis(5);
    config.retry.max_delay = Duration::from_millis(20);
    config.retry.jitter = false;
    config.persistence.database_path = dir.join("jobs.db");
    config
}

/// Poll `condition` until it holds, panicking after five seconds
pub(crate) async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Next coordinator outcome, panicking after five seconds
pub(crate) async fn next_outcome(rx: &mut mpsc::UnboundedReceiver<Outcome>) -> Outcome {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for outcome")
        .expect("outcome channel closed")
}

#[derive(Debug, Clone)]
struct FakeRun {
    total: u64,
    done: u64,
    paused: bool,
    finished: bool,
}

#[derive(Default)]
struct TransferState {
    metadata: Option<Metadata>,
    metadata_error: Option<TransferError>,
    metadata_delay: Duration,
    metadata_calls: u32,
    step: u64,
    failing_stats: bool,
    reject_start: bool,
    write_files: bool,
    runs: HashMap<JobId, FakeRun>,
    started: Vec<TransferRequest>,
    stopped: Vec<(JobId, bool)>,
    pause_calls: u32,
    resume_calls: u32,
    stats_calls: HashMap<JobId, u32>,
    running: usize,
    max_running: usize,
}

/// Transfer engine that advances `step` bytes per statistics query
pub(crate) struct FakeTransfer {
    state: Mutex<TransferState>,
}

impl FakeTransfer {
    /// Engine serving `metadata` for any source; completes in one sample by default
    pub(crate) fn new(metadata: Metadata) -> Self {
        let step = metadata.total_size.max(1);
        Self {
            state: Mutex::new(TransferState {
                metadata: Some(metadata),
                step,
                write_files: true,
                ..TransferState::default()
            }),
        }
    }

    pub(crate) fn set_step(&self, step: u64) {
        lock(&self.state).step = step;
    }

    pub(crate) fn set_failing_stats(&self, failing: bool) {
        lock(&self.state).failing_stats = failing;
    }

    pub(crate) fn set_reject_start(&self, reject: bool) {
        lock(&self.state).reject_start = reject;
    }

    pub(crate) fn set_metadata(&self, metadata: Metadata) {
        lock(&self.state).metadata = Some(metadata);
    }

    pub(crate) fn set_metadata_error(&self, error: Option<TransferError>) {
        lock(&self.state).metadata_error = error;
    }

    pub(crate) fn set_metadata_delay(&self, delay: Duration) {
        lock(&self.state).metadata_delay = delay;
    }

    pub(crate) fn metadata_calls(&self) -> u32 {
        lock(&self.state).metadata_calls
    }

    pub(crate) fn started(&self) -> Vec<TransferRequest> {
        lock(&self.state).started.clone()
    }

    pub(crate) fn started_ids(&self) -> Vec<JobId> {
        lock(&self.state).started.iter().map(|r| r.job_id).collect()
    }

    pub(crate) fn stopped(&self) -> Vec<(JobId, bool)> {
        lock(&self.state).stopped.clone()
    }

    pub(crate) fn pause_calls(&self) -> u32 {
        lock(&self.state).pause_calls
    }

    pub(crate) fn resume_calls(&self) -> u32 {
        lock(&self.state).resume_calls
    }

    pub(crate) fn stats_calls(&self, id: JobId) -> u32 {
        lock(&self.state).stats_calls.get(&id).copied().unwrap_or(0)
    }

    pub(crate) fn max_running(&self) -> usize {
        lock(&self.state).max_running
    }
}

#[async_trait]
impl TransferAdapter for FakeTransfer {
    async fn resolve_metadata(&self, _source: &str) -> Result<Metadata, TransferError> {
        let (delay, result) = {
            let mut state = lock(&self.state);
            state.metadata_calls += 1;
            let result = match (&state.metadata_error, &state.metadata) {
                (Some(e), _) => Err(e.clone()),
                (None, Some(m)) => Ok(m.clone()),
                (None, None) => Err(TransferError::Rejected("no metadata scripted".into())),
            };
            (state.metadata_delay, result)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn start(&self, request: &TransferRequest) -> Result<(), TransferError> {
        let files: Vec<FileEntry> = {
            let mut state = lock(&self.state);
            if state.reject_start {
                return Err(TransferError::Rejected("engine refused the torrent".into()));
            }
            let files: Vec<FileEntry> = state
                .metadata
                .as_ref()
                .map(|m| {
                    m.files
                        .iter()
                        .filter(|f| request.selected.contains(&f.index))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            let total = files.iter().map(|f| f.size).sum();
            state.runs.insert(
                request.job_id,
                FakeRun {
                    total,
                    done: 0,
                    paused: false,
                    finished: false,
                },
            );
            state.started.push(request.clone());
            state.running += 1;
            state.max_running = state.max_running.max(state.running);
            if state.write_files { files } else { Vec::new() }
        };

        for file in files {
            let path = request.save_dir.join(&file.path);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| TransferError::Unavailable(e.to_string()))?;
            }
            tokio::fs::write(&path, payload(file.index, file.size))
                .await
                .map_err(|e| TransferError::Unavailable(e.to_string()))?;
        }
        Ok(())
    }

    async fn pause(&self, job: JobId) -> Result<(), TransferError> {
        let mut state = lock(&self.state);
        state.pause_calls += 1;
        let run = state.runs.get_mut(&job).ok_or(TransferError::UnknownJob(job))?;
        run.paused = true;
        Ok(())
    }

    async fn resume(&self, job: JobId) -> Result<(), TransferError> {
        let mut state = lock(&self.state);
        state.resume_calls += 1;
        let run = state.runs.get_mut(&job).ok_or(TransferError::UnknownJob(job))?;
        run.paused = false;
        Ok(())
    }

    async fn stop(&self, job: JobId, purge_data: bool) -> Result<(), TransferError> {
        let mut state = lock(&self.state);
        state.stopped.push((job, purge_data));
        if let Some(run) = state.runs.remove(&job) {
            if !run.finished {
                state.running -= 1;
            }
        }
        Ok(())
    }

    async fn stats(&self, job: JobId) -> Result<TransferStats, TransferError> {
        let mut state = lock(&self.state);
        *state.stats_calls.entry(job).or_default() += 1;
        if state.failing_stats {
            return Err(TransferError::Unavailable("engine not answering".into()));
        }
        let step = state.step;
        let run = state.runs.get_mut(&job).ok_or(TransferError::UnknownJob(job))?;
        let mut just_finished = false;
        if !run.paused && !run.finished {
            run.done = (run.done + step).min(run.total);
            if run.done == run.total {
                run.finished = true;
                just_finished = true;
            }
        }
        let stats = TransferStats {
            bytes_downloaded: run.done,
            download_rate_bps: if run.paused { 0 } else { step },
            upload_rate_bps: 0,
            peers: 4,
            seeds: 2,
        };
        if just_finished {
            state.running -= 1;
        }
        Ok(stats)
    }

    fn name(&self) -> &'static str {
        "fake-transfer"
    }
}

/// One `send_chunk` call as seen by the fake
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ChunkCall {
    pub(crate) destination: String,
    pub(crate) offset: u64,
    pub(crate) len: usize,
}

#[derive(Debug, Clone)]
struct FakeSession {
    destination: String,
    received: u64,
    data: Vec<u8>,
}

#[derive(Default)]
struct UploadState {
    next_id: u64,
    sessions: HashMap<String, FakeSession>,
    chunk_calls: Vec<ChunkCall>,
    chunk_failures: VecDeque<UploadError>,
    open_failures: VecDeque<UploadError>,
    chunk_delay: Duration,
    finalized: Vec<(String, Vec<u8>)>,
    discarded: Vec<String>,
    query_calls: u32,
    open_now: usize,
    max_open: usize,
}

/// Upload backend that stores chunks in memory and fails on a script
#[derive(Default)]
pub(crate) struct FakeUpload {
    state: Mutex<UploadState>,
}

impl FakeUpload {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Errors returned by the next `send_chunk` calls, in order
    pub(crate) fn fail_chunks(&self, errors: impl IntoIterator<Item = UploadError>) {
        lock(&self.state).chunk_failures.extend(errors);
    }

    /// Errors returned by the next `open_session` calls, in order
    pub(crate) fn fail_opens(&self, errors: impl IntoIterator<Item = UploadError>) {
        lock(&self.state).open_failures.extend(errors);
    }

    pub(crate) fn set_chunk_delay(&self, delay: Duration) {
        lock(&self.state).chunk_delay = delay;
    }

    pub(crate) fn chunk_calls(&self) -> Vec<ChunkCall> {
        lock(&self.state).chunk_calls.clone()
    }

    pub(crate) fn finalized(&self) -> Vec<(String, Vec<u8>)> {
        lock(&self.state).finalized.clone()
    }

    pub(crate) fn discarded(&self) -> Vec<String> {
        lock(&self.state).discarded.clone()
    }

    pub(crate) fn query_calls(&self) -> u32 {
        lock(&self.state).query_calls
    }

    pub(crate) fn max_open(&self) -> usize {
        lock(&self.state).max_open
    }

    pub(crate) fn open_sessions(&self) -> usize {
        lock(&self.state).open_now
    }
}

#[async_trait]
impl UploadAdapter for FakeUpload {
    async fn open_session(
        &self,
        destination: &str,
        _size: u64,
    ) -> Result<SessionHandle, UploadError> {
        let mut state = lock(&self.state);
        if let Some(e) = state.open_failures.pop_front() {
            return Err(e);
        }
        state.next_id += 1;
        let id = format!("s{}", state.next_id);
        state.sessions.insert(
            id.clone(),
            FakeSession {
                destination: destination.to_string(),
                received: 0,
                data: Vec::new(),
            },
        );
        state.open_now += 1;
        state.max_open = state.max_open.max(state.open_now);
        Ok(SessionHandle {
            uri: Some(format!("fake://upload/{id}")),
            id,
        })
    }

    async fn send_chunk(
        &self,
        session: &SessionHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<u64, UploadError> {
        let delay = lock(&self.state).chunk_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = lock(&self.state);
        if let Some(e) = state.chunk_failures.pop_front() {
            return Err(e);
        }
        let entry = state
            .sessions
            .get_mut(&session.id)
            .ok_or_else(|| UploadError::Permanent(format!("unknown session {}", session.id)))?;
        let start = offset as usize;
        let end = start + data.len();
        if entry.data.len() < end {
            entry.data.resize(end, 0);
        }
        entry.data[start..end].copy_from_slice(data);
        entry.received = entry.received.max(end as u64);
        let received = entry.received;
        let destination = entry.destination.clone();
        state.chunk_calls.push(ChunkCall {
            destination,
            offset,
            len: data.len(),
        });
        Ok(received)
    }

    async fn query_offset(&self, session: &SessionHandle) -> Result<u64, UploadError> {
        let mut state = lock(&self.state);
        state.query_calls += 1;
        state
            .sessions
            .get(&session.id)
            .map(|s| s.received)
            .ok_or_else(|| UploadError::Permanent(format!("unknown session {}", session.id)))
    }

    async fn finalize(&self, session: &SessionHandle) -> Result<String, UploadError> {
        let mut state = lock(&self.state);
        let entry = state
            .sessions
            .remove(&session.id)
            .ok_or_else(|| UploadError::Permanent(format!("unknown session {}", session.id)))?;
        state.open_now -= 1;
        let remote_id = format!("remote:{}", entry.destination);
        state.finalized.push((entry.destination, entry.data));
        Ok(remote_id)
    }

    async fn discard(&self, session: &SessionHandle) -> Result<(), UploadError> {
        let mut state = lock(&self.state);
        if let Some(entry) = state.sessions.remove(&session.id) {
            state.open_now -= 1;
            state.discarded.push(entry.destination);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "fake-upload"
    }
}
