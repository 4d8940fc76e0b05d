//! Shared helpers for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use torrent_drive::adapters::{TransferAdapter, TransferRequest, TransferStats};
use torrent_drive::{Config, Event, FileEntry, JobId, Metadata, TransferError};

/// Magnet locator every test torrent is submitted with
pub const MAGNET: &str =
    "magnet:?xt=urn:btih:c9e15763f722f23e98a29decdfae341b98d53056&dn=album";

/// Deterministic content of file `index`
pub fn content(index: usize, size: u64) -> Vec<u8> {
    (0..size).map(|i| (i as usize * 31 + index) as u8).collect()
}

/// Transfer engine that materializes files on disk and reports `step` bytes per sample
pub struct DiskEngine {
    metadata: Metadata,
    step: u64,
    progress: Mutex<HashMap<JobId, u64>>,
}

impl DiskEngine {
    pub fn new(sizes: &[u64], step: u64) -> Self {
        let files = sizes
            .iter()
            .enumerate()
            .map(|(index, size)| FileEntry {
                index,
                path: format!("disc/track{index:02}.flac"),
                size: *size,
            })
            .collect();
        Self {
            metadata: Metadata {
                name: "album".to_string(),
                info_hash: "c9e15763f722f23e98a29decdfae341b98d53056".to_string(),
                total_size: sizes.iter().sum(),
                files,
            },
            step,
            progress: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl TransferAdapter for DiskEngine {
    async fn resolve_metadata(&self, _source: &str) -> Result<Metadata, TransferError> {
        Ok(self.metadata.clone())
    }

    async fn start(&self, request: &TransferRequest) -> Result<(), TransferError> {
        for file in &self.metadata.files {
            if !request.selected.contains(&file.index) {
                continue;
            }
            let path = request.save_dir.join(&file.path);
            let io = |e: std::io::Error| TransferError::Rejected(e.to_string());
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(io)?;
            }
            tokio::fs::write(&path, content(file.index, file.size))
                .await
                .map_err(io)?;
        }
        self.progress.lock().unwrap().insert(request.job_id, 0);
        Ok(())
    }

    async fn pause(&self, _job: JobId) -> Result<(), TransferError> {
        Ok(())
    }

    async fn resume(&self, _job: JobId) -> Result<(), TransferError> {
        Ok(())
    }

    async fn stop(&self, job: JobId, _purge_data: bool) -> Result<(), TransferError> {
        self.progress.lock().unwrap().remove(&job);
        Ok(())
    }

    async fn stats(&self, job: JobId) -> Result<TransferStats, TransferError> {
        let mut progress = self.progress.lock().unwrap();
        let done = progress.get_mut(&job).ok_or(TransferError::UnknownJob(job))?;
        *done += self.step;
        Ok(TransferStats {
            bytes_downloaded: *done,
            download_rate_bps: self.step * 10,
            upload_rate_bps: 0,
            peers: 4,
            seeds: 2,
        })
    }

    fn name(&self) -> &'static str {
        "disk-engine"
    }
}

/// Config rooted in a temporary directory with fast cadences
pub fn test_config(temp_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.download.download_dir = temp_dir.path().join("downloads");
    config.download.sample_interval = Duration::from_millis(10);
    config.upload.chunk_size = 64;
    config.retry.initial_delay = Duration::from_millis(5);
    config.retry.max_delay = Duration::from_millis(20);
    config.persistence.database_path = temp_dir.path().join("torrent-drive.db");
    config
}

/// Directory the local upload adapter mirrors into
pub fn mirror_dir(temp_dir: &TempDir) -> PathBuf {
    temp_dir.path().join("mirror")
}

/// Result of waiting for a job to finish
#[derive(Debug)]
pub enum WaitResult {
    /// Job uploaded every selected file
    Uploaded,
    /// Job failed with a message
    Failed(String),
    /// Timeout waiting for completion
    Timeout,
    /// Channel closed unexpectedly
    ChannelClosed,
}

/// Wait for a job to reach a terminal state
pub async fn wait_for_terminal(
    events: &mut broadcast::Receiver<Event>,
    id: JobId,
    timeout: Duration,
) -> WaitResult {
    let result = tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(Event::Uploaded { id: event_id, .. }) if event_id == id => {
                    return WaitResult::Uploaded;
                }
                Ok(Event::Failed {
                    id: event_id,
                    message,
                    ..
                }) if event_id == id => {
                    return WaitResult::Failed(message);
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return WaitResult::ChannelClosed,
            }
        }
    })
    .await;

    result.unwrap_or(WaitResult::Timeout)
}
