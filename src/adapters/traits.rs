//! Traits and types for the transfer and upload capabilities

use crate::error::{TransferError, UploadError};
use crate::types::{JobId, Metadata};
use async_trait::async_trait;
use std::path::PathBuf;

/// Everything a transfer engine needs to start one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// Job the transfer belongs to
    pub job_id: JobId,
    /// Magnet locator
    pub source: String,
    /// File indices to fetch, ascending
    pub selected: Vec<usize>,
    /// Directory the files are written under
    pub save_dir: PathBuf,
}

/// Instantaneous statistics for one transfer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Selected bytes present locally
    pub bytes_downloaded: u64,
    /// Inbound rate in bytes per second
    pub download_rate_bps: u64,
    /// Outbound rate in bytes per second
    pub upload_rate_bps: u64,
    /// Connected peers
    pub peers: u32,
    /// Connected seeds
    pub seeds: u32,
}

/// Peer-to-peer transfer capability
///
/// One adapter instance serves every job; calls are keyed by [`JobId`]. Every call is
/// wrapped in a bounded wait by the caller, so implementations may simply await their
/// engine.
///
/// # Examples
///
/// ```no_run
/// use torrent_drive::adapters::{TransferAdapter, TransferRequest};
/// use torrent_drive::JobId;
///
/// # async fn example(engine: &dyn TransferAdapter) -> Result<(), Box<dyn std::error::Error>> {
/// let metadata = engine.resolve_metadata("magnet:?xt=urn:btih:...").await?;
/// let request = TransferRequest {
///     job_id: JobId::new(),
///     source: "magnet:?xt=urn:btih:...".to_string(),
///     selected: vec![0],
///     save_dir: "/downloads/job".into(),
/// };
/// engine.start(&request).await?;
/// let stats = engine.stats(request.job_id).await?;
/// println!("{} / {}", stats.bytes_downloaded, metadata.files[0].size);
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait TransferAdapter: Send + Sync {
    /// Resolve name, size, and file list for a locator without downloading payload
    async fn resolve_metadata(&self, source: &str) -> Result<Metadata, TransferError>;

    /// Begin transferring the selected files
    async fn start(&self, request: &TransferRequest) -> Result<(), TransferError>;

    /// Hold an active transfer
    async fn pause(&self, job: JobId) -> Result<(), TransferError>;

    /// Continue a held transfer
    async fn resume(&self, job: JobId) -> Result<(), TransferError>;

    /// Stop and forget a transfer, optionally deleting its local data
    async fn stop(&self, job: JobId, purge_data: bool) -> Result<(), TransferError>;

    /// Current statistics for a transfer
    async fn stats(&self, job: JobId) -> Result<TransferStats, TransferError>;

    /// Name of this implementation, for logs
    fn name(&self) -> &'static str;
}

/// Opaque handle to one resumable upload session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    /// Adapter-specific session identifier
    pub id: String,
    /// Resumable session URI, when the backend exposes one
    pub uri: Option<String>,
}

/// Resumable chunked upload capability
///
/// Implementations classify failures: [`UploadError::Retryable`] (and
/// [`UploadError::Timeout`]) make the coordinator back off and resend the same chunk,
/// [`UploadError::Permanent`] fails the job at once.
#[async_trait]
pub trait UploadAdapter: Send + Sync {
    /// Open a resumable session for a file of `size` bytes at `destination`
    async fn open_session(&self, destination: &str, size: u64)
    -> Result<SessionHandle, UploadError>;

    /// Send `data` starting at `offset`; returns the acknowledged offset
    async fn send_chunk(
        &self,
        session: &SessionHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<u64, UploadError>;

    /// Bytes the remote side has durably received so far
    async fn query_offset(&self, session: &SessionHandle) -> Result<u64, UploadError>;

    /// Commit a fully sent session; returns the remote file identifier
    async fn finalize(&self, session: &SessionHandle) -> Result<String, UploadError>;

    /// Throw away a session and any partial remote artifact
    async fn discard(&self, session: &SessionHandle) -> Result<(), UploadError>;

    /// Name of this implementation, for logs
    fn name(&self) -> &'static str;
}
