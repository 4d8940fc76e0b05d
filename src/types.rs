//! Core job types, lifecycle states, and events

use crate::error::{Error, Result};
use crate::utils::escapes_root;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Unique identifier for a job
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Create a fresh random JobId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID
    pub fn get(&self) -> Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for JobId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Lifecycle state of a job
///
/// ```text
/// queued -> metadata_pending -> metadata_ready -> downloading <-> paused
///        -> download_complete -> uploading -> uploaded
/// ```
///
/// `error` is reachable from every non-terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Submitted, nothing resolved yet
    Queued,
    /// Metadata resolution in flight
    MetadataPending,
    /// Name and file list known, waiting for a selection
    MetadataReady,
    /// Admitted to (or waiting for) a download slot
    Downloading,
    /// Deliberately held by the user
    Paused,
    /// All selected bytes present locally
    DownloadComplete,
    /// Files being sent to the remote store
    Uploading,
    /// Every selected file finalized remotely (success terminal)
    Uploaded,
    /// Failed with a recorded cause (terminal)
    Error,
}

impl JobState {
    /// All states in lifecycle order
    pub const ALL: [JobState; 9] = [
        JobState::Queued,
        JobState::MetadataPending,
        JobState::MetadataReady,
        JobState::Downloading,
        JobState::Paused,
        JobState::DownloadComplete,
        JobState::Uploading,
        JobState::Uploaded,
        JobState::Error,
    ];

    /// Stable string form used for persistence and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::MetadataPending => "metadata_pending",
            JobState::MetadataReady => "metadata_ready",
            JobState::Downloading => "downloading",
            JobState::Paused => "paused",
            JobState::DownloadComplete => "download_complete",
            JobState::Uploading => "uploading",
            JobState::Uploaded => "uploaded",
            JobState::Error => "error",
        }
    }

    /// Parse the persisted string form
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.as_str() == s)
    }

    /// Terminal states never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Uploaded | JobState::Error)
    }

    /// Whether `self -> next` is an edge of the lifecycle graph
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        match (*self, next) {
            (Queued, MetadataPending)
            | (MetadataPending, MetadataReady)
            | (MetadataReady, Downloading)
            | (Downloading, Paused)
            | (Paused, Downloading)
            | (Downloading, DownloadComplete)
            | (DownloadComplete, Uploading)
            | (Uploading, Uploaded) => true,
            (from, Error) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One file inside a torrent
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Position in the torrent's file list (0-based)
    pub index: usize,
    /// Path relative to the torrent root
    pub path: String,
    /// Size in bytes
    pub size: u64,
}

/// Metadata resolved from a source locator
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Torrent name
    pub name: String,
    /// Hex info-hash
    pub info_hash: String,
    /// Sum of all file sizes
    pub total_size: u64,
    /// Files in torrent order
    pub files: Vec<FileEntry>,
}

impl Metadata {
    /// Check that file indices match their positions and every path stays under the
    /// job's directory
    pub fn validate(&self) -> std::result::Result<(), String> {
        if escapes_root(&self.name) {
            return Err(format!("torrent name '{}' escapes its directory", self.name));
        }
        if let Some(file) = self
            .files
            .iter()
            .find(|file| file.path.trim().is_empty() || escapes_root(&file.path))
        {
            return Err(format!(
                "file {} has unsafe path '{}'",
                file.index, file.path
            ));
        }
        if let Some(file) = self
            .files
            .iter()
            .enumerate()
            .find(|(pos, file)| file.index != *pos)
            .map(|(_, file)| file)
        {
            return Err(format!(
                "file '{}' has index {} out of order",
                file.path, file.index
            ));
        }
        Ok(())
    }
}

/// Categorical cause recorded on a job in the `error` state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// Metadata could not be resolved (adapter failure or timeout)
    MetadataUnavailable,
    /// Transfer adapter refused to start the transfer
    TransferFailed,
    /// Too many consecutive statistics queries failed
    TransferUnresponsive,
    /// Upload retries exhausted or a permanent upload error
    UploadFailed,
}

impl FailureCause {
    /// Stable string form used for persistence
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCause::MetadataUnavailable => "metadata_unavailable",
            FailureCause::TransferFailed => "transfer_failed",
            FailureCause::TransferUnresponsive => "transfer_unresponsive",
            FailureCause::UploadFailed => "upload_failed",
        }
    }

    /// Parse the persisted string form
    pub fn parse(s: &str) -> Option<Self> {
        [
            FailureCause::MetadataUnavailable,
            FailureCause::TransferFailed,
            FailureCause::TransferUnresponsive,
            FailureCause::UploadFailed,
        ]
        .into_iter()
        .find(|cause| cause.as_str() == s)
    }
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a job ended up in `error`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    /// Failure category
    pub cause: FailureCause,
    /// Human-readable detail (last adapter error)
    pub message: String,
    /// Retries spent by the coordinator before giving up
    pub retries: u32,
}

impl JobFailure {
    /// Create a failure record
    pub fn new(cause: FailureCause, message: impl Into<String>, retries: u32) -> Self {
        Self {
            cause,
            message: message.into(),
            retries,
        }
    }
}

/// Identifier of an uploaded file in the remote store
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRef {
    /// Index of the uploaded file in the job's file list
    pub file_index: usize,
    /// Destination path the file was uploaded to
    pub path: String,
    /// Identifier returned by the upload adapter on finalize
    pub remote_id: String,
}

/// A user-submitted unit of work
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Job identifier
    pub id: JobId,
    /// Magnet locator the job was submitted with
    pub source: String,
    /// Torrent name (once metadata resolved)
    pub name: Option<String>,
    /// Info-hash (once metadata resolved)
    pub info_hash: Option<String>,
    /// Total torrent size (once metadata resolved)
    pub total_size: Option<u64>,
    /// File list (once metadata resolved)
    pub files: Vec<FileEntry>,
    /// Indices chosen by `start_download`
    pub selected: BTreeSet<usize>,
    /// Current lifecycle state
    pub state: JobState,
    /// Present only in the `error` state
    pub failure: Option<JobFailure>,
    /// Remote identifiers, present once uploaded
    pub remote_refs: Vec<RemoteRef>,
    /// Submission time
    pub created_at: DateTime<Utc>,
    /// Last persisted change
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// New job in the `queued` state
    pub fn new(id: JobId, source: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            source: source.into(),
            name: None,
            info_hash: None,
            total_size: None,
            files: Vec::new(),
            selected: BTreeSet::new(),
            state: JobState::Queued,
            failure: None,
            remote_refs: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Cached metadata, if it has been resolved
    pub fn metadata(&self) -> Option<Metadata> {
        let name = self.name.clone()?;
        Some(Metadata {
            name,
            info_hash: self.info_hash.clone().unwrap_or_default(),
            total_size: self.total_size.unwrap_or_default(),
            files: self.files.clone(),
        })
    }

    /// Record resolved metadata on the job
    pub fn apply_metadata(&mut self, metadata: &Metadata) {
        self.name = Some(metadata.name.clone());
        self.info_hash = Some(metadata.info_hash.clone());
        self.total_size = Some(metadata.total_size);
        self.files = metadata.files.clone();
    }

    /// Selected files in index order
    pub fn selected_files(&self) -> Vec<FileEntry> {
        self.files
            .iter()
            .filter(|file| self.selected.contains(&file.index))
            .cloned()
            .collect()
    }

    /// Bytes the transfer has to fetch for the current selection
    pub fn selected_bytes(&self) -> u64 {
        self.selected_files().iter().map(|file| file.size).sum()
    }

    /// Move to `next` if the lifecycle graph allows it, returning the previous state
    pub fn transition(&mut self, next: JobState) -> Result<JobState> {
        if !self.state.can_transition_to(next) {
            return Err(Error::invalid_state(
                self.id,
                format!("move to {next}"),
                self.state,
            ));
        }
        let previous = self.state;
        self.state = next;
        Ok(previous)
    }
}

/// Monotonic generation number guarding a job's asynchronous callbacks
pub type Epoch = u64;

/// Job identity plus the epoch the work was issued under
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Ticket {
    /// Job the work belongs to
    pub job_id: JobId,
    /// Registry epoch at issue time
    pub epoch: Epoch,
}

/// Terminal result of a coordinator's work on one job
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// Every selected byte is present locally
    DownloadComplete {
        /// Work ticket
        ticket: Ticket,
    },
    /// Every file was finalized remotely
    UploadComplete {
        /// Work ticket
        ticket: Ticket,
        /// One reference per uploaded file
        refs: Vec<RemoteRef>,
    },
    /// The work failed permanently
    Failed {
        /// Work ticket
        ticket: Ticket,
        /// Cause, message and retry count
        failure: JobFailure,
    },
}

impl Outcome {
    /// Ticket the outcome was produced for
    pub fn ticket(&self) -> Ticket {
        match self {
            Outcome::DownloadComplete { ticket }
            | Outcome::UploadComplete { ticket, .. }
            | Outcome::Failed { ticket, .. } => *ticket,
        }
    }
}

/// Lifecycle event broadcast by the orchestrator
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Job accepted
    Submitted {
        /// Job ID
        id: JobId,
        /// Source locator
        source: String,
    },

    /// Metadata resolved
    MetadataResolved {
        /// Job ID
        id: JobId,
        /// Torrent name
        name: String,
        /// Total torrent size in bytes
        total_size: u64,
        /// Number of files in the torrent
        file_count: usize,
    },

    /// Job moved along the lifecycle graph
    StateChanged {
        /// Job ID
        id: JobId,
        /// Previous state
        from: JobState,
        /// New state
        to: JobState,
    },

    /// Job entered the error state
    Failed {
        /// Job ID
        id: JobId,
        /// Failure category
        cause: FailureCause,
        /// Human-readable detail
        message: String,
    },

    /// Job uploaded successfully
    Uploaded {
        /// Job ID
        id: JobId,
        /// Remote identifiers
        refs: Vec<RemoteRef>,
    },

    /// Job deleted
    Removed {
        /// Job ID
        id: JobId,
    },

    /// Orchestrator shutting down
    Shutdown,
}
