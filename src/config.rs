//! Configuration types for torrent-drive

use crate::error::{Error, Result};
use crate::utils::has_parent_segment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding [`UploadConfig::remote_folder`]
pub const REMOTE_FOLDER_ENV: &str = "TORRENT_DRIVE_REMOTE_FOLDER";

/// Main configuration for the orchestration engine
///
/// Every field has a sensible default, so `Config::default()` works out of the box.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Download pool and sampling settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Upload pool and chunking settings
    #[serde(default)]
    pub upload: UploadConfig,

    /// Upload retry/backoff policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Job store location
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

/// Download coordinator configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Root directory; each job saves into `download_dir/<job id>` (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Maximum concurrently active transfers (default: 5)
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,

    /// Statistics sampling cadence (default: 2 seconds)
    #[serde(
        default = "default_sample_interval",
        rename = "sample_interval_ms",
        with = "duration_ms_serde"
    )]
    pub sample_interval: Duration,

    /// Consecutive failed samples before a transfer is declared unresponsive (default: 5)
    #[serde(default = "default_unresponsive_after")]
    pub unresponsive_after: u32,

    /// Bounded wait for metadata resolution (default: 60 seconds)
    #[serde(default = "default_metadata_timeout", with = "duration_serde")]
    pub metadata_timeout: Duration,

    /// Bounded wait for start/pause/resume/stop/stats calls (default: 30 seconds)
    #[serde(default = "default_adapter_timeout", with = "duration_serde")]
    pub adapter_timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            max_concurrent_downloads: default_max_concurrent_downloads(),
            sample_interval: default_sample_interval(),
            unresponsive_after: default_unresponsive_after(),
            metadata_timeout: default_metadata_timeout(),
            adapter_timeout: default_adapter_timeout(),
        }
    }
}

/// Upload coordinator configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Maximum concurrently uploading jobs (default: 3)
    #[serde(default = "default_max_concurrent_uploads")]
    pub max_concurrent_uploads: usize,

    /// Bytes per chunk (default: 10 MiB)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Bounded wait for a single chunk call (default: 120 seconds)
    #[serde(default = "default_chunk_timeout", with = "duration_serde")]
    pub chunk_timeout: Duration,

    /// Window for the rolling-average upload rate (default: 10 seconds)
    #[serde(default = "default_rate_window", with = "duration_serde")]
    pub rate_window: Duration,

    /// Remote folder every job folder is created under (None = store root)
    #[serde(default)]
    pub remote_folder: Option<String>,

    /// Remove the local copy once a job is uploaded (default: false)
    #[serde(default)]
    pub delete_local_after_upload: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_uploads: default_max_concurrent_uploads(),
            chunk_size: default_chunk_size(),
            chunk_timeout: default_chunk_timeout(),
            rate_window: default_rate_window(),
            remote_folder: None,
            delete_local_after_upload: false,
        }
    }
}

/// Retry configuration for transient upload failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries per chunk after the first attempt (default: 5)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry (default: 1 second)
    #[serde(
        default = "default_initial_delay",
        rename = "initial_delay_ms",
        with = "duration_ms_serde"
    )]
    pub initial_delay: Duration,

    /// Upper bound for any single delay (default: 60 seconds)
    #[serde(
        default = "default_max_delay",
        rename = "max_delay_ms",
        with = "duration_ms_serde"
    )]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Persistence configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database file (default: "./torrent-drive.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, apply environment overrides, and validate it
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| Error::Config {
            message: format!("failed to read {}: {}", path.display(), e),
            key: None,
        })?;
        let mut config: Config = serde_json::from_str(&raw).map_err(|e| Error::Config {
            message: format!("failed to parse {}: {}", path.display(), e),
            key: None,
        })?;
        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (normally the process environment)
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(folder) = lookup(REMOTE_FOLDER_ENV).filter(|v| !v.trim().is_empty()) {
            tracing::debug!(folder = %folder, "remote folder overridden from environment");
            self.upload.remote_folder = Some(folder);
        }
    }

    /// Reject values the coordinators cannot run with
    pub fn validate(&self) -> Result<()> {
        fn invalid(key: &str, message: &str) -> Error {
            Error::Config {
                message: message.to_string(),
                key: Some(key.to_string()),
            }
        }

        if self.download.max_concurrent_downloads == 0 {
            return Err(invalid(
                "download.max_concurrent_downloads",
                "at least one download slot is required",
            ));
        }
        if self.download.sample_interval.is_zero() {
            return Err(invalid(
                "download.sample_interval_ms",
                "sampling interval must be positive",
            ));
        }
        if self.download.unresponsive_after == 0 {
            return Err(invalid(
                "download.unresponsive_after",
                "must allow at least one failed sample",
            ));
        }
        if self.upload.max_concurrent_uploads == 0 {
            return Err(invalid(
                "upload.max_concurrent_uploads",
                "at least one upload slot is required",
            ));
        }
        if self.upload.chunk_size == 0 {
            return Err(invalid("upload.chunk_size", "chunk size must be positive"));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(invalid(
                "retry.backoff_multiplier",
                "backoff multiplier must be at least 1.0",
            ));
        }
        if self.retry.max_delay < self.retry.initial_delay {
            return Err(invalid(
                "retry.max_delay_ms",
                "maximum delay must not be below the initial delay",
            ));
        }
        if self
            .upload
            .remote_folder
            .as_deref()
            .is_some_and(has_parent_segment)
        {
            return Err(invalid(
                "upload.remote_folder",
                "remote folder must not contain '..' segments",
            ));
        }
        Ok(())
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_max_concurrent_downloads() -> usize {
    5
}

fn default_sample_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_unresponsive_after() -> u32 {
    5
}

fn default_metadata_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_adapter_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_concurrent_uploads() -> usize {
    3
}

fn default_chunk_size() -> u64 {
    10 * 1024 * 1024
}

fn default_chunk_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_rate_window() -> Duration {
    Duration::from_secs(10)
}

fn default_max_retries() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./torrent-drive.db")
}

// Duration as whole seconds
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration as milliseconds, for the sub-second knobs
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
