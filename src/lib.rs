//! # torrent-drive
//!
//! Job orchestration engine that fetches torrents and mirrors the selected files to cloud
//! storage.
//!
//! A job is submitted as a magnet locator, has its metadata resolved, downloads a caller-chosen
//! subset of its files through a [`TransferAdapter`](adapters::TransferAdapter), and uploads
//! them through a resumable, chunked [`UploadAdapter`](adapters::UploadAdapter). Jobs survive
//! restarts: state is persisted in SQLite and unfinished work is picked up again on startup.
//!
//! ## Design
//!
//! - **Adapters at the edges** - no peer-to-peer or cloud protocol lives in this crate
//! - **Bounded pools** - downloads and uploads each run under their own concurrency cap
//! - **Event-driven** - consumers subscribe to lifecycle events and progress snapshots
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use torrent_drive::adapters::{LocalUploadAdapter, TransferAdapter};
//! use torrent_drive::{Config, Orchestrator};
//!
//! # async fn example(engine: Arc<dyn TransferAdapter>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let upload = Arc::new(LocalUploadAdapter::new("/mnt/mirror").await?);
//! let orchestrator = Orchestrator::open(config, engine, upload).await?;
//!
//! // Subscribe to events
//! let mut events = orchestrator.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         println!("Event: {:?}", event);
//!     }
//! });
//!
//! let id = orchestrator
//!     .submit("magnet:?xt=urn:btih:c9e15763f722f23e98a29decdfae341b98d53056")
//!     .await?;
//! let metadata = orchestrator.fetch_metadata(id).await?;
//! let all: Vec<usize> = metadata.files.iter().map(|f| f.index).collect();
//! orchestrator.start_download(id, &all).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Transfer and upload capability traits
pub mod adapters;
/// Configuration types
pub mod config;
/// Job persistence
pub mod db;
/// Bounded transfer pool
pub mod download;
/// Error types
pub mod error;
/// Job orchestration (decomposed into focused submodules)
pub mod orchestrator;
/// Progress snapshots and fan-out
pub mod progress;
/// Retry logic with exponential backoff
pub mod retry;
/// Magnet locator parsing
pub mod source;
/// Core types and events
pub mod types;
/// Bounded upload pool
pub mod upload;
/// Utility functions
pub mod utils;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::{Config, DownloadConfig, PersistenceConfig, RetryConfig, UploadConfig};
pub use db::{Database, JobStore, MemoryJobStore};
pub use error::{DatabaseError, Error, JobError, Result, TransferError, UploadError};
pub use orchestrator::Orchestrator;
pub use progress::{PhaseStats, ProgressSnapshot, ProgressSubscription};
pub use source::SourceLocator;
pub use types::{
    Event, FailureCause, FileEntry, Job, JobFailure, JobId, JobState, Metadata, RemoteRef,
};

/// Helper function to run the orchestrator with graceful signal handling.
///
/// Waits for a termination signal and then calls the orchestrator's `shutdown()` method.
///
/// Ctrl+C works everywhere; SIGTERM is honored on Unix as well.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use torrent_drive::adapters::{TransferAdapter, UploadAdapter};
/// use torrent_drive::{Config, Orchestrator, run_with_shutdown};
///
/// # async fn example(
/// #     engine: Arc<dyn TransferAdapter>,
/// #     upload: Arc<dyn UploadAdapter>,
/// # ) -> Result<(), Box<dyn std::error::Error>> {
/// let orchestrator = Orchestrator::open(Config::default(), engine, upload).await?;
///
/// // Run with automatic signal handling
/// run_with_shutdown(orchestrator).await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_with_shutdown(orchestrator: Orchestrator) -> Result<()> {
    wait_for_signal().await;
    orchestrator.shutdown().await
}

/// Resolve on Ctrl+C, or on SIGTERM where the platform has it
async fn wait_for_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM, waiting for Ctrl+C only");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => tracing::info!("interrupt received, shutting down"),
        _ = terminate => tracing::info!("SIGTERM received, shutting down"),
    }
}
