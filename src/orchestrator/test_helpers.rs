//! Shared test helpers for creating Orchestrator instances in tests.

use crate::config::Config;
use crate::db::{JobStore, MemoryJobStore};
use crate::orchestrator::Orchestrator;
use crate::testing::{FakeTransfer, FakeUpload, MAGNET, fast_config, metadata, payload};
use crate::types::{Job, JobId, JobState};
use crate::utils::job_download_dir;
use std::sync::Arc;
use tempfile::{TempDir, tempdir};

/// An orchestrator wired to scripted adapters and an in-memory store
pub(crate) struct TestContext {
    pub(crate) orchestrator: Orchestrator,
    pub(crate) engine: Arc<FakeTransfer>,
    pub(crate) remote: Arc<FakeUpload>,
    pub(crate) store: Arc<MemoryJobStore>,
    pub(crate) config: Config,
    /// Must outlive the orchestrator
    pub(crate) _dir: TempDir,
}

/// Orchestrator whose torrent has one file per entry of `sizes`
pub(crate) async fn create_test_orchestrator(sizes: &[u64]) -> TestContext {
    create_test_orchestrator_with(sizes, |_| {}).await
}

pub(crate) async fn create_test_orchestrator_with(
    sizes: &[u64],
    adjust: impl FnOnce(&mut Config),
) -> TestContext {
    build(sizes, adjust, Vec::new()).await
}

/// Orchestrator started over a store that already holds `jobs`
///
/// Jobs past the download phase get their payload written to the download directory first,
/// as a previous run would have left it.
pub(crate) async fn create_restored_orchestrator(sizes: &[u64], jobs: Vec<Job>) -> TestContext {
    build(sizes, |_| {}, jobs).await
}

async fn build(sizes: &[u64], adjust: impl FnOnce(&mut Config), jobs: Vec<Job>) -> TestContext {
    let dir = tempdir().unwrap();
    let mut config = fast_config(dir.path());
    adjust(&mut config);

    let engine = Arc::new(FakeTransfer::new(metadata(sizes)));
    let remote = Arc::new(FakeUpload::new());
    let store = Arc::new(MemoryJobStore::new());
    for job in &jobs {
        store.insert_job(job).await.unwrap();
        if matches!(job.state, JobState::DownloadComplete | JobState::Uploading) {
            let job_dir = job_download_dir(&config.download.download_dir, job.id);
            for file in job.selected_files() {
                let path = job_dir.join(&file.path);
                tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
                tokio::fs::write(&path, payload(file.index, file.size)).await.unwrap();
            }
        }
    }
    let orchestrator = Orchestrator::new(
        config.clone(),
        store.clone(),
        engine.clone(),
        remote.clone(),
    )
    .await
    .unwrap();

    TestContext {
        orchestrator,
        engine,
        remote,
        store,
        config,
        _dir: dir,
    }
}

impl TestContext {
    /// Submit the fixture magnet and resolve its metadata
    pub(crate) async fn ready_job(&self) -> JobId {
        let id = self.orchestrator.submit(MAGNET).await.unwrap();
        self.orchestrator.fetch_metadata(id).await.unwrap();
        id
    }

    /// Stored copy of a job
    pub(crate) async fn stored(&self, id: JobId) -> Option<Job> {
        self.store.get_job(id).await.unwrap()
    }

    /// Poll the store until the job reaches `state`
    pub(crate) async fn wait_for_state(&self, id: JobId, state: JobState) -> Job {
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
        loop {
            let job = self.stored(id).await;
            if job.as_ref().map(|j| j.state) == Some(state) {
                return job.unwrap();
            }
            if tokio::time::Instant::now() > deadline {
                panic!(
                    "job {id} never reached {state}, last seen {:?}",
                    job.map(|j| j.state)
                );
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }
}
