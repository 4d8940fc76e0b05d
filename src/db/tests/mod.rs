use crate::db::*;
use crate::types::{FailureCause, FileEntry, JobFailure, RemoteRef};
use chrono::{Duration, Utc};
use tempfile::NamedTempFile;

fn sample_job(offset_ms: i64) -> Job {
    let mut job = Job::new(JobId::new(), "magnet:?xt=urn:btih:c9e15763f722f23e98a29decdfae341b98d53056");
    job.created_at = Utc::now() + Duration::milliseconds(offset_ms);
    job.updated_at = job.created_at;
    job
}

fn with_metadata(mut job: Job) -> Job {
    job.name = Some("Big Buck Bunny".to_string());
    job.info_hash = Some("c9e15763f722f23e98a29decdfae341b98d53056".to_string());
    job.total_size = Some(60);
    job.files = vec![
        FileEntry { index: 0, path: "bbb/a.mp4".into(), size: 10 },
        FileEntry { index: 1, path: "bbb/b.srt".into(), size: 20 },
        FileEntry { index: 2, path: "bbb/c.nfo".into(), size: 30 },
    ];
    job.state = JobState::MetadataReady;
    job
}

async fn crud_round_trip(store: &dyn JobStore) {
    let job = sample_job(0);
    store.insert_job(&job).await.unwrap();

    let loaded = store.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(loaded.id, job.id);
    assert_eq!(loaded.state, JobState::Queued);
    assert!(loaded.files.is_empty());

    let mut updated = with_metadata(loaded);
    updated.selected = [0, 2].into_iter().collect();
    updated.state = JobState::Error;
    updated.failure = Some(JobFailure::new(FailureCause::UploadFailed, "quota exceeded", 3));
    updated.remote_refs = vec![RemoteRef {
        file_index: 0,
        path: "Big Buck Bunny/bbb/a.mp4".into(),
        remote_id: "remote-1".into(),
    }];
    assert!(store.update_job(&updated).await.unwrap());

    let reloaded = store.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(reloaded.name.as_deref(), Some("Big Buck Bunny"));
    assert_eq!(reloaded.files, updated.files);
    assert_eq!(reloaded.selected, updated.selected);
    assert_eq!(reloaded.failure, updated.failure);
    assert_eq!(reloaded.remote_refs, updated.remote_refs);
    assert_eq!(reloaded.selected_bytes(), 40);

    assert!(store.delete_job(job.id).await.unwrap());
    assert!(store.get_job(job.id).await.unwrap().is_none());
    assert!(!store.delete_job(job.id).await.unwrap());
}

async fn update_never_inserts(store: &dyn JobStore) {
    let ghost = sample_job(0);
    assert!(!store.update_job(&ghost).await.unwrap());
    assert!(store.get_job(ghost.id).await.unwrap().is_none());
    assert!(store.list_jobs().await.unwrap().is_empty());
}

async fn list_in_submission_order(store: &dyn JobStore) {
    let late = sample_job(50);
    let early = sample_job(-50);
    let middle = sample_job(0);
    for job in [&late, &early, &middle] {
        store.insert_job(job).await.unwrap();
    }

    let ids: Vec<JobId> = store.list_jobs().await.unwrap().iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![early.id, middle.id, late.id]);

    let mut downloading = with_metadata(middle.clone());
    downloading.state = JobState::Downloading;
    store.update_job(&downloading).await.unwrap();
    let by_state = store.list_jobs_by_state(JobState::Downloading).await.unwrap();
    assert_eq!(by_state.len(), 1);
    assert_eq!(by_state[0].id, middle.id);
    assert_eq!(by_state[0].files.len(), 3, "listing carries file lists");
}

#[tokio::test]
async fn memory_store_crud() {
    crud_round_trip(&MemoryJobStore::new()).await;
}

#[tokio::test]
async fn memory_store_update_never_inserts() {
    update_never_inserts(&MemoryJobStore::new()).await;
}

#[tokio::test]
async fn memory_store_lists_in_order() {
    list_in_submission_order(&MemoryJobStore::new()).await;
}

#[tokio::test]
async fn sqlite_store_crud() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    crud_round_trip(&db).await;
    db.close().await;
}

#[tokio::test]
async fn sqlite_store_update_never_inserts() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    update_never_inserts(&db).await;
    db.close().await;
}

#[tokio::test]
async fn sqlite_store_lists_in_order() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    list_in_submission_order(&db).await;
    db.close().await;
}

#[tokio::test]
async fn sqlite_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("jobs.db");

    let job = with_metadata(sample_job(0));
    {
        let db = Database::new(&path).await.unwrap();
        db.insert_job(&job).await.unwrap();
        db.close().await;
    }

    // Reopening must not re-run migrations or lose data
    let db = Database::new(&path).await.unwrap();
    let loaded = db.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(loaded.files, job.files);
    assert_eq!(loaded.state, JobState::MetadataReady);
    assert_eq!(loaded.created_at.timestamp_millis(), job.created_at.timestamp_millis());
    db.close().await;
}
