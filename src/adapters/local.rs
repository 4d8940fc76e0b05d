//! Directory-backed upload target
//!
//! Sessions are written as `.part` files under `<root>/.sessions` and renamed to
//! `<root>/<destination>` on finalize. Useful for mirroring completed jobs to a mounted
//! volume and for exercising the upload pipeline without a cloud account.

use super::traits::{SessionHandle, UploadAdapter};
use crate::error::UploadError;
use crate::utils::{is_contained, lock};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

const SESSION_DIR: &str = ".sessions";

/// Upload adapter writing into a local directory tree
#[derive(Debug)]
pub struct LocalUploadAdapter {
    root: PathBuf,
    sessions: Mutex<HashMap<String, LocalSession>>,
}

#[derive(Debug, Clone)]
struct LocalSession {
    destination: String,
    part: PathBuf,
    size: u64,
    received: u64,
}

impl LocalUploadAdapter {
    /// Create the adapter, making sure `root` and its session directory exist
    pub async fn new(root: impl Into<PathBuf>) -> crate::Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join(SESSION_DIR)).await?;
        Ok(Self {
            root,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Directory uploads land in
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session(&self, handle: &SessionHandle) -> Result<LocalSession, UploadError> {
        lock(&self.sessions)
            .get(&handle.id)
            .cloned()
            .ok_or_else(|| UploadError::Permanent(format!("unknown session {}", handle.id)))
    }
}

fn io_failure(context: &str, e: std::io::Error) -> UploadError {
    UploadError::Retryable(format!("{context}: {e}"))
}

#[async_trait]
impl UploadAdapter for LocalUploadAdapter {
    async fn open_session(
        &self,
        destination: &str,
        size: u64,
    ) -> Result<SessionHandle, UploadError> {
        let relative = Path::new(destination);
        if destination.is_empty() || !is_contained(relative) {
            return Err(UploadError::Permanent(format!(
                "destination '{destination}' escapes the upload root"
            )));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let part = self.root.join(SESSION_DIR).join(format!("{id}.part"));
        tokio::fs::File::create(&part)
            .await
            .map_err(|e| io_failure("failed to create session file", e))?;

        lock(&self.sessions).insert(
            id.clone(),
            LocalSession {
                destination: destination.to_string(),
                part: part.clone(),
                size,
                received: 0,
            },
        );

        Ok(SessionHandle {
            id,
            uri: Some(format!("file://{}", part.display())),
        })
    }

    async fn send_chunk(
        &self,
        session: &SessionHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<u64, UploadError> {
        let state = self.session(session)?;
        if offset > state.received {
            return Err(UploadError::Retryable(format!(
                "offset {offset} is past the {} bytes received",
                state.received
            )));
        }
        let end = offset + data.len() as u64;
        if end > state.size {
            return Err(UploadError::Permanent(format!(
                "chunk ends at {end}, beyond the declared size {}",
                state.size
            )));
        }

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&state.part)
            .await
            .map_err(|e| io_failure("failed to open session file", e))?;
        file.seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(|e| io_failure("failed to seek session file", e))?;
        file.write_all(data)
            .await
            .map_err(|e| io_failure("failed to write chunk", e))?;
        file.flush()
            .await
            .map_err(|e| io_failure("failed to flush chunk", e))?;

        let mut sessions = lock(&self.sessions);
        let entry = sessions
            .get_mut(&session.id)
            .ok_or_else(|| UploadError::Permanent(format!("session {} was discarded", session.id)))?;
        entry.received = entry.received.max(end);
        Ok(entry.received)
    }

    async fn query_offset(&self, session: &SessionHandle) -> Result<u64, UploadError> {
        Ok(self.session(session)?.received)
    }

    async fn finalize(&self, session: &SessionHandle) -> Result<String, UploadError> {
        let state = self.session(session)?;
        if state.received != state.size {
            return Err(UploadError::Permanent(format!(
                "session incomplete: {} of {} bytes",
                state.received, state.size
            )));
        }

        let target = self.root.join(&state.destination);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_failure("failed to create destination directory", e))?;
        }
        tokio::fs::rename(&state.part, &target)
            .await
            .map_err(|e| io_failure("failed to move upload into place", e))?;

        lock(&self.sessions).remove(&session.id);
        tracing::debug!(destination = %state.destination, bytes = state.size, "local upload finalized");
        Ok(state.destination)
    }

    async fn discard(&self, session: &SessionHandle) -> Result<(), UploadError> {
        let Some(state) = lock(&self.sessions).remove(&session.id) else {
            return Ok(());
        };
        match tokio::fs::remove_file(&state.part).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_failure("failed to remove session file", e)),
        }
    }

    fn name(&self) -> &'static str {
        "local-directory"
    }
}
