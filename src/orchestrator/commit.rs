use std::sync::Arc;

use tracing::{info, warn};

use crate::errors::{SessionError, StorageError};
use crate::session::{EventChannel, SessionGuard, SessionStore, Stage};
use crate::storage::StorageBackend;

/// Persists a session's artifact and description to the storage collaborator.
///
/// The storage location is the repo resolved at session creation, so
/// repeated commits always land in the same place. A file whose stored
/// content already matches is not rewritten, which keeps an unchanged
/// re-commit from producing a new revision.
#[derive(Clone)]
pub struct CommitCoordinator {
    store: SessionStore,
    events: EventChannel,
    storage: Arc<dyn StorageBackend>,
    artifact_path: String,
    description_path: String,
}

impl CommitCoordinator {
    pub fn new(
        store: SessionStore,
        events: EventChannel,
        storage: Arc<dyn StorageBackend>,
        artifact_path: impl Into<String>,
        description_path: impl Into<String>,
    ) -> Self {
        Self {
            store,
            events,
            storage,
            artifact_path: artifact_path.into(),
            description_path: description_path.into(),
        }
    }

    /// Commit the current artifact. Returns the artifact's external url.
    pub async fn commit(&self, session_id: &str) -> Result<String, SessionError> {
        check_committable(&self.store.get(session_id)?)?;

        let guard = SessionGuard::commit(&self.store, session_id)?.ok_or_else(|| {
            SessionError::conflict(session_id, "session is busy or already committing")
        })?;
        // Re-read under the lock: a refinement may have landed in between.
        let session = self.store.get(session_id)?;
        check_committable(&session)?;

        let result = self
            .persist(&session.repo, &session.artifact, &session.description)
            .await;
        let url = match result {
            Ok(url) => url,
            Err(e) => {
                warn!(session_id, repo = %session.repo, error = %e, "commit failed");
                self.events
                    .status(session_id, format!("Commit failed: {}", e));
                return Err(SessionError::Commit(e));
            }
        };

        self.store.update(session_id, |s| {
            s.url = Some(url.clone());
            s.set_stage(Stage::Committed)
        })?;
        guard.release();

        info!(session_id, url = %url, "session committed");
        self.events
            .status(session_id, format!("Code committed: {}", url));
        Ok(url)
    }

    async fn persist(
        &self,
        location: &str,
        artifact: &str,
        description: &str,
    ) -> Result<String, StorageError> {
        let url = self
            .write_file(location, &self.artifact_path, artifact)
            .await?;
        if !description.is_empty() {
            self.write_file(location, &self.description_path, description)
                .await?;
        }
        Ok(url)
    }

    /// Read-modify-write one file, retrying once on a revision conflict.
    async fn write_file(
        &self,
        location: &str,
        path: &str,
        content: &str,
    ) -> Result<String, StorageError> {
        let mut retried = false;
        loop {
            let current = self.storage.read_file(location, path).await?;
            if let Some(file) = &current
                && file.content == content
            {
                return Ok(file.url.clone());
            }
            let revision = current.as_ref().map(|f| f.revision.as_str());
            match self
                .storage
                .create_or_update_file(location, path, content, revision)
                .await
            {
                Ok(write) => return Ok(write.url),
                Err(StorageError::Conflict { .. }) if !retried => {
                    warn!(location, path, "revision conflict; retrying once");
                    retried = true;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn check_committable(session: &crate::session::Session) -> Result<(), SessionError> {
    if session.artifact.trim().is_empty() {
        return Err(SessionError::Validation(
            "No artifact to commit yet".to_string(),
        ));
    }
    match session.stage() {
        Stage::Ready | Stage::Committed | Stage::Failed => Ok(()),
        stage => Err(SessionError::conflict(
            &session.id,
            format!("cannot commit while session is {}", stage),
        )),
    }
}
