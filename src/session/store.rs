use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

use super::models::{Session, SessionId};
use crate::errors::SessionError;

/// Fallback slug when nothing alphanumeric survives from the spec.
const DEFAULT_SLUG: &str = "macc-project";
const SLUG_MAX_LEN: usize = 28;

/// Convert free text to a URL-safe slug, limited to `max_len` characters.
pub fn slugify(text: &str, max_len: usize) -> String {
    let slug: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.chars().count() > max_len {
        let truncated: String = slug.chars().take(max_len).collect();
        truncated.trim_end_matches('-').to_string()
    } else {
        slug
    }
}

/// Resolve the storage location for a session.
///
/// A non-empty hint wins verbatim. Otherwise the spec slug is suffixed with
/// the first six hex digits of the session id, so the result is stable for a
/// given session and distinct across sessions.
pub fn resolve_repo(spec: &str, repo_hint: Option<&str>, session_id: &str) -> String {
    if let Some(hint) = repo_hint.map(str::trim).filter(|h| !h.is_empty()) {
        return hint.to_string();
    }
    let mut slug = slugify(spec, SLUG_MAX_LEN);
    if slug.is_empty() {
        slug = DEFAULT_SLUG.to_string();
    }
    let suffix: String = session_id
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .take(6)
        .collect();
    format!("{}-{}", slug, suffix)
}

/// Concurrency-safe keyed store of every live session.
///
/// All session writes go through here. The execution lock and the commit
/// lock are both flags on the session, flipped under the store mutex, so
/// acquisition is atomic and never blocks on another runner.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Mutex<HashMap<SessionId, Session>>>,
    min_spec_len: usize,
}

impl SessionStore {
    pub fn new(min_spec_len: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            min_spec_len,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<SessionId, Session>>, SessionError> {
        self.inner.lock().map_err(|_| SessionError::LockPoisoned)
    }

    pub fn create(&self, spec: &str, repo_hint: Option<&str>) -> Result<SessionId, SessionError> {
        let spec = spec.trim();
        if spec.chars().count() < self.min_spec_len {
            return Err(SessionError::Validation(format!(
                "Project spec too short (minimum {} characters)",
                self.min_spec_len
            )));
        }

        let id = Uuid::new_v4().to_string();
        let repo = resolve_repo(spec, repo_hint, &id);
        let session = Session::new(id.clone(), spec.to_string(), repo);
        self.lock()?.insert(id.clone(), session);
        Ok(id)
    }

    /// Snapshot of the session as it is right now.
    pub fn get(&self, id: &str) -> Result<Session, SessionError> {
        self.lock()?
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::not_found(id))
    }

    /// Apply `mutator` atomically. If it fails, no partial write is kept.
    pub fn update<F, R>(&self, id: &str, mutator: F) -> Result<R, SessionError>
    where
        F: FnOnce(&mut Session) -> Result<R, SessionError>,
    {
        let mut sessions = self.lock()?;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::not_found(id))?;
        let mut draft = session.clone();
        let out = mutator(&mut draft)?;
        draft.touch();
        *session = draft;
        Ok(out)
    }

    /// Non-blocking. Fails while another runner or a commit owns the session.
    pub fn try_acquire_lock(&self, id: &str) -> Result<bool, SessionError> {
        let mut sessions = self.lock()?;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::not_found(id))?;
        if session.is_locked() || session.is_committing() {
            return Ok(false);
        }
        session.set_locked(true);
        Ok(true)
    }

    pub fn release_lock(&self, id: &str) -> Result<(), SessionError> {
        let mut sessions = self.lock()?;
        if let Some(session) = sessions.get_mut(id) {
            session.set_locked(false);
        }
        Ok(())
    }

    /// Commit lock: exclusive with itself and with the execution lock.
    pub fn try_acquire_commit_lock(&self, id: &str) -> Result<bool, SessionError> {
        let mut sessions = self.lock()?;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::not_found(id))?;
        if session.is_locked() || session.is_committing() {
            return Ok(false);
        }
        session.set_committing(true);
        Ok(true)
    }

    pub fn release_commit_lock(&self, id: &str) -> Result<(), SessionError> {
        let mut sessions = self.lock()?;
        if let Some(session) = sessions.get_mut(id) {
            session.set_committing(false);
        }
        Ok(())
    }

    pub fn remove(&self, id: &str) -> Result<Option<Session>, SessionError> {
        Ok(self.lock()?.remove(id))
    }

    pub fn ids(&self) -> Result<Vec<SessionId>, SessionError> {
        Ok(self.lock()?.keys().cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Which session lock a guard holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockKind {
    Execution,
    Commit,
}

/// RAII handle on a session lock. Releases on drop if not released earlier,
/// so a panicking runner cannot leave a session locked.
pub struct SessionGuard {
    store: SessionStore,
    id: SessionId,
    kind: LockKind,
    released: bool,
}

impl SessionGuard {
    /// Acquire the execution lock, or `None` if it is already held.
    pub fn execution(store: &SessionStore, id: &str) -> Result<Option<Self>, SessionError> {
        Ok(store.try_acquire_lock(id)?.then(|| Self {
            store: store.clone(),
            id: id.to_string(),
            kind: LockKind::Execution,
            released: false,
        }))
    }

    /// Acquire the commit lock, or `None` if the session is busy.
    pub fn commit(store: &SessionStore, id: &str) -> Result<Option<Self>, SessionError> {
        Ok(store.try_acquire_commit_lock(id)?.then(|| Self {
            store: store.clone(),
            id: id.to_string(),
            kind: LockKind::Commit,
            released: false,
        }))
    }

    pub fn session_id(&self) -> &str {
        &self.id
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let result = match self.kind {
            LockKind::Execution => self.store.release_lock(&self.id),
            LockKind::Commit => self.store.release_commit_lock(&self.id),
        };
        if let Err(e) = result {
            tracing::warn!(session_id = %self.id, error = %e, "failed to release session lock");
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Stage;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Build a Calculator!", 40), "build-a-calculator");
        assert_eq!(slugify("  --weird__input--  ", 40), "weird-input");
        assert_eq!(slugify("abcdef ghijkl", 8), "abcdef-g");
        assert_eq!(slugify("abcdefg hij", 8), "abcdefg");
        assert_eq!(slugify("!!!", 10), "");
    }

    #[test]
    fn test_resolve_repo_prefers_hint() {
        assert_eq!(resolve_repo("spec", Some("  owner/repo "), "abc"), "owner/repo");
    }

    #[test]
    fn test_resolve_repo_derives_from_spec_and_id() {
        let repo = resolve_repo("Build a calculator", Some("   "), "1a2b3c4d-0000");
        assert_eq!(repo, "build-a-calculator-1a2b3c");
        let fallback = resolve_repo("???", None, "ffffff00");
        assert_eq!(fallback, "macc-project-ffffff");
    }

    #[test]
    fn test_create_validates_spec_length() {
        let store = SessionStore::new(3);
        let err = store.create("  a ", None).unwrap_err();
        assert!(matches!(err, SessionError::Validation(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_create_and_get() {
        let store = SessionStore::new(3);
        let id = store.create("Build a calculator", None).unwrap();
        let session = store.get(&id).unwrap();
        assert_eq!(session.id, id);
        assert_eq!(session.stage(), Stage::Created);
        assert!(session.repo.starts_with("build-a-calculator-"));
        assert!(!session.is_locked());
    }

    #[test]
    fn test_session_ids_are_unique() {
        let store = SessionStore::new(3);
        let a = store.create("same spec", None).unwrap();
        let b = store.create("same spec", None).unwrap();
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_get_unknown_is_not_found() {
        let store = SessionStore::new(3);
        assert!(matches!(
            store.get("missing"),
            Err(SessionError::NotFound { .. })
        ));
        assert!(matches!(
            store.update("missing", |_| Ok(())),
            Err(SessionError::NotFound { .. })
        ));
    }

    #[test]
    fn test_update_is_all_or_nothing() {
        let store = SessionStore::new(3);
        let id = store.create("Build a calculator", None).unwrap();
        let result = store.update(&id, |s| {
            s.artifact = "partial".into();
            s.set_stage(Stage::Ready)
        });
        assert!(matches!(result, Err(SessionError::InvalidTransition { .. })));
        let session = store.get(&id).unwrap();
        assert!(session.artifact.is_empty());
        assert_eq!(session.stage(), Stage::Created);
    }

    #[test]
    fn test_execution_lock_is_exclusive() {
        let store = SessionStore::new(3);
        let id = store.create("Build a calculator", None).unwrap();
        assert!(store.try_acquire_lock(&id).unwrap());
        assert!(!store.try_acquire_lock(&id).unwrap());
        assert!(!store.try_acquire_commit_lock(&id).unwrap());
        store.release_lock(&id).unwrap();
        assert!(store.try_acquire_lock(&id).unwrap());
    }

    #[test]
    fn test_commit_lock_blocks_execution_lock() {
        let store = SessionStore::new(3);
        let id = store.create("Build a calculator", None).unwrap();
        assert!(store.try_acquire_commit_lock(&id).unwrap());
        assert!(!store.try_acquire_commit_lock(&id).unwrap());
        assert!(!store.try_acquire_lock(&id).unwrap());
        store.release_commit_lock(&id).unwrap();
        assert!(store.try_acquire_lock(&id).unwrap());
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let store = SessionStore::new(3);
        let id = store.create("Build a calculator", None).unwrap();
        {
            let guard = SessionGuard::execution(&store, &id).unwrap();
            assert!(guard.is_some());
            assert!(SessionGuard::execution(&store, &id).unwrap().is_none());
        }
        assert!(!store.get(&id).unwrap().is_locked());
    }

    #[test]
    fn test_remove() {
        let store = SessionStore::new(3);
        let id = store.create("Build a calculator", None).unwrap();
        assert!(store.remove(&id).unwrap().is_some());
        assert!(store.get(&id).is_err());
        assert!(store.remove(&id).unwrap().is_none());
    }
}
