use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{FileWrite, StorageBackend, StoredFile};
use crate::errors::StorageError;

#[derive(Debug, Clone)]
struct Entry {
    content: String,
    revision: u64,
}

/// In-process storage backend. Keeps every file's latest content and a
/// count of revisions written, for offline runs and tests.
#[derive(Default)]
pub struct MemoryStorage {
    files: Mutex<HashMap<(String, String), Entry>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn url(location: &str, path: &str) -> String {
        format!("memory://{}/{}", location, path)
    }

    /// Number of revisions written for `path` (0 if never written).
    pub fn revision_count(&self, location: &str, path: &str) -> u64 {
        self.files
            .lock()
            .map(|f| {
                f.get(&(location.to_string(), path.to_string()))
                    .map(|e| e.revision)
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }

    /// Overwrite a file out-of-band, as a concurrent writer would.
    pub fn force_write(&self, location: &str, path: &str, content: &str) {
        if let Ok(mut files) = self.files.lock() {
            let entry = files
                .entry((location.to_string(), path.to_string()))
                .or_insert(Entry {
                    content: String::new(),
                    revision: 0,
                });
            entry.content = content.to_string();
            entry.revision += 1;
        }
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn read_file(&self, location: &str, path: &str) -> Result<Option<StoredFile>, StorageError> {
        let files = self
            .files
            .lock()
            .map_err(|_| StorageError::Request("memory storage lock poisoned".into()))?;
        Ok(files
            .get(&(location.to_string(), path.to_string()))
            .map(|e| StoredFile {
                content: e.content.clone(),
                revision: e.revision.to_string(),
                url: Self::url(location, path),
            }))
    }

    async fn create_or_update_file(
        &self,
        location: &str,
        path: &str,
        content: &str,
        revision: Option<&str>,
    ) -> Result<FileWrite, StorageError> {
        let mut files = self
            .files
            .lock()
            .map_err(|_| StorageError::Request("memory storage lock poisoned".into()))?;
        let key = (location.to_string(), path.to_string());
        let current = files.get(&key).map(|e| e.revision.to_string());
        if current.as_deref() != revision {
            return Err(StorageError::Conflict {
                path: path.to_string(),
            });
        }
        let next = files.get(&key).map(|e| e.revision).unwrap_or(0) + 1;
        files.insert(
            key,
            Entry {
                content: content.to_string(),
                revision: next,
            },
        );
        Ok(FileWrite {
            url: Self::url(location, path),
            revision: next.to_string(),
        })
    }
}
