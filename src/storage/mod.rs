//! Storage collaborator seam.
//!
//! The hosting service that persists committed artifacts sits behind
//! [`StorageBackend`]. Writes are optimistic: an update must carry the
//! revision the caller last observed, and a stale revision is reported as
//! [`StorageError::Conflict`](crate::errors::StorageError::Conflict).

pub mod github;
pub mod memory;

use async_trait::async_trait;

use crate::errors::StorageError;

pub use github::GitHubStorage;
pub use memory::MemoryStorage;

/// A file as currently stored at a location.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFile {
    pub content: String,
    pub revision: String,
    pub url: String,
}

/// Result of a successful write.
#[derive(Debug, Clone, PartialEq)]
pub struct FileWrite {
    pub url: String,
    pub revision: String,
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Current content and revision of `path`, or `None` if it does not exist.
    async fn read_file(&self, location: &str, path: &str) -> Result<Option<StoredFile>, StorageError>;

    /// Create `path` (when `revision` is `None`) or update it from `revision`.
    /// The location is created on first use.
    async fn create_or_update_file(
        &self,
        location: &str,
        path: &str,
        content: &str,
        revision: Option<&str>,
    ) -> Result<FileWrite, StorageError>;
}
