//! Generation-service seam.
//!
//! The text-generation capability is an opaque collaborator behind the
//! [`GenerationService`] trait. Runners never call it directly: every call
//! goes through [`WorkerPool`], which bounds concurrency and applies the
//! per-call timeout.

pub mod openrouter;
pub mod pool;

use async_trait::async_trait;

use crate::errors::ServiceError;

pub use openrouter::OpenRouterService;
pub use pool::WorkerPool;

/// Abstraction over the multi-agent generation backend for testability.
/// Real implementation: `OpenRouterService`. Test doubles live next to the
/// runners that use them.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Break the spec into an informational task list.
    async fn plan(&self, spec: &str) -> Result<Vec<String>, ServiceError>;

    /// Produce the first artifact for the spec.
    async fn generate(&self, spec: &str) -> Result<String, ServiceError>;

    /// Return an improved artifact following `instructions`.
    async fn review(&self, artifact: &str, instructions: &str) -> Result<String, ServiceError>;
}
