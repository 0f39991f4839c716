//! Typed error hierarchy for the collaborator.
//!
//! Three top-level enums cover the three seams:
//! - `SessionError`: session lifecycle, runner and commit failures
//! - `ServiceError`: generation-service call failures (always recovered locally)
//! - `StorageError`: storage collaborator failures

use thiserror::Error;

use crate::session::Stage;

/// Errors surfaced to callers of the session orchestrator.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Session {id} not found")]
    NotFound { id: String },

    #[error("Conflict on session {id}: {reason}")]
    Conflict { id: String, reason: String },

    #[error("Invalid stage transition {from} -> {to}")]
    InvalidTransition { from: Stage, to: Stage },

    #[error("Commit failed: {0}")]
    Commit(#[source] StorageError),

    #[error("Session state lock poisoned")]
    LockPoisoned,
}

impl SessionError {
    pub fn not_found(id: &str) -> Self {
        Self::NotFound { id: id.to_string() }
    }

    pub fn conflict(id: &str, reason: impl Into<String>) -> Self {
        Self::Conflict {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors from a single generation-service call.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Generation request failed: {0}")]
    Request(String),

    #[error("Generation call timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Generation service returned empty output")]
    EmptyOutput,

    #[error("Generation call panicked: {0}")]
    Panicked(String),
}

/// Errors from the storage collaborator.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Revision conflict writing {path}")]
    Conflict { path: String },

    #[error("Storage authorization failed: {0}")]
    Unauthorized(String),

    #[error("Storage request failed: {0}")]
    Request(String),
}
