use tracing::{error, info, warn};

use crate::errors::SessionError;
use crate::service::WorkerPool;
use crate::session::{EventChannel, SessionGuard, SessionStore, Stage};

/// Applies a user suggestion to a Ready session with one review pass.
///
/// The session returns to `Ready` afterwards, so refinement can repeat.
#[derive(Clone)]
pub struct RefinementRunner {
    store: SessionStore,
    events: EventChannel,
    pool: WorkerPool,
}

impl RefinementRunner {
    pub fn new(store: SessionStore, events: EventChannel, pool: WorkerPool) -> Self {
        Self {
            store,
            events,
            pool,
        }
    }

    pub async fn refine(&self, session_id: &str, suggestion: &str) -> Result<(), SessionError> {
        let guard = self.claim(session_id, suggestion)?;
        self.run(guard, suggestion.trim().to_string()).await;
        Ok(())
    }

    /// Validate the suggestion, then take the execution lock without waiting.
    pub fn claim(&self, session_id: &str, suggestion: &str) -> Result<SessionGuard, SessionError> {
        if suggestion.trim().is_empty() {
            return Err(SessionError::Validation(
                "Suggestion must not be empty".to_string(),
            ));
        }
        let Some(guard) = SessionGuard::execution(&self.store, session_id)? else {
            self.events
                .error(session_id, "Conflict: session is busy");
            return Err(SessionError::conflict(session_id, "execution lock held"));
        };
        let stage = self.store.get(session_id)?.stage();
        if stage != Stage::Ready {
            guard.release();
            self.events.error(
                session_id,
                format!("InvalidState: cannot refine while session is {}", stage),
            );
            return Err(SessionError::conflict(
                session_id,
                format!("cannot refine from stage {}", stage),
            ));
        }
        self.events.begin_run(session_id);
        Ok(guard)
    }

    pub async fn run(&self, guard: SessionGuard, suggestion: String) {
        let session_id = guard.session_id().to_string();
        let this = self.clone();
        let sid = session_id.clone();
        let outcome = tokio::spawn(async move { this.review_pass(&sid, &suggestion).await }).await;

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(join_err) => Some(format!("refinement task panicked: {}", join_err)),
        };
        if let Some(reason) = failure {
            error!(session_id = %session_id, error = %reason, "refinement failed");
            self.events
                .error(&session_id, format!("Unhandled error: {}", reason));
            if let Err(e) = self.store.update(&session_id, |s| s.set_stage(Stage::Failed)) {
                warn!(session_id = %session_id, error = %e, "could not mark session failed");
            }
        }

        // Done goes out while the lock is held, so it can never land in the
        // next run claimed on this session.
        self.events.done(&session_id);
        guard.release();
    }

    async fn review_pass(&self, session_id: &str, suggestion: &str) -> Result<(), SessionError> {
        let current = self.store.update(session_id, |s| {
            s.set_stage(Stage::Refining)?;
            Ok(s.artifact.clone())
        })?;
        info!(session_id, "refinement started");
        self.events
            .status(session_id, format!("Applying suggestion: {}", suggestion));

        match self.pool.review(&current, suggestion).await {
            Ok(refined) if !refined.trim().is_empty() => {
                self.store.update(session_id, |s| {
                    s.artifact = refined.clone();
                    Ok(())
                })?;
                self.events.artifact_lines(session_id, &refined);
                self.events.status(session_id, "Refinement applied.");
            }
            Ok(_) => {
                warn!(session_id, "reviewer returned empty refinement; keeping current code");
                self.events.status(
                    session_id,
                    "Warning: reviewer returned empty output; keeping current code.",
                );
            }
            Err(e) => {
                warn!(session_id, error = %e, "refinement review failed; keeping current code");
                self.events.status(
                    session_id,
                    format!("Warning: refinement failed ({}); keeping current code.", e),
                );
            }
        }

        self.store
            .update(session_id, |s| s.set_stage(Stage::Ready))?;
        Ok(())
    }
}
