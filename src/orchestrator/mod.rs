//! Session lifecycle orchestration.
//!
//! [`Orchestrator`] is the single entry point the transport layer talks to.
//! It owns the shared [`SessionStore`] and [`EventChannel`] and hands them to
//! three runners:
//! - [`PipelineRunner`] drives a new session to `Ready`
//! - [`RefinementRunner`] applies suggestions to a `Ready` session
//! - [`CommitCoordinator`] persists the artifact through the storage seam
//!
//! Pipeline and refinement runs are claimed synchronously, so conflicts and
//! validation errors reach the caller, and then continue on a background task.

pub mod commit;
pub mod pipeline;
pub mod refine;
pub mod templates;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::errors::SessionError;
use crate::service::{GenerationService, WorkerPool};
use crate::session::{Event, EventChannel, Session, SessionId, SessionStore, Subscription};
use crate::storage::StorageBackend;

pub use commit::CommitCoordinator;
pub use pipeline::PipelineRunner;
pub use refine::RefinementRunner;

/// Everything buffered for a session since the previous poll.
#[derive(Debug, Clone, Serialize)]
pub struct PollResult {
    pub messages: Vec<Event>,
    /// True once the latest run has emitted its Done.
    pub done: bool,
    pub repo_url: Option<String>,
}

#[derive(Clone)]
pub struct Orchestrator {
    store: SessionStore,
    events: EventChannel,
    pipeline: PipelineRunner,
    refiner: RefinementRunner,
    committer: CommitCoordinator,
}

impl Orchestrator {
    pub fn new(
        config: &PipelineConfig,
        service: Arc<dyn GenerationService>,
        storage: Arc<dyn StorageBackend>,
    ) -> Self {
        let store = SessionStore::new(config.min_spec_len);
        let events = EventChannel::new();
        let pool = WorkerPool::new(
            service,
            config.worker_pool_size.max(1),
            config.service_timeout(),
        );
        Self {
            pipeline: PipelineRunner::new(store.clone(), events.clone(), pool.clone()),
            refiner: RefinementRunner::new(store.clone(), events.clone(), pool),
            committer: CommitCoordinator::new(
                store.clone(),
                events.clone(),
                storage,
                config.artifact_path.clone(),
                config.description_path.clone(),
            ),
            store,
            events,
        }
    }

    /// Create a session and start its pipeline in the background.
    pub fn generate(&self, spec: &str, repo_hint: Option<&str>) -> Result<SessionId, SessionError> {
        let session_id = self.store.create(spec, repo_hint)?;
        let guard = self.pipeline.claim(&session_id)?;
        info!(session_id = %session_id, "session created");

        let pipeline = self.pipeline.clone();
        self.spawn_run(&session_id, async move { pipeline.run(guard).await });
        Ok(session_id)
    }

    /// Validate and claim a refinement, then apply it in the background.
    pub fn refine(&self, session_id: &str, suggestion: &str) -> Result<(), SessionError> {
        let guard = self.refiner.claim(session_id, suggestion)?;
        let refiner = self.refiner.clone();
        let suggestion = suggestion.trim().to_string();
        self.spawn_run(session_id, async move { refiner.run(guard, suggestion).await });
        Ok(())
    }

    pub async fn commit(&self, session_id: &str) -> Result<String, SessionError> {
        self.committer.commit(session_id).await
    }

    pub fn poll(&self, session_id: &str) -> Result<PollResult, SessionError> {
        let session = self.store.get(session_id)?;
        let (messages, done) = self.events.drain_with_status(session_id);
        Ok(PollResult {
            messages,
            done,
            repo_url: session.url,
        })
    }

    pub fn subscribe(&self, session_id: &str) -> Result<Subscription, SessionError> {
        self.store.get(session_id)?;
        Ok(self.events.subscribe(session_id))
    }

    pub fn session(&self, session_id: &str) -> Result<Session, SessionError> {
        self.store.get(session_id)
    }

    /// Forget a session. A run still in flight finishes against nothing and
    /// its trailing events are discarded.
    pub fn teardown(&self, session_id: &str) -> Result<(), SessionError> {
        self.store
            .remove(session_id)?
            .ok_or_else(|| SessionError::not_found(session_id))?;
        self.events.close(session_id);
        info!(session_id, "session torn down");
        Ok(())
    }

    /// Tear down every session.
    pub fn shutdown(&self) {
        let ids = match self.store.ids() {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "could not list sessions on shutdown");
                return;
            }
        };
        let count = ids.len();
        for id in ids {
            if let Err(e) = self.teardown(&id) {
                warn!(session_id = %id, error = %e, "teardown failed");
            }
        }
        info!(count, "sessions cleared");
    }

    pub fn session_count(&self) -> usize {
        self.store.len()
    }

    fn spawn_run<F>(&self, session_id: &str, run: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let store = self.store.clone();
        let events = self.events.clone();
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            run.await;
            // Torn down mid-run: drop the events the runner emitted afterwards.
            if store.get(&session_id).is_err() {
                events.close(&session_id);
            }
        });
    }
}
