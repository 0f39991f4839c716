use tracing::{error, info, warn};

use super::templates::{self, FALLBACK_STUB};
use crate::errors::SessionError;
use crate::service::WorkerPool;
use crate::session::{EventChannel, EventKind, SessionGuard, SessionStore, Stage};

/// Drives a new session through Plan → Generate → Review → Ready.
///
/// Service failures at each stage are recovered in place (see the stage
/// methods); anything else escaping the stages forces the session to
/// `Failed`. Either way the run ends with exactly one Done event.
#[derive(Clone)]
pub struct PipelineRunner {
    store: SessionStore,
    events: EventChannel,
    pool: WorkerPool,
}

impl PipelineRunner {
    pub fn new(store: SessionStore, events: EventChannel, pool: WorkerPool) -> Self {
        Self {
            store,
            events,
            pool,
        }
    }

    /// Claim a freshly created session and run it to completion.
    pub async fn start(&self, session_id: &str) -> Result<(), SessionError> {
        let guard = self.claim(session_id)?;
        self.run(guard).await;
        Ok(())
    }

    /// Take the execution lock without waiting.
    ///
    /// Fails with `Conflict` (and an Error event) if another runner owns the
    /// session or it has already left `Created`.
    pub fn claim(&self, session_id: &str) -> Result<SessionGuard, SessionError> {
        let Some(guard) = SessionGuard::execution(&self.store, session_id)? else {
            self.events
                .error(session_id, "Conflict: session is already running");
            return Err(SessionError::conflict(session_id, "execution lock held"));
        };
        let stage = self.store.get(session_id)?.stage();
        if stage != Stage::Created {
            guard.release();
            self.events.error(
                session_id,
                format!("Conflict: session already started (stage {})", stage),
            );
            return Err(SessionError::conflict(
                session_id,
                format!("cannot start from stage {}", stage),
            ));
        }
        self.events.begin_run(session_id);
        Ok(guard)
    }

    /// Run all stages for a claimed session, then release and emit Done.
    pub async fn run(&self, guard: SessionGuard) {
        let session_id = guard.session_id().to_string();
        let this = self.clone();
        let sid = session_id.clone();
        // Stages run on their own task so a panic is caught as a JoinError.
        let outcome = tokio::spawn(async move { this.run_stages(&sid).await }).await;

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(join_err) => Some(format!("pipeline task panicked: {}", join_err)),
        };
        if let Some(reason) = failure {
            error!(session_id = %session_id, error = %reason, "pipeline failed");
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

    async fn run_stages(&self, session_id: &str) -> Result<(), SessionError> {
        let session = self.store.get(session_id)?;
        let spec = session.spec;
        let repo = session.repo;
        info!(session_id, repo = %repo, "pipeline started");
        self.events
            .status(session_id, "Starting project generation...");
        self.events
            .status(session_id, format!("Repository: {}", repo));

        self.plan_stage(session_id, &spec).await?;
        let generated = self.generate_stage(session_id, &spec).await?;
        self.review_stage(session_id, &spec, &generated).await?;

        let description = templates::description(&repo, &spec);
        self.store.update(session_id, |s| {
            s.description = description.clone();
            Ok(())
        })?;
        self.events
            .enqueue(session_id, EventKind::Description, description);
        self.events
            .status(session_id, format!("Project ready. Repo to use: {}", repo));
        self.store
            .update(session_id, |s| s.set_stage(Stage::Ready))?;
        info!(session_id, "pipeline ready");
        Ok(())
    }

    /// Planner failure is non-fatal: the task list is left empty.
    async fn plan_stage(&self, session_id: &str, spec: &str) -> Result<(), SessionError> {
        self.store
            .update(session_id, |s| s.set_stage(Stage::Planning))?;
        self.events
            .status(session_id, "Planner: breaking down tasks...");

        let tasks = match self.pool.plan(spec).await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(session_id, error = %e, "planner failed; continuing without tasks");
                self.events
                    .status(session_id, format!("Planner failed: {}", e));
                Vec::new()
            }
        };
        let count = tasks.len();
        self.store.update(session_id, move |s| {
            s.tasks = tasks;
            Ok(())
        })?;
        self.events
            .status(session_id, format!("Planner completed ({} tasks).", count));
        Ok(())
    }

    /// Empty or failed generation falls back to the placeholder stub.
    async fn generate_stage(&self, session_id: &str, spec: &str) -> Result<String, SessionError> {
        self.store
            .update(session_id, |s| s.set_stage(Stage::Generating))?;
        self.events
            .status(session_id, "Coder: generating code...");

        let generated = match self.pool.generate(spec).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                warn!(session_id, "coder returned empty output; using placeholder");
                self.events.status(
                    session_id,
                    "Warning: coder returned empty output; using placeholder.",
                );
                FALLBACK_STUB.to_string()
            }
            Err(e) => {
                warn!(session_id, error = %e, "coder failed; using placeholder");
                self.events.status(
                    session_id,
                    format!("Warning: coder failed ({}); using placeholder.", e),
                );
                FALLBACK_STUB.to_string()
            }
        };

        self.store.update(session_id, |s| {
            s.artifact = generated.clone();
            Ok(())
        })?;
        self.events.artifact_lines(session_id, &generated);
        self.events
            .status(session_id, "Coder completed generation.");
        self.store
            .update(session_id, |s| s.set_stage(Stage::Reviewing))?;
        Ok(generated)
    }

    /// A failed or empty review keeps the generated artifact.
    async fn review_stage(
        &self,
        session_id: &str,
        spec: &str,
        generated: &str,
    ) -> Result<(), SessionError> {
        self.events
            .status(session_id, "Reviewer: reviewing code...");
        let instructions = templates::review_instructions(spec);

        match self.pool.review(generated, &instructions).await {
            Ok(reviewed) if !reviewed.trim().is_empty() => {
                self.store.update(session_id, |s| {
                    s.artifact = reviewed.clone();
                    Ok(())
                })?;
                self.events.status(
                    session_id,
                    "Reviewer completed review; streaming refined code...",
                );
                self.events.artifact_lines(session_id, &reviewed);
            }
            Ok(_) => {
                warn!(session_id, "reviewer returned empty output; keeping generated code");
                self.events.status(
                    session_id,
                    "Warning: reviewer returned empty output; keeping generated code.",
                );
            }
            Err(e) => {
                warn!(session_id, error = %e, "reviewer failed; keeping generated code");
                self.events.status(
                    session_id,
                    format!("Warning: reviewer failed ({}); keeping generated code.", e),
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::templates::is_fallback_stub;
    use crate::orchestrator::testing::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn runner(service: ScriptedService) -> (PipelineRunner, SessionStore, EventChannel) {
        let (store, events) = fixture();
        let runner = PipelineRunner::new(store.clone(), events.clone(), pool(Arc::new(service)));
        (runner, store, events)
    }

    #[tokio::test]
    async fn test_calculator_scenario_reaches_ready() {
        let (runner, store, events) = runner(ScriptedService::default());
        let id = store.create("Build a calculator", None).unwrap();
        runner.start(&id).await.unwrap();

        let session = store.get(&id).unwrap();
        assert_eq!(session.stage(), Stage::Ready);
        assert!(!session.artifact.is_empty());
        assert!(!session.is_locked());
        assert_eq!(session.tasks.len(), 2);
        assert!(session.description.contains("Build a calculator"));

        let drained = events.drain(&id);
        let kinds = kinds(&drained);
        assert_eq!(kinds.iter().filter(|k| **k == EventKind::Done).count(), 1);
        assert_eq!(kinds.last(), Some(&EventKind::Done));
        assert!(kinds.contains(&EventKind::Description));
        assert!(events.is_finished(&id));
    }

    #[tokio::test]
    async fn test_artifact_lines_stream_generated_then_reviewed() {
        let (runner, store, events) = runner(ScriptedService::default());
        let id = store.create("Build a calculator", None).unwrap();
        runner.start(&id).await.unwrap();

        let drained = events.drain(&id);
        assert_eq!(
            artifact_text(&drained),
            vec![
                "def add(a, b):",
                "    return a + b",
                "def add(a: int, b: int) -> int:",
                "    return a + b",
            ]
        );
        let seqs: Vec<u64> = drained.iter().map(|e| e.seq).collect();
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_empty_generation_uses_fallback_stub() {
        let service = ScriptedService {
            generate: Ok("   \n".into()),
            review: Ok(String::new()),
            ..Default::default()
        };
        let (runner, store, events) = runner(service);
        let id = store.create("Build a calculator", None).unwrap();
        runner.start(&id).await.unwrap();

        let session = store.get(&id).unwrap();
        assert_eq!(session.stage(), Stage::Ready);
        assert!(is_fallback_stub(&session.artifact));
        let drained = events.drain(&id);
        assert!(drained.iter().any(|e| e.message.contains("using placeholder")));
    }

    #[tokio::test]
    async fn test_generation_error_uses_fallback_stub() {
        let service = ScriptedService {
            generate: Err("rate limited".into()),
            review: Ok(String::new()),
            ..Default::default()
        };
        let (runner, store, _events) = runner(service);
        let id = store.create("Build a calculator", None).unwrap();
        runner.start(&id).await.unwrap();
        assert!(is_fallback_stub(&store.get(&id).unwrap().artifact));
    }

    #[tokio::test]
    async fn test_review_failure_keeps_generated_artifact() {
        let service = ScriptedService {
            review: Err("reviewer offline".into()),
            ..Default::default()
        };
        let (runner, store, events) = runner(service);
        let id = store.create("Build a calculator", None).unwrap();
        runner.start(&id).await.unwrap();

        let session = store.get(&id).unwrap();
        assert_eq!(session.artifact, "def add(a, b):\n    return a + b\n");
        assert_eq!(session.stage(), Stage::Ready);
        let drained = events.drain(&id);
        assert!(drained.iter().any(|e| e.message.contains("reviewer failed")));
        assert_eq!(artifact_text(&drained).len(), 2);
    }

    #[tokio::test]
    async fn test_review_panic_keeps_generated_artifact() {
        let service = ScriptedService {
            review_panics: true,
            ..Default::default()
        };
        let (runner, store, _events) = runner(service);
        let id = store.create("Build a calculator", None).unwrap();
        runner.start(&id).await.unwrap();

        let session = store.get(&id).unwrap();
        assert_eq!(session.stage(), Stage::Ready);
        assert_eq!(session.artifact, "def add(a, b):\n    return a + b\n");
    }

    #[tokio::test]
    async fn test_plan_failure_is_non_fatal() {
        let service = ScriptedService {
            plan: Err("planner down".into()),
            ..Default::default()
        };
        let (runner, store, events) = runner(service);
        let id = store.create("Build a calculator", None).unwrap();
        runner.start(&id).await.unwrap();

        let session = store.get(&id).unwrap();
        assert_eq!(session.stage(), Stage::Ready);
        assert!(session.tasks.is_empty());
        let drained = events.drain(&id);
        let planner_failed = drained
            .iter()
            .position(|e| e.message.contains("Planner failed"))
            .unwrap();
        let coder_started = drained
            .iter()
            .position(|e| e.message.contains("Coder: generating"))
            .unwrap();
        assert!(planner_failed < coder_started);
        assert_eq!(drained[planner_failed].kind, EventKind::Status);
    }

    #[tokio::test]
    async fn test_concurrent_start_exactly_one_proceeds() {
        let service = ScriptedService {
            delay: Duration::from_millis(30),
            ..Default::default()
        };
        let (runner, store, events) = runner(service);
        let id = store.create("Build a calculator", None).unwrap();

        let first = runner.claim(&id);
        let second = runner.claim(&id);
        assert!(first.is_ok());
        assert!(matches!(second, Err(SessionError::Conflict { .. })));

        runner.run(first.unwrap()).await;
        let drained = events.drain(&id);
        assert_eq!(drained[0].kind, EventKind::Error);
        assert_eq!(
            drained.iter().filter(|e| e.kind == EventKind::Done).count(),
            1
        );
        assert_eq!(store.get(&id).unwrap().stage(), Stage::Ready);
    }

    #[tokio::test]
    async fn test_start_after_completion_conflicts() {
        let (runner, store, _events) = runner(ScriptedService::default());
        let id = store.create("Build a calculator", None).unwrap();
        runner.start(&id).await.unwrap();
        let err = runner.start(&id).await.unwrap_err();
        assert!(matches!(err, SessionError::Conflict { .. }));
        assert_eq!(store.get(&id).unwrap().stage(), Stage::Ready);
        assert!(!store.get(&id).unwrap().is_locked());
    }

    #[tokio::test]
    async fn test_stage_error_marks_failed_with_error_then_single_done() {
        let (runner, store, events) = runner(ScriptedService::default());
        let id = store.create("Build a calculator", None).unwrap();
        let guard = runner.claim(&id).unwrap();
        // Moving the stage under the runner makes its first transition invalid.
        store
            .update(&id, |s| s.set_stage(Stage::Planning))
            .unwrap();
        runner.run(guard).await;

        let session = store.get(&id).unwrap();
        assert_eq!(session.stage(), Stage::Failed);
        assert!(!session.is_locked());

        let drained = events.drain(&id);
        let kinds = kinds(&drained);
        assert_eq!(kinds.iter().filter(|k| **k == EventKind::Done).count(), 1);
        assert_eq!(kinds.last(), Some(&EventKind::Done));
        let error = drained
            .iter()
            .position(|e| e.kind == EventKind::Error)
            .unwrap();
        assert!(drained[error].message.starts_with("Unhandled error:"));
        assert_eq!(error, drained.len() - 2);
        assert!(events.is_finished(&id));
    }

    #[tokio::test]
    async fn test_start_unknown_session_is_not_found() {
        let (runner, _store, _events) = runner(ScriptedService::default());
        assert!(matches!(
            runner.start("missing").await,
            Err(SessionError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_teardown_mid_run_still_emits_done() {
        let service = ScriptedService {
            delay: Duration::from_millis(30),
            ..Default::default()
        };
        let (runner, store, events) = runner(service);
        let id = store.create("Build a calculator", None).unwrap();
        let guard = runner.claim(&id).unwrap();
        let mut sub = events.subscribe(&id);
        let handle = tokio::spawn({
            let runner = runner.clone();
            async move { runner.run(guard).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        store.remove(&id).unwrap();
        handle.await.unwrap();

        let mut last = None;
        while let Some(event) = sub.next().await {
            last = Some(event);
        }
        let last = last.unwrap();
        assert!(last.is_done());
    }
}
