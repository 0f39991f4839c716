//! Test doubles shared by the runner tests.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::ServiceError;
use crate::service::{GenerationService, WorkerPool};
use crate::session::{Event, EventChannel, EventKind, SessionStore};

/// Generation service with canned replies per operation.
pub struct ScriptedService {
    pub plan: Result<Vec<String>, String>,
    pub generate: Result<String, String>,
    pub review: Result<String, String>,
    pub review_panics: bool,
    pub delay: Duration,
    pub review_calls: AtomicUsize,
    pub last_instructions: Mutex<Option<String>>,
}

impl Default for ScriptedService {
    fn default() -> Self {
        Self {
            plan: Ok(vec!["parse input".into(), "compute".into()]),
            generate: Ok("def add(a, b):\n    return a + b\n".into()),
            review: Ok("def add(a: int, b: int) -> int:\n    return a + b\n".into()),
            review_panics: false,
            delay: Duration::ZERO,
            review_calls: AtomicUsize::new(0),
            last_instructions: Mutex::new(None),
        }
    }
}

impl ScriptedService {
    pub fn review_calls(&self) -> usize {
        self.review_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationService for ScriptedService {
    async fn plan(&self, _spec: &str) -> Result<Vec<String>, ServiceError> {
        tokio::time::sleep(self.delay).await;
        self.plan.clone().map_err(ServiceError::Request)
    }

    async fn generate(&self, _spec: &str) -> Result<String, ServiceError> {
        tokio::time::sleep(self.delay).await;
        self.generate.clone().map_err(ServiceError::Request)
    }

    async fn review(&self, _artifact: &str, instructions: &str) -> Result<String, ServiceError> {
        self.review_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_instructions.lock().unwrap() = Some(instructions.to_string());
        tokio::time::sleep(self.delay).await;
        if self.review_panics {
            panic!("reviewer crashed");
        }
        self.review.clone().map_err(ServiceError::Request)
    }
}

pub fn pool(service: Arc<ScriptedService>) -> WorkerPool {
    WorkerPool::new(service, 2, Duration::from_secs(5))
}

pub fn kinds(events: &[Event]) -> Vec<EventKind> {
    events.iter().map(|e| e.kind).collect()
}

pub fn artifact_text(events: &[Event]) -> Vec<&str> {
    events
        .iter()
        .filter(|e| e.kind == EventKind::Artifact)
        .map(|e| e.message.as_str())
        .collect()
}

pub fn fixture() -> (SessionStore, EventChannel) {
    (SessionStore::new(3), EventChannel::new())
}
