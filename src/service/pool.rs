use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use super::GenerationService;
use crate::errors::ServiceError;

/// Bounded execution context for generation-service calls.
///
/// At most `size` calls run at once; each runs on its own task with a
/// timeout, so a stuck or panicking call is reported as a `ServiceError`
/// instead of stalling the runner or the event path of other sessions.
#[derive(Clone)]
pub struct WorkerPool {
    service: Arc<dyn GenerationService>,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl WorkerPool {
    pub fn new(service: Arc<dyn GenerationService>, size: usize, timeout: Duration) -> Self {
        Self {
            service,
            permits: Arc::new(Semaphore::new(size.max(1))),
            timeout,
        }
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    pub async fn plan(&self, spec: &str) -> Result<Vec<String>, ServiceError> {
        let spec = spec.to_string();
        self.dispatch(move |svc| async move { svc.plan(&spec).await })
            .await
    }

    pub async fn generate(&self, spec: &str) -> Result<String, ServiceError> {
        let spec = spec.to_string();
        self.dispatch(move |svc| async move { svc.generate(&spec).await })
            .await
    }

    pub async fn review(&self, artifact: &str, instructions: &str) -> Result<String, ServiceError> {
        let artifact = artifact.to_string();
        let instructions = instructions.to_string();
        self.dispatch(move |svc| async move { svc.review(&artifact, &instructions).await })
            .await
    }

    async fn dispatch<F, Fut, T>(&self, call: F) -> Result<T, ServiceError>
    where
        F: FnOnce(Arc<dyn GenerationService>) -> Fut,
        Fut: Future<Output = Result<T, ServiceError>> + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| ServiceError::Request(format!("worker pool closed: {}", e)))?;

        let handle = tokio::spawn(call(Arc::clone(&self.service)));
        let abort = handle.abort_handle();
        match tokio::time::timeout(self.timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(ServiceError::Panicked(join_err.to_string())),
            Err(_) => {
                abort.abort();
                Err(ServiceError::Timeout {
                    secs: self.timeout.as_secs(),
                })
            }
        }
    }
}
