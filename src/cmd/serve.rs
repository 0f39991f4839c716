//! API server command: `macc serve`.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use macc::config::{MaccConfig, StorageKind};
use macc::orchestrator::Orchestrator;
use macc::service::{GenerationService, OpenRouterService};
use macc::storage::{GitHubStorage, MemoryStorage, StorageBackend};

pub async fn cmd_serve(
    config_path: &Path,
    port: Option<u16>,
    host: Option<String>,
    storage: Option<&str>,
) -> Result<()> {
    let mut config = MaccConfig::resolve(config_path)?;
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(storage) = storage {
        config.storage.backend = storage.parse()?;
    }

    macc::telemetry::init(&config.logging);
    for warning in config.validate() {
        warn!("{}", warning);
    }

    let service: Arc<dyn GenerationService> = Arc::new(
        OpenRouterService::from_config(&config.generation)
            .context("Failed to configure the generation service")?,
    );
    let storage: Arc<dyn StorageBackend> = match config.storage.backend {
        StorageKind::Github => Arc::new(
            GitHubStorage::from_config(&config.storage)
                .context("Failed to configure GitHub storage")?,
        ),
        StorageKind::Memory => Arc::new(MemoryStorage::new()),
    };
    info!(
        model = %config.generation.model,
        storage = %config.storage.backend,
        workers = config.pipeline.worker_pool_size,
        "starting MACC"
    );

    let orchestrator = Orchestrator::new(&config.pipeline, service, storage);
    macc::server::start_server(&config.server, orchestrator).await
}
