//! Layered configuration for the collaborator.
//!
//! Settings are read from `macc.toml` (optional), then overridden by
//! environment variables, then by CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8000
//! cors_permissive = false
//!
//! [pipeline]
//! min_spec_len = 3
//! worker_pool_size = 3
//! service_timeout_secs = 300
//! artifact_path = "main.py"
//! description_path = "README.md"
//!
//! [generation]
//! base_url = "https://openrouter.ai/api/v1"
//! model = "x-ai/grok-4-fast:free"
//! api_key_env = "OPENROUTER_API_KEY"
//! temperature = 0.2
//!
//! [storage]
//! backend = "github"
//! token_env = "GITHUB_TOKEN"
//! branch = "main"
//!
//! [logging]
//! level = "info"
//! format = "fmt"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "macc.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allow any origin (for a locally served UI on another port)
    #[serde(default)]
    pub cors_permissive: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_permissive: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Minimum trimmed spec length accepted at session creation
    #[serde(default = "default_min_spec_len")]
    pub min_spec_len: usize,
    /// Concurrent generation-service calls across all sessions
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    /// Per-call timeout for the generation service
    #[serde(default = "default_service_timeout_secs")]
    pub service_timeout_secs: u64,
    #[serde(default = "default_artifact_path")]
    pub artifact_path: String,
    #[serde(default = "default_description_path")]
    pub description_path: String,
}

fn default_min_spec_len() -> usize {
    3
}

fn default_worker_pool_size() -> usize {
    3
}

fn default_service_timeout_secs() -> u64 {
    300
}

fn default_artifact_path() -> String {
    "main.py".to_string()
}

fn default_description_path() -> String {
    "README.md".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_spec_len: default_min_spec_len(),
            worker_pool_size: default_worker_pool_size(),
            service_timeout_secs: default_service_timeout_secs(),
            artifact_path: default_artifact_path(),
            description_path: default_description_path(),
        }
    }
}

impl PipelineConfig {
    pub fn service_timeout(&self) -> Duration {
        Duration::from_secs(self.service_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Name of the env var holding the API key (the key itself is never stored)
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_model() -> String {
    "x-ai/grok-4-fast:free".to_string()
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Github,
    Memory,
}

impl std::fmt::Display for StorageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageKind::Github => write!(f, "github"),
            StorageKind::Memory => write!(f, "memory"),
        }
    }
}

impl std::str::FromStr for StorageKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "github" => Ok(StorageKind::Github),
            "memory" => Ok(StorageKind::Memory),
            _ => anyhow::bail!("Invalid storage backend '{}'. Valid values: github, memory", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageKind,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_branch")]
    pub branch: String,
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageKind::default(),
            token_env: default_token_env(),
            branch: default_branch(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Fmt,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fmt" | "text" => Ok(LogFormat::Fmt),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Invalid log format '{}'. Valid values: fmt, json", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Root of `macc.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaccConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl MaccConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse macc.toml")
    }

    /// Load from `path`, or defaults if the file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_toml()?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize macc.toml")
    }

    /// Full layering: file (if present), then the process environment.
    pub fn resolve(path: &Path) -> Result<Self> {
        let mut config = Self::load_or_default(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply environment overrides using `lookup` as the variable source.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("Invalid PORT value '{}'", port))?;
        }
        if let Some(model) = lookup("MACC_MODEL") {
            self.generation.model = model;
        }
        if let Some(backend) = lookup("MACC_STORAGE_BACKEND") {
            self.storage.backend = backend.parse()?;
        }
        if let Some(format) = lookup("MACC_LOG_FORMAT") {
            self.logging.format = format.parse()?;
        }
        Ok(())
    }

    /// Human-readable warnings for settings that parse but make little sense.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.pipeline.worker_pool_size == 0 {
            warnings.push("pipeline.worker_pool_size is 0; one worker will be used".to_string());
        }
        if self.pipeline.service_timeout_secs == 0 {
            warnings.push(
                "pipeline.service_timeout_secs is 0; every generation call will time out"
                    .to_string(),
            );
        }
        if self.pipeline.artifact_path == self.pipeline.description_path {
            warnings.push(
                "pipeline.artifact_path and description_path are the same file".to_string(),
            );
        }
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            warnings.push(format!(
                "generation.temperature {} is outside 0.0..=2.0",
                self.generation.temperature
            ));
        }
        warnings
    }
}
