//! Configuration loader and validator for the build orchestrator.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub queue: Queue,
    pub debounce: Debounce,
    pub build: Build,
    pub storage: Storage,
    pub services: Services,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub work_dir: String,
}

/// Broker queue settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Queue {
    /// Main build queue name; retry tiers and the dead-letter queue derive
    /// their names from it.
    pub topic: String,
    /// Queue carrying catalog change notifications and tenant requests.
    pub events_queue: String,
    /// Max concurrently in-flight pipeline executions per consumer.
    pub prefetch: usize,
    /// Priority levels provisioned on the build queue (1..=10); higher
    /// publish priorities are capped at this level.
    pub max_priority: u8,
}

/// Debounce windows, per trigger class.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Debounce {
    pub rebuild_window_seconds: u64,
    pub patch_window_seconds: u64,
}

/// Static-site toolchain settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Build {
    pub install_command: Vec<String>,
    pub build_command: Vec<String>,
    /// Directory (relative to the generated project) the toolchain emits.
    pub output_dir: String,
    /// Wall-clock bound for each toolchain subprocess.
    pub timeout_seconds: u64,
}

/// Blob store settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Storage {
    pub endpoint: String,
    pub bucket: String,
}

/// Collaborator RPC endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Services {
    pub catalog_url: String,
    pub billing_url: String,
    pub deploy_url: String,
    pub rpc_timeout_seconds: u64,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` and
    /// `app.work_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        for dir in [&self.app.data_dir, &self.app.work_dir] {
            if !dir.trim().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        Ok(())
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.work_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.work_dir must be non-empty"));
    }

    if cfg.queue.topic.trim().is_empty() {
        return Err(ConfigError::Invalid("queue.topic must be non-empty"));
    }
    if cfg.queue.events_queue.trim().is_empty() {
        return Err(ConfigError::Invalid("queue.events_queue must be non-empty"));
    }
    if cfg.queue.prefetch == 0 {
        return Err(ConfigError::Invalid("queue.prefetch must be > 0"));
    }
    if cfg.queue.max_priority == 0 || cfg.queue.max_priority > 10 {
        return Err(ConfigError::Invalid("queue.max_priority must be 1..=10"));
    }

    if cfg.debounce.rebuild_window_seconds == 0 {
        return Err(ConfigError::Invalid(
            "debounce.rebuild_window_seconds must be > 0",
        ));
    }
    if cfg.debounce.patch_window_seconds == 0 {
        return Err(ConfigError::Invalid(
            "debounce.patch_window_seconds must be > 0",
        ));
    }

    if cfg.build.install_command.is_empty() {
        return Err(ConfigError::Invalid("build.install_command must be non-empty"));
    }
    if cfg.build.build_command.is_empty() {
        return Err(ConfigError::Invalid("build.build_command must be non-empty"));
    }
    if cfg.build.output_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("build.output_dir must be non-empty"));
    }
    if cfg.build.timeout_seconds == 0 {
        return Err(ConfigError::Invalid("build.timeout_seconds must be > 0"));
    }

    if cfg.storage.endpoint.trim().is_empty() {
        return Err(ConfigError::Invalid("storage.endpoint must be non-empty"));
    }
    if cfg.storage.bucket.trim().is_empty() {
        return Err(ConfigError::Invalid("storage.bucket must be non-empty"));
    }

    if cfg.services.catalog_url.trim().is_empty() {
        return Err(ConfigError::Invalid("services.catalog_url must be non-empty"));
    }
    if cfg.services.billing_url.trim().is_empty() {
        return Err(ConfigError::Invalid("services.billing_url must be non-empty"));
    }
    if cfg.services.deploy_url.trim().is_empty() {
        return Err(ConfigError::Invalid("services.deploy_url must be non-empty"));
    }
    if cfg.services.rpc_timeout_seconds == 0 {
        return Err(ConfigError::Invalid(
            "services.rpc_timeout_seconds must be > 0",
        ));
    }

    Ok(())
}

/// Example configuration document, kept in sync with the schema.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  work_dir: "./data/work"

queue:
  topic: "site_build"
  events_queue: "site_events"
  prefetch: 3
  max_priority: 10

debounce:
  rebuild_window_seconds: 20
  patch_window_seconds: 5

build:
  install_command: ["npm", "ci"]
  build_command: ["npm", "run", "build"]
  output_dir: "dist"
  timeout_seconds: 900

storage:
  endpoint: "http://storage.internal:9000"
  bucket: "site-artifacts"

services:
  catalog_url: "http://catalog.internal:8080"
  billing_url: "http://billing.internal:8080"
  deploy_url: "http://deployer.internal:8080"
  rpc_timeout_seconds: 5
"#
}
