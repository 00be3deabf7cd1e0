//! Configuration for node runtimes, the process group and logging

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{TesseraError, TesseraResult};

/// Worker pool sizes of one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Concurrent kernels on general-purpose cores
    pub cpu_workers: usize,
    /// Concurrent kernels on accelerators; zero disables accelerator entries
    pub accelerator_workers: usize,
    /// Threads driving task futures and transfers
    pub scheduler_threads: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            cpu_workers: 4,
            accelerator_workers: 0,
            scheduler_threads: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributedConfig {
    pub world_size: usize,
}

impl Default for DistributedConfig {
    fn default() -> Self {
        Self { world_size: 1 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub verbose: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TesseraConfig {
    pub runtime: RuntimeConfig,
    pub distributed: DistributedConfig,
    pub logging: LoggingConfig,
}

impl TesseraConfig {
    pub fn validate(&self) -> TesseraResult<()> {
        if self.distributed.world_size == 0 {
            return Err(TesseraError::ConfigurationError(
                "world_size must be at least 1".to_string(),
            ));
        }
        if self.runtime.cpu_workers == 0 {
            return Err(TesseraError::ConfigurationError(
                "cpu_workers must be at least 1".to_string(),
            ));
        }
        if self.runtime.scheduler_threads == 0 {
            return Err(TesseraError::ConfigurationError(
                "scheduler_threads must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn from_json(content: &str) -> TesseraResult<Self> {
        let config: TesseraConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> TesseraResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Holds the active configuration and its backing file
pub struct ConfigManager {
    config: Arc<RwLock<TesseraConfig>>,
    config_file: Option<PathBuf>,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self {
            config: Arc::new(RwLock::new(TesseraConfig::default())),
            config_file: None,
        }
    }

    pub fn with_config_file(mut self, path: PathBuf) -> Self {
        self.config_file = Some(path);
        self
    }

    pub fn load_from_file(&mut self, path: &Path) -> TesseraResult<()> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TesseraError::ConfigurationError(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config = TesseraConfig::from_json(&content)?;
        *self.config.write() = config;
        self.config_file = Some(path.to_path_buf());

        tracing::info!("Configuration loaded from {:?}", path);
        Ok(())
    }

    pub fn save_to_file(&self, path: &Path) -> TesseraResult<()> {
        let content = self.config.read().to_json()?;
        std::fs::write(path, content)?;
        tracing::info!("Configuration saved to {:?}", path);
        Ok(())
    }

    pub fn get_config(&self) -> TesseraConfig {
        self.config.read().clone()
    }

    /// Apply `f`, validate the result and persist it if a file is attached.
    /// An invalid update leaves the previous configuration in place.
    pub fn update_config<F>(&mut self, f: F) -> TesseraResult<()>
    where
        F: FnOnce(&mut TesseraConfig),
    {
        let mut updated = self.get_config();
        f(&mut updated);
        updated.validate()?;
        *self.config.write() = updated;

        if let Some(ref path) = self.config_file {
            self.save_to_file(path)?;
        }
        Ok(())
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ConfigBuilder {
    config: TesseraConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: TesseraConfig::default(),
        }
    }

    pub fn runtime(mut self, f: impl FnOnce(&mut RuntimeConfig)) -> Self {
        f(&mut self.config.runtime);
        self
    }

    pub fn distributed(mut self, f: impl FnOnce(&mut DistributedConfig)) -> Self {
        f(&mut self.config.distributed);
        self
    }

    pub fn logging(mut self, f: impl FnOnce(&mut LoggingConfig)) -> Self {
        f(&mut self.config.logging);
        self
    }

    pub fn world_size(self, world_size: usize) -> Self {
        self.distributed(|d| d.world_size = world_size)
    }

    pub fn build(self) -> TesseraResult<TesseraConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
