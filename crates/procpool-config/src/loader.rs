//! Configuration loading from files and environment

use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use tracing::debug;

use crate::{error::Result, types::PoolConfig};

/// Loads [`PoolConfig`] from an optional file plus `PROCPOOL__*` variables
pub struct ConfigLoader {
    /// Configuration file path
    config_path: Option<PathBuf>,
    /// Environment prefix
    env_prefix: String,
}

impl ConfigLoader {
    /// Create a loader that only reads the environment
    pub fn new() -> Self {
        Self {
            config_path: None,
            env_prefix: "PROCPOOL".to_string(),
        }
    }

    /// Create with a config file path (the file may be absent)
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: Some(path.into()),
            env_prefix: "PROCPOOL".to_string(),
        }
    }

    /// Override the environment prefix
    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Load, deserialize and validate
    pub fn load(&self) -> Result<PoolConfig> {
        let mut builder = Config::builder();
        if let Some(path) = &self.config_path {
            debug!(path = %path.display(), "Loading pool configuration");
            builder = builder.add_source(File::from(path.clone()).required(false));
        }
        builder = builder.add_source(
            Environment::with_prefix(&self.env_prefix)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: PoolConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Write a configuration as TOML
    pub fn save(path: &Path, config: &PoolConfig) -> Result<()> {
        config.validate()?;
        let toml = toml::to_string_pretty(config)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml)?;
        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
