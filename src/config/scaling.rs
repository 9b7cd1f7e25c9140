//! Autoscaler tuning, loadable from TOML.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// How the autoscaler samples the backlog and how far it may grow.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScalingConfig {
    /// Sampling interval in milliseconds.
    pub interval_ms: u64,
    /// Consecutive full (or empty) samples required before scaling up (or down).
    pub threshold: u32,
    /// Upper bound on live workers.
    pub max_workers: usize,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            threshold: 5,
            max_workers: 50,
        }
    }
}

impl ScalingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    /// Load from a TOML file. Missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read scaling config {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
            .map_err(|e| Error::Config(format!("bad scaling config {}: {e}", path.display())))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        if config.max_workers == 0 {
            return Err(Error::Config("max_workers must be at least 1".to_string()));
        }
        Ok(config)
    }
}
