//! Engine configuration from YAML

use crate::retry::ParallelRetryPolicy;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tunables of the plan/retry/rollback engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Executions older than this many days cannot be retried
    #[serde(default = "default_retry_window_days")]
    pub retry_window_days: i64,

    /// Which siblings of a partially selected parallel group re-run
    #[serde(default)]
    pub parallel_retry_policy: ParallelRetryPolicy,

    /// Run the static reference validator before building a plan
    #[serde(default = "default_validate_static_references")]
    pub validate_static_references: bool,
}

fn default_retry_window_days() -> i64 {
    30
}

fn default_validate_static_references() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry_window_days: default_retry_window_days(),
            parallel_retry_policy: ParallelRetryPolicy::default(),
            validate_static_references: default_validate_static_references(),
        }
    }
}

impl EngineConfig {
    /// Load engine configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse engine configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the engine configuration
    pub fn validate(&self) -> Result<()> {
        if self.retry_window_days <= 0 {
            anyhow::bail!(
                "retryWindowDays must be positive, got {}",
                self.retry_window_days
            );
        }
        Ok(())
    }
}
