//! Configuration for the disk-usage tracker

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::model::ProjectId;

/// Tracker configuration, deserializable from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskUsageConfig {
    /// Interval between periodic full sweeps.
    #[serde(with = "humantime_serde", default = "default_recalc_interval")]
    pub recalc_interval: Duration,

    /// When set, list directories on the node beyond the tracked workspace
    /// paths to find strays left by removed matrix configurations.
    #[serde(default)]
    pub check_workspace_on_node: bool,

    /// Projects excluded from all calculation.
    #[serde(default)]
    pub excluded_projects: Vec<ProjectId>,

    /// Per-project usage limits in bytes; absent means unbounded.
    #[serde(default)]
    pub thresholds: HashMap<ProjectId, u64>,

    /// Directory holding the persisted usage records.
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,
}

impl Default for DiskUsageConfig {
    fn default() -> Self {
        Self {
            recalc_interval: default_recalc_interval(),
            check_workspace_on_node: false,
            excluded_projects: Vec::new(),
            thresholds: HashMap::new(),
            storage_root: default_storage_root(),
        }
    }
}

impl DiskUsageConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Configured limit for a project, if any.
    pub fn threshold(&self, project: &str) -> Option<u64> {
        self.thresholds.get(project).copied()
    }

    pub fn is_excluded(&self, project: &str) -> bool {
        self.excluded_projects.iter().any(|p| p == project)
    }
}

fn default_recalc_interval() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_storage_root() -> PathBuf {
    PathBuf::from(".diskwatch")
}
