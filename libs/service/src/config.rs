use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExpandConfig {
    pub data_dir: PathBuf,
    /// Overrides the segment count recorded in the catalog.
    pub segment_count: Option<u32>,
    /// Partitions redistributed at the same time.
    pub workers: usize,
    /// Upper bound on concurrently open execution sessions.
    pub max_sessions: usize,
    pub max_retries: usize,
    pub retry_backoff: Duration,
    /// Stop starting new partitions once this much time has passed.
    pub deadline: Option<Duration>,
    pub release_early_locks: bool,
}

impl Default for ExpandConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            segment_count: None,
            workers: 1,
            max_sessions: 16,
            max_retries: 0,
            retry_backoff: Duration::from_secs(5),
            deadline: None,
            release_early_locks: false,
        }
    }
}

impl ExpandConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)
            .with_context(|| format!("failed to read config file '{}'", path.display()))?;
        let config: ExpandConfig = serde_json::from_slice(&data)
            .with_context(|| format!("failed to parse config file '{}'", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.workers > 0, "workers must be positive");
        anyhow::ensure!(self.max_sessions > 0, "max_sessions must be positive");
        anyhow::ensure!(
            self.segment_count != Some(0),
            "segment_count must be positive"
        );
        Ok(())
    }
}
