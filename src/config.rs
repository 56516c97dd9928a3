use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const MIN_THREADS: usize = 1;
pub const MAX_THREADS: usize = 256;

/// Engine settings, optionally read from a TOML file.
///
/// Missing keys fall back to [`EngineConfig::default`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Chunks (and concurrent range requests) per multi-chunk download.
    pub threads: usize,
    /// Downloads expected to run at once; sizes the connection pool.
    pub max_concurrent_tasks: usize,
    pub user_agent: String,
    pub connect_timeout_secs: u64,
    /// Timeout for the metadata request that creates a task.
    pub probe_timeout_secs: u64,
    /// Timeout for the range-support re-check at every start.
    pub recheck_timeout_secs: u64,
    /// Longest wait for the next body read inside a chunk worker.
    pub chunk_read_timeout_secs: u64,
    /// Longest wait for the next body read on the single-stream path.
    pub stream_read_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threads: 64,
            max_concurrent_tasks: 4,
            user_agent: concat!("rangefetch/", env!("CARGO_PKG_VERSION")).to_string(),
            connect_timeout_secs: 10,
            probe_timeout_secs: 15,
            recheck_timeout_secs: 10,
            chunk_read_timeout_secs: 60,
            stream_read_timeout_secs: 30,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut cfg: EngineConfig = toml::from_str(&data)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        cfg.threads = clamp_threads(cfg.threads);
        cfg.max_concurrent_tasks = cfg.max_concurrent_tasks.max(1);
        tracing::debug!(path = %path.display(), ?cfg, "loaded engine config");
        Ok(cfg)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn recheck_timeout(&self) -> Duration {
        Duration::from_secs(self.recheck_timeout_secs)
    }

    pub fn chunk_read_timeout(&self) -> Duration {
        Duration::from_secs(self.chunk_read_timeout_secs)
    }

    pub fn stream_read_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_read_timeout_secs)
    }

    /// Idle connections kept per host: enough for every worker of every
    /// concurrent download at the maximum thread count.
    pub fn pool_size(&self) -> usize {
        MAX_THREADS * self.max_concurrent_tasks.max(1)
    }
}

pub fn clamp_threads(threads: usize) -> usize {
    threads.clamp(MIN_THREADS, MAX_THREADS)
}
