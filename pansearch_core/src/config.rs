//! Runtime configuration with defaults for every recognized option.
//!
//! The struct is plain data: loading it from a file or the environment is a
//! front-end concern. Tests and embedders construct it directly.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

fn default_true() -> bool {
    true
}

fn default_cache_ttl_minutes() -> u64 {
    60
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("./cache")
}

fn default_response_timeout_ms() -> u64 {
    4_000
}

fn default_plugin_timeout_ms() -> u64 {
    30_000
}

fn default_max_background_workers() -> usize {
    20
}

fn default_max_background_tasks() -> usize {
    100
}

fn default_async_cache_ttl_hours() -> u64 {
    1
}

fn default_concurrency() -> usize {
    8
}

fn default_batch_flush_interval_ms() -> u64 {
    5_000
}

fn default_batch_max_pending_bytes() -> usize {
    1024 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Master switch for the main two-level cache.
    #[serde(rename = "cacheEnabled")]
    pub cache_enabled: bool,

    /// TTL for aggregate cache writes, minutes.
    #[serde(rename = "cacheTTLMinutes")]
    pub cache_ttl_minutes: u64,

    /// Directory backing the disk tier.
    #[serde(rename = "cachePath")]
    pub cache_path: PathBuf,

    /// Gates the plugin sub-search entirely.
    #[serde(rename = "asyncPluginEnabled")]
    pub async_plugin_enabled: bool,

    /// Per-dispatch response budget, milliseconds.
    #[serde(rename = "asyncResponseTimeout")]
    pub async_response_timeout_ms: u64,

    /// Per-task hard cap, milliseconds.
    #[serde(rename = "pluginTimeout")]
    pub plugin_timeout_ms: u64,

    /// Worker-pool semaphore bound.
    #[serde(rename = "asyncMaxBackgroundWorkers")]
    pub async_max_background_workers: usize,

    /// Total background task counter bound.
    #[serde(rename = "asyncMaxBackgroundTasks")]
    pub async_max_background_tasks: usize,

    /// Per-plugin in-memory response cache TTL, hours.
    #[serde(rename = "asyncCacheTTLHours")]
    pub async_cache_ttl_hours: u64,

    /// Fan-out parallelism used when a request does not specify one.
    #[serde(rename = "defaultConcurrency")]
    pub default_concurrency: usize,

    /// Enables the merge-update log lines.
    #[serde(rename = "asyncLogEnabled")]
    pub async_log_enabled: bool,

    /// Batch writer flush-tick interval, milliseconds.
    #[serde(rename = "batchFlushIntervalMs")]
    pub batch_flush_interval_ms: u64,

    /// Pending-bytes threshold that forces an early batch flush.
    #[serde(rename = "batchMaxPendingBytes")]
    pub batch_max_pending_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_enabled: default_true(),
            cache_ttl_minutes: default_cache_ttl_minutes(),
            cache_path: default_cache_path(),
            async_plugin_enabled: default_true(),
            async_response_timeout_ms: default_response_timeout_ms(),
            plugin_timeout_ms: default_plugin_timeout_ms(),
            async_max_background_workers: default_max_background_workers(),
            async_max_background_tasks: default_max_background_tasks(),
            async_cache_ttl_hours: default_async_cache_ttl_hours(),
            default_concurrency: default_concurrency(),
            async_log_enabled: false,
            batch_flush_interval_ms: default_batch_flush_interval_ms(),
            batch_max_pending_bytes: default_batch_max_pending_bytes(),
        }
    }
}

impl Config {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.async_response_timeout_ms)
    }

    pub fn plugin_timeout(&self) -> Duration {
        Duration::from_millis(self.plugin_timeout_ms)
    }

    /// TTL of the per-plugin in-memory response cache.
    pub fn async_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.async_cache_ttl_hours * 3600)
    }

    /// TTL of aggregate main-cache writes.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_minutes * 60)
    }

    pub fn batch_flush_interval(&self) -> Duration {
        Duration::from_millis(self.batch_flush_interval_ms)
    }
}
