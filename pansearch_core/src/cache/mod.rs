//! The main result cache: a memory tier and a disk tier behind one
//! serializer, fed by a delayed-batch write manager.

mod batch;
mod disk;
mod keys;
mod memory;
mod two_level;

pub use batch::{BatchWriteManager, CacheOperation, DiskWriter};
pub use keys::{generate_plugin_cache_key, generate_tg_cache_key};
pub use two_level::TwoLevelCache;

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::SearchError;
use crate::model::SearchResult;

/// Symmetric result-list codec shared by the cache tiers and the plugins'
/// merge-update path. One implementation per deployment; both tiers and all
/// writers must agree on it across process restarts.
pub trait Serializer: Send + Sync {
    fn serialize(&self, results: &[SearchResult]) -> Result<Vec<u8>, SearchError>;
    fn deserialize(&self, data: &[u8]) -> Result<Vec<SearchResult>, SearchError>;
}

/// JSON codec. Self-describing, stable across restarts, debuggable on disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, results: &[SearchResult]) -> Result<Vec<u8>, SearchError> {
        Ok(serde_json::to_vec(results)?)
    }

    fn deserialize(&self, data: &[u8]) -> Result<Vec<SearchResult>, SearchError> {
        Ok(serde_json::from_slice(data)?)
    }
}

pub fn shared_serializer() -> Arc<dyn Serializer> {
    Arc::new(JsonSerializer)
}

/// A cached value with the instant it was written, used for the
/// disk-newer-than-memory comparison.
#[derive(Debug, Clone)]
pub(crate) struct TimedValue {
    pub data: Vec<u8>,
    pub written_at: DateTime<Utc>,
}
