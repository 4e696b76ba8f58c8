//! The two-level main cache: memory for latency, disk for survival.
//!
//! Reads prefer the disk tier when it is newer than the memory tier, so
//! background writes from other processes (or a previous run) become visible.
//! The dispatcher additionally deletes the memory entry before a read to
//! force that comparison on the query path.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::disk::DiskCache;
use super::memory::MemoryCache;
use super::{shared_serializer, Serializer};
use crate::error::SearchError;

pub struct TwoLevelCache {
    memory: MemoryCache,
    disk: DiskCache,
    serializer: Arc<dyn Serializer>,
}

impl TwoLevelCache {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, SearchError> {
        Ok(Self {
            memory: MemoryCache::new(),
            disk: DiskCache::new(dir)?,
            serializer: shared_serializer(),
        })
    }

    /// The codec every reader and writer of this cache must use.
    pub fn serializer(&self) -> Arc<dyn Serializer> {
        Arc::clone(&self.serializer)
    }

    /// Fetch a value, preferring whichever tier holds the newer write. A disk
    /// win repopulates the memory tier for subsequent reads.
    pub async fn get(&self, key: &str) -> Result<(Vec<u8>, bool), SearchError> {
        let memory = self.memory.get(key);
        let disk = self.disk.get(key).await?;

        match (memory, disk) {
            (Some(mem), Some(dsk)) => {
                if dsk.written_at > mem.written_at {
                    Ok((dsk.data, true))
                } else {
                    Ok((mem.data, true))
                }
            }
            (Some(mem), None) => Ok((mem.data, true)),
            (None, Some(dsk)) => Ok((dsk.data, true)),
            (None, None) => Ok((Vec::new(), false)),
        }
    }

    pub async fn set_memory_only(
        &self,
        key: &str,
        data: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), SearchError> {
        self.memory.set(key, data, ttl);
        Ok(())
    }

    pub async fn set_both_levels(
        &self,
        key: &str,
        data: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), SearchError> {
        self.disk.set(key, &data, ttl).await?;
        self.memory.set(key, data, ttl);
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<(), SearchError> {
        self.memory.delete(key);
        self.disk.delete(key).await
    }

    /// Drop only the memory entry, forcing the next `get` to consult disk.
    pub fn delete_memory(&self, key: &str) {
        self.memory.delete(key);
    }
}
