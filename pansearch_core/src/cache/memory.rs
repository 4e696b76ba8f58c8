//! Memory tier: a concurrent map of serialized values with per-entry TTL.
//! Expired entries are evicted lazily on access.

use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use std::time::Duration;

use super::TimedValue;

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: TimedValue,
    expires_at: chrono::DateTime<Utc>,
}

#[derive(Default)]
pub(crate) struct MemoryCache {
    entries: DashMap<String, MemoryEntry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<TimedValue> {
        let entry = self.entries.get(key)?;
        if Utc::now() >= entry.expires_at {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn set(&self, key: &str, data: Vec<u8>, ttl: Duration) {
        let now = Utc::now();
        let ttl = ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::hours(1));
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: TimedValue {
                    data,
                    written_at: now,
                },
                expires_at: now + ttl,
            },
        );
    }

    pub fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
