//! Disk tier: one file per key under the cache directory.
//!
//! Each file is a small JSON envelope carrying the write instant, the TTL
//! and the base64-encoded payload. Writes go through a temp file and an
//! atomic rename so a crashed writer never leaves a torn entry. Corrupt or
//! expired files read as misses and are removed.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;
use tracing::debug;

use super::TimedValue;
use crate::error::SearchError;

#[derive(Debug, Serialize, Deserialize)]
struct DiskEnvelope {
    written_at: DateTime<Utc>,
    ttl_secs: u64,
    payload: String,
}

pub(crate) struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, SearchError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.cache"))
    }

    pub async fn get(&self, key: &str) -> Result<Option<TimedValue>, SearchError> {
        let path = self.path(key);
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let envelope: DiskEnvelope = match serde_json::from_slice(&raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                // Corruption reads as a miss, never an error.
                debug!(
                    target: "pansearch.cache.disk",
                    key,
                    error = %err,
                    "dropping corrupt disk entry"
                );
                let _ = fs::remove_file(&path).await;
                return Ok(None);
            }
        };

        let expires_at =
            envelope.written_at + chrono::Duration::seconds(envelope.ttl_secs as i64);
        if Utc::now() >= expires_at {
            let _ = fs::remove_file(&path).await;
            return Ok(None);
        }

        let data = match BASE64.decode(envelope.payload.as_bytes()) {
            Ok(data) => data,
            Err(err) => {
                debug!(
                    target: "pansearch.cache.disk",
                    key,
                    error = %err,
                    "dropping undecodable disk entry"
                );
                let _ = fs::remove_file(&path).await;
                return Ok(None);
            }
        };

        Ok(Some(TimedValue {
            data,
            written_at: envelope.written_at,
        }))
    }

    pub async fn set(&self, key: &str, data: &[u8], ttl: Duration) -> Result<(), SearchError> {
        let envelope = DiskEnvelope {
            written_at: Utc::now(),
            ttl_secs: ttl.as_secs(),
            payload: BASE64.encode(data),
        };
        let raw = serde_json::to_vec(&envelope)?;

        let path = self.path(key);
        let tmp = self.dir.join(format!("{key}.cache.tmp"));
        fs::write(&tmp, &raw).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<(), SearchError> {
        let path = self.path(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    #[cfg(test)]
    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }
}
