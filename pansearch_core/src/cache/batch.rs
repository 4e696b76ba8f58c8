//! Delayed-batch disk writes.
//!
//! Memory updates are immediate (handled by the cache updater before an
//! operation reaches this manager); the disk write is deferred and coalesced.
//! Final results carry priority 1 and go to disk at once; non-final updates
//! to the same key collapse to the latest merged state and flush on the
//! interval tick or when the pending payload grows past the byte threshold.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::Serializer;
use crate::error::SearchError;
use crate::model::SearchResult;

pub const PRIORITY_HIGH: u8 = 1;
pub const PRIORITY_MEDIUM: u8 = 2;

/// One queued cache update. `data` holds the already-merged result list, not
/// bytes; serialization happens once, at flush time.
#[derive(Clone)]
pub struct CacheOperation {
    pub key: String,
    pub data: Vec<SearchResult>,
    pub ttl: Duration,
    pub is_final: bool,
    pub plugin_name: String,
    pub keyword: String,
    pub priority: u8,
    pub timestamp: DateTime<Utc>,
    pub data_size: usize,
}

impl CacheOperation {
    pub fn new(
        key: impl Into<String>,
        data: Vec<SearchResult>,
        ttl: Duration,
        is_final: bool,
        plugin_name: impl Into<String>,
        keyword: impl Into<String>,
        data_size: usize,
    ) -> Self {
        Self {
            key: key.into(),
            data,
            ttl,
            is_final,
            plugin_name: plugin_name.into(),
            keyword: keyword.into(),
            priority: if is_final { PRIORITY_HIGH } else { PRIORITY_MEDIUM },
            timestamp: Utc::now(),
            data_size,
        }
    }
}

/// Capability that lands bytes on both cache tiers: `(key, data, ttl)`.
pub type DiskWriter =
    Arc<dyn Fn(String, Vec<u8>, Duration) -> BoxFuture<'static, Result<(), SearchError>> + Send + Sync>;

enum WorkerMsg {
    Op(CacheOperation),
    Flush(oneshot::Sender<()>),
}

pub struct BatchWriteManager {
    tx: mpsc::Sender<WorkerMsg>,
}

impl BatchWriteManager {
    /// Start the write worker. `writer` is how flushed entries reach the
    /// two-level cache (normally `set_both_levels`).
    pub fn spawn(
        writer: DiskWriter,
        serializer: Arc<dyn Serializer>,
        flush_interval: Duration,
        max_pending_bytes: usize,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(run_worker(
            rx,
            writer,
            serializer,
            flush_interval,
            max_pending_bytes,
        ));
        Arc::new(Self { tx })
    }

    /// Queue an operation. An error means the worker is gone and the caller
    /// must degrade to direct writes.
    pub async fn handle_cache_operation(&self, op: CacheOperation) -> Result<(), SearchError> {
        self.tx
            .send(WorkerMsg::Op(op))
            .await
            .map_err(|_| SearchError::Cache("batch write worker is not running".into()))
    }

    /// Force everything pending to disk and wait for it. Used on shutdown.
    pub async fn flush(&self) -> Result<(), SearchError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(WorkerMsg::Flush(ack_tx))
            .await
            .map_err(|_| SearchError::Cache("batch write worker is not running".into()))?;
        ack_rx
            .await
            .map_err(|_| SearchError::Cache("batch write worker dropped the flush ack".into()))
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<WorkerMsg>,
    writer: DiskWriter,
    serializer: Arc<dyn Serializer>,
    flush_interval: Duration,
    max_pending_bytes: usize,
) {
    let mut pending: HashMap<String, CacheOperation> = HashMap::new();
    let mut pending_bytes: usize = 0;
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await; // swallow the immediate tick

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(WorkerMsg::Op(op)) => {
                    if op.priority == PRIORITY_HIGH {
                        // Finals go straight through; they also supersede any
                        // coalesced non-final state for the key.
                        if let Some(old) = pending.remove(&op.key) {
                            pending_bytes = pending_bytes.saturating_sub(old.data_size);
                        }
                        write_one(&writer, &serializer, &op).await;
                        continue;
                    }

                    let incoming_size = op.data_size;
                    if let Some(old) = pending.insert(op.key.clone(), op) {
                        pending_bytes = pending_bytes.saturating_sub(old.data_size);
                    }
                    pending_bytes += incoming_size;

                    if pending_bytes > max_pending_bytes {
                        debug!(
                            target: "pansearch.cache.batch",
                            pending_bytes,
                            keys = pending.len(),
                            "pending payload over threshold, flushing early"
                        );
                        flush_pending(&writer, &serializer, &mut pending, &mut pending_bytes).await;
                    }
                }
                Some(WorkerMsg::Flush(ack)) => {
                    flush_pending(&writer, &serializer, &mut pending, &mut pending_bytes).await;
                    let _ = ack.send(());
                }
                None => {
                    flush_pending(&writer, &serializer, &mut pending, &mut pending_bytes).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                if !pending.is_empty() {
                    flush_pending(&writer, &serializer, &mut pending, &mut pending_bytes).await;
                }
            }
        }
    }
}

async fn flush_pending(
    writer: &DiskWriter,
    serializer: &Arc<dyn Serializer>,
    pending: &mut HashMap<String, CacheOperation>,
    pending_bytes: &mut usize,
) {
    for (_, op) in pending.drain() {
        write_one(writer, serializer, &op).await;
    }
    *pending_bytes = 0;
}

async fn write_one(writer: &DiskWriter, serializer: &Arc<dyn Serializer>, op: &CacheOperation) {
    let data = match serializer.serialize(&op.data) {
        Ok(data) => data,
        Err(err) => {
            warn!(
                target: "pansearch.cache.batch",
                key = %op.key,
                plugin = %op.plugin_name,
                error = %err,
                "failed to serialize pending cache entry"
            );
            return;
        }
    };
    if let Err(err) = writer(op.key.clone(), data, op.ttl).await {
        // A failed disk write never blocks the pipeline; memory is current.
        warn!(
            target: "pansearch.cache.batch",
            key = %op.key,
            plugin = %op.plugin_name,
            error = %err,
            "disk flush failed"
        );
    }
}
