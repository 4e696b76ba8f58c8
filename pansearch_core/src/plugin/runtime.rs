//! Shared async-plugin runtime: worker pool, per-plugin response cache,
//! hit/miss counters and the expiry sweeper.
//!
//! One instance is constructed at process start and threaded through the
//! dispatcher to every plugin base; tests instantiate their own.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::config::Config;
use crate::model::SearchResult;

/// Floor between two sweeps of the response cache.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Grace added to the TTL before a swept entry is considered dead.
const SWEEP_GRACE: Duration = Duration::from_secs(30 * 60);

/// One per-plugin cached response.
///
/// `complete == false` marks the placeholder written when the response budget
/// expired before the plugin finished; the background continuation replaces
/// it.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub results: Vec<SearchResult>,
    pub timestamp: DateTime<Utc>,
    pub complete: bool,
    pub last_access: DateTime<Utc>,
    pub access_count: u64,
}

impl CachedResponse {
    pub fn age(&self) -> Duration {
        (Utc::now() - self.timestamp).to_std().unwrap_or_default()
    }
}

/// RAII worker-pool slot; releases the permit and the task counter on drop.
pub struct WorkerSlot {
    _permit: OwnedSemaphorePermit,
    tasks: Arc<AtomicUsize>,
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.tasks.fetch_sub(1, Ordering::SeqCst);
    }
}

struct WorkerPool {
    semaphore: Arc<Semaphore>,
    tasks: Arc<AtomicUsize>,
    max_tasks: usize,
}

impl WorkerPool {
    fn new(max_workers: usize, max_tasks: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_workers.max(1))),
            tasks: Arc::new(AtomicUsize::new(0)),
            max_tasks,
        }
    }

    /// Non-blocking acquisition. `None` when either the semaphore or the
    /// total task counter is exhausted; the caller must degrade inline.
    fn acquire(&self) -> Option<WorkerSlot> {
        if self.tasks.load(Ordering::SeqCst) >= self.max_tasks {
            return None;
        }
        let permit = Arc::clone(&self.semaphore).try_acquire_owned().ok()?;
        self.tasks.fetch_add(1, Ordering::SeqCst);
        Some(WorkerSlot {
            _permit: permit,
            tasks: Arc::clone(&self.tasks),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeStatsSnapshot {
    pub cache_hits: i64,
    pub cache_misses: i64,
    pub async_completions: i64,
}

#[derive(Default)]
struct RuntimeStats {
    cache_hits: AtomicI64,
    cache_misses: AtomicI64,
    async_completions: AtomicI64,
}

pub struct AsyncRuntime {
    pool: WorkerPool,
    responses: DashMap<String, CachedResponse>,
    /// Global per-key access counts. Observability only; no policy reads it.
    access_counts: DashMap<String, u64>,
    stats: RuntimeStats,
    cache_ttl: Duration,
    last_sweep: Mutex<Instant>,
}

impl AsyncRuntime {
    pub fn new(config: &Config) -> Arc<Self> {
        Arc::new(Self {
            pool: WorkerPool::new(
                config.async_max_background_workers,
                config.async_max_background_tasks,
            ),
            responses: DashMap::new(),
            access_counts: DashMap::new(),
            stats: RuntimeStats::default(),
            cache_ttl: config.async_cache_ttl(),
            last_sweep: Mutex::new(Instant::now()),
        })
    }

    pub fn acquire_worker_slot(&self) -> Option<WorkerSlot> {
        self.pool.acquire()
    }

    // --- per-plugin response cache ---

    pub fn get_response(&self, key: &str) -> Option<CachedResponse> {
        self.responses.get(key).map(|entry| entry.clone())
    }

    pub fn store_response(&self, key: &str, response: CachedResponse) {
        self.responses.insert(key.to_string(), response);
    }

    /// Bump the entry's access time/count and the global per-key counter,
    /// then opportunistically sweep if the floor interval has passed.
    pub fn record_access(&self, key: &str) {
        if let Some(mut entry) = self.responses.get_mut(key) {
            entry.last_access = Utc::now();
            entry.access_count += 1;
        }
        *self.access_counts.entry(key.to_string()).or_insert(0) += 1;
        self.maybe_sweep();
    }

    pub fn access_count(&self, key: &str) -> u64 {
        self.access_counts.get(key).map(|c| *c).unwrap_or(0)
    }

    // --- statistics ---

    pub fn record_cache_hit(&self) {
        self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_async_completion(&self) {
        self.stats.async_completions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> RuntimeStatsSnapshot {
        RuntimeStatsSnapshot {
            cache_hits: self.stats.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.stats.cache_misses.load(Ordering::Relaxed),
            async_completions: self.stats.async_completions.load(Ordering::Relaxed),
        }
    }

    // --- expiry sweeping ---

    /// Sweep if the last sweep was more than the floor interval ago.
    fn maybe_sweep(&self) {
        {
            let mut last = self.last_sweep.lock().expect("sweep lock poisoned");
            if last.elapsed() < SWEEP_INTERVAL {
                return;
            }
            *last = Instant::now();
        }
        self.sweep();
    }

    /// Drop response-cache entries older than `cache_ttl + grace`, together
    /// with their access counters.
    pub fn sweep(&self) {
        let threshold = self.cache_ttl + SWEEP_GRACE;
        let total = self.responses.len();
        let mut removed = Vec::new();

        self.responses.retain(|key, cached| {
            if cached.age() > threshold {
                removed.push(key.clone());
                false
            } else {
                true
            }
        });

        for key in &removed {
            self.access_counts.remove(key);
        }

        if !removed.is_empty() {
            debug!(
                target: "pansearch.plugin.runtime",
                removed = removed.len(),
                total,
                "swept expired response-cache entries"
            );
        }
    }

    /// Long-running sweeper task; call once from the embedding binary.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let runtime = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.tick().await; // immediate first tick
            loop {
                ticker.tick().await;
                runtime.sweep();
            }
        })
    }
}
