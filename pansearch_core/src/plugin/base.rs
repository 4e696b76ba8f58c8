//! The shared dispatch machinery behind every async searcher.
//!
//! A concrete plugin owns a [`BaseAsyncPlugin`] and delegates the
//! `AsyncSearchPlugin` contract to it, supplying only its scraping logic as a
//! [`SearchFn`]. The base carries the dual HTTP clients, the per-plugin
//! response cache, worker-pool admission, the dual-channel dispatch racing
//! the response budget, background continuation and merge-update promotion
//! into the main cache.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::SearchError;
use crate::model::{Ext, PluginSearchResult, SearchResult};
use crate::plugin::runtime::{AsyncRuntime, CachedResponse};
use crate::{CacheUpdater, SearchFn};

/// Mutable per-plugin dispatch state, shared with spawned background tasks.
struct SharedState {
    main_cache_key: RwLock<String>,
    current_keyword: RwLock<String>,
    updater: RwLock<Option<CacheUpdater>>,
    final_updates: RwLock<HashSet<String>>,
}

impl SharedState {
    fn new() -> Self {
        Self {
            main_cache_key: RwLock::new(String::new()),
            current_keyword: RwLock::new(String::new()),
            updater: RwLock::new(None),
            final_updates: RwLock::new(HashSet::new()),
        }
    }

    /// Push results into the main cache through the injected capability.
    ///
    /// Identical payloads (same length, first and last `unique_id`, same
    /// finality) are written once; the tracker swallows repeats from the
    /// background and refresh paths racing each other.
    async fn promote(
        &self,
        plugin_name: &str,
        cache_key: &str,
        results: Vec<SearchResult>,
        ttl: Duration,
        is_final: bool,
    ) {
        if cache_key.is_empty() {
            return;
        }
        if is_final && results.is_empty() {
            return;
        }
        let updater = match self.updater.read().expect("updater lock poisoned").clone() {
            Some(updater) => updater,
            None => return,
        };

        let mut data_hash = results.len().to_string();
        if let Some(first) = results.first() {
            data_hash.push('_');
            data_hash.push_str(&first.unique_id);
        }
        if results.len() > 1 {
            data_hash.push('_');
            data_hash.push_str(&results[results.len() - 1].unique_id);
        }
        let update_key = format!("final_{plugin_name}_{cache_key}_{data_hash}_{is_final}");

        {
            let mut tracker = self
                .final_updates
                .write()
                .expect("final-update lock poisoned");
            if !tracker.insert(update_key) {
                return;
            }
        }

        let keyword = self
            .current_keyword
            .read()
            .expect("keyword lock poisoned")
            .clone();
        if let Err(err) = updater(cache_key.to_string(), results, ttl, is_final, keyword).await {
            warn!(
                target: "pansearch.plugin",
                plugin = plugin_name,
                key = cache_key,
                error = %err,
                "main-cache update failed"
            );
        }
    }
}

/// How one dispatch resolved, before shaping into a caller-facing return.
enum DispatchOutcome {
    /// Fresh, complete per-plugin cache entry.
    CacheFresh(CachedResponse),
    /// Expired but non-empty entry; a background refresh is underway.
    CacheStale(CachedResponse),
    /// The search finished inside the response budget.
    Completed(Vec<SearchResult>),
    /// Budget expired but a concurrent writer left partial results.
    TimedOutPartial(Vec<SearchResult>),
    /// Budget expired; an incomplete placeholder now marks the key.
    TimedOutEmpty,
}

#[derive(Clone)]
pub struct BaseAsyncPlugin {
    name: String,
    priority: i32,
    /// Response-budget client, also used for inline degradation.
    client: reqwest::Client,
    /// Processing-budget client for background work.
    background_client: reqwest::Client,
    response_timeout: Duration,
    cache_ttl: Duration,
    skip_service_filter: bool,
    runtime: Arc<AsyncRuntime>,
    shared: Arc<SharedState>,
}

impl BaseAsyncPlugin {
    pub fn new(
        name: impl Into<String>,
        priority: i32,
        runtime: Arc<AsyncRuntime>,
        config: &Config,
    ) -> Result<Self, SearchError> {
        Self::with_filter(name, priority, false, runtime, config)
    }

    pub fn with_filter(
        name: impl Into<String>,
        priority: i32,
        skip_service_filter: bool,
        runtime: Arc<AsyncRuntime>,
        config: &Config,
    ) -> Result<Self, SearchError> {
        let client = reqwest::Client::builder()
            .timeout(config.response_timeout())
            .build()?;
        let background_client = reqwest::Client::builder()
            .timeout(config.plugin_timeout())
            .build()?;

        Ok(Self {
            name: name.into(),
            priority,
            client,
            background_client,
            response_timeout: config.response_timeout(),
            cache_ttl: config.async_cache_ttl(),
            skip_service_filter,
            runtime,
            shared: Arc::new(SharedState::new()),
        })
    }

    /// Override the response budget; embedders with unusual latency profiles
    /// tune this per plugin.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Override the per-plugin response-cache TTL.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn skip_service_filter(&self) -> bool {
        self.skip_service_filter
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn background_client(&self) -> &reqwest::Client {
        &self.background_client
    }

    pub fn set_main_cache_key(&self, key: &str) {
        *self
            .shared
            .main_cache_key
            .write()
            .expect("cache-key lock poisoned") = key.to_string();
    }

    pub fn main_cache_key(&self) -> String {
        self.shared
            .main_cache_key
            .read()
            .expect("cache-key lock poisoned")
            .clone()
    }

    pub fn set_current_keyword(&self, keyword: &str) {
        *self
            .shared
            .current_keyword
            .write()
            .expect("keyword lock poisoned") = keyword.to_string();
    }

    pub fn set_main_cache_updater(&self, updater: CacheUpdater) {
        *self
            .shared
            .updater
            .write()
            .expect("updater lock poisoned") = Some(updater);
    }

    /// The dispatch contract: return within the response budget with whatever
    /// is available, never losing the slower path's work.
    pub async fn async_search(
        &self,
        keyword: &str,
        search_fn: SearchFn,
        main_cache_key: &str,
        ext: &Ext,
    ) -> Result<Vec<SearchResult>, SearchError> {
        match self.dispatch(keyword, search_fn, main_cache_key, ext).await? {
            DispatchOutcome::CacheFresh(cached) | DispatchOutcome::CacheStale(cached) => {
                Ok(cached.results)
            }
            DispatchOutcome::Completed(results)
            | DispatchOutcome::TimedOutPartial(results) => Ok(results),
            DispatchOutcome::TimedOutEmpty => Ok(Vec::new()),
        }
    }

    /// Same contract, with an explicit finality flag so callers can tell a
    /// complete answer from "more coming".
    pub async fn async_search_with_result(
        &self,
        keyword: &str,
        search_fn: SearchFn,
        main_cache_key: &str,
        ext: &Ext,
    ) -> Result<PluginSearchResult, SearchError> {
        let outcome = self.dispatch(keyword, search_fn, main_cache_key, ext).await?;
        let now = Utc::now();
        Ok(match outcome {
            DispatchOutcome::CacheFresh(cached) => PluginSearchResult {
                results: cached.results,
                is_final: true,
                timestamp: cached.timestamp,
                source: self.name.clone(),
                message: "served from cache".to_string(),
            },
            DispatchOutcome::CacheStale(cached) => PluginSearchResult {
                results: cached.results,
                is_final: false,
                timestamp: cached.timestamp,
                source: self.name.clone(),
                message: "cache expired, refreshing in background".to_string(),
            },
            DispatchOutcome::Completed(results) => PluginSearchResult {
                results,
                is_final: true,
                timestamp: now,
                source: self.name.clone(),
                message: "search complete".to_string(),
            },
            DispatchOutcome::TimedOutPartial(results) => PluginSearchResult {
                results,
                is_final: false,
                timestamp: now,
                source: self.name.clone(),
                message: "partial results, processing continues".to_string(),
            },
            DispatchOutcome::TimedOutEmpty => PluginSearchResult {
                results: Vec::new(),
                is_final: false,
                timestamp: now,
                source: self.name.clone(),
                message: "processing continues in background".to_string(),
            },
        })
    }

    async fn dispatch(
        &self,
        keyword: &str,
        search_fn: SearchFn,
        main_cache_key: &str,
        ext: &Ext,
    ) -> Result<DispatchOutcome, SearchError> {
        let plugin_cache_key = format!("{}:{}", self.name, keyword);

        if let Some(cached) = self.runtime.get_response(&plugin_cache_key) {
            let age = cached.age();

            if cached.complete && age < self.cache_ttl {
                self.runtime.record_cache_hit();
                self.runtime.record_access(&plugin_cache_key);
                // Refresh ahead of expiry once 80% of the TTL is spent.
                if age > self.cache_ttl * 4 / 5 {
                    self.spawn_refresh(
                        keyword,
                        &plugin_cache_key,
                        Arc::clone(&search_fn),
                        cached.clone(),
                        main_cache_key,
                        ext.clone(),
                    );
                }
                return Ok(DispatchOutcome::CacheFresh(cached));
            }

            if !cached.results.is_empty() {
                self.runtime.record_cache_hit();
                self.runtime.record_access(&plugin_cache_key);
                if age >= self.cache_ttl {
                    self.spawn_refresh(
                        keyword,
                        &plugin_cache_key,
                        Arc::clone(&search_fn),
                        cached.clone(),
                        main_cache_key,
                        ext.clone(),
                    );
                    debug!(
                        target: "pansearch.plugin",
                        plugin = %self.name,
                        key = %plugin_cache_key,
                        age_secs = age.as_secs(),
                        "cache expired, serving stale while refreshing"
                    );
                }
                return Ok(DispatchOutcome::CacheStale(cached));
            }
            // Empty incomplete placeholder: treat as a miss.
        }

        self.runtime.record_cache_miss();

        let (result_tx, mut result_rx) = mpsc::channel::<Vec<SearchResult>>(1);
        let (error_tx, mut error_rx) = mpsc::channel::<SearchError>(1);
        let responded = Arc::new(AtomicBool::new(false));

        {
            let this = self.clone();
            let keyword = keyword.to_string();
            let plugin_cache_key = plugin_cache_key.clone();
            let main_cache_key = main_cache_key.to_string();
            let ext = ext.clone();
            let responded = Arc::clone(&responded);
            tokio::spawn(async move {
                this.background_work(
                    keyword,
                    plugin_cache_key,
                    search_fn,
                    main_cache_key,
                    ext,
                    result_tx,
                    error_tx,
                    responded,
                )
                .await;
            });
        }

        tokio::select! {
            Some(results) = result_rx.recv() => {
                responded.store(true, Ordering::SeqCst);
                Ok(DispatchOutcome::Completed(results))
            }
            Some(err) = error_rx.recv() => {
                responded.store(true, Ordering::SeqCst);
                Err(err)
            }
            _ = tokio::time::sleep(self.response_timeout) => {
                responded.store(true, Ordering::SeqCst);

                // A concurrent writer may have landed partial results.
                if let Some(cached) = self.runtime.get_response(&plugin_cache_key) {
                    if !cached.results.is_empty() {
                        self.runtime.record_access(&plugin_cache_key);
                        debug!(
                            target: "pansearch.plugin",
                            plugin = %self.name,
                            key = %plugin_cache_key,
                            count = cached.results.len(),
                            "response timeout, returning partial cache"
                        );
                        return Ok(DispatchOutcome::TimedOutPartial(cached.results));
                    }
                }

                // Incomplete placeholder so the background continuation knows
                // to replace it.
                let now = Utc::now();
                self.runtime.store_response(
                    &plugin_cache_key,
                    CachedResponse {
                        results: Vec::new(),
                        timestamp: now,
                        complete: false,
                        last_access: now,
                        access_count: 1,
                    },
                );
                // The key must exist in the main cache even before the plugin
                // finishes, so the dispatcher sees it.
                self.shared
                    .promote(&self.name, main_cache_key, Vec::new(), self.cache_ttl, false)
                    .await;
                Ok(DispatchOutcome::TimedOutEmpty)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn background_work(
        self,
        keyword: String,
        plugin_cache_key: String,
        search_fn: SearchFn,
        main_cache_key: String,
        ext: Ext,
        result_tx: mpsc::Sender<Vec<SearchResult>>,
        error_tx: mpsc::Sender<SearchError>,
        responded: Arc<AtomicBool>,
    ) {
        let slot = self.runtime.acquire_worker_slot();

        if slot.is_none() {
            // Pool saturated: run inline on the short-timeout client. The
            // result channel send and the final promote both still happen,
            // even if the dispatcher raced past us.
            match search_fn(self.client.clone(), keyword, ext).await {
                Err(err) => {
                    let _ = error_tx.try_send(err);
                }
                Ok(results) => {
                    let _ = result_tx.try_send(results.clone());
                    let now = Utc::now();
                    self.runtime.store_response(
                        &plugin_cache_key,
                        CachedResponse {
                            results: results.clone(),
                            timestamp: now,
                            complete: true,
                            last_access: now,
                            access_count: 1,
                        },
                    );
                    self.shared
                        .promote(&self.name, &main_cache_key, results, self.cache_ttl, true)
                        .await;
                }
            }
            return;
        }

        let _slot = slot;
        match search_fn(self.background_client.clone(), keyword, ext).await {
            Err(err) => {
                if !responded.load(Ordering::SeqCst) {
                    let _ = error_tx.try_send(err);
                }
            }
            Ok(results) => {
                let old = self.runtime.get_response(&plugin_cache_key);
                let merged = match &old {
                    Some(old) => merge_with_previous(results, &old.results),
                    None => results,
                };
                let now = Utc::now();

                if responded.load(Ordering::SeqCst) {
                    // Dispatcher already returned; only the caches move.
                    let (last_access, access_count) = old
                        .map(|old| (old.last_access, old.access_count))
                        .unwrap_or((now, 1));
                    self.runtime.store_response(
                        &plugin_cache_key,
                        CachedResponse {
                            results: merged.clone(),
                            timestamp: now,
                            complete: true,
                            last_access,
                            access_count,
                        },
                    );
                    self.runtime.record_async_completion();
                    self.shared
                        .promote(&self.name, &main_cache_key, merged, self.cache_ttl, true)
                        .await;
                } else {
                    let _ = result_tx.try_send(merged.clone());
                    self.runtime.store_response(
                        &plugin_cache_key,
                        CachedResponse {
                            results: merged.clone(),
                            timestamp: now,
                            complete: true,
                            last_access: now,
                            access_count: 1,
                        },
                    );
                    self.shared
                        .promote(&self.name, &main_cache_key, merged, self.cache_ttl, true)
                        .await;
                }
            }
        }
    }

    /// Re-run the search on the long-timeout client and merge into the
    /// current cache. No partial updates leave this path.
    fn spawn_refresh(
        &self,
        keyword: &str,
        plugin_cache_key: &str,
        search_fn: SearchFn,
        old: CachedResponse,
        main_cache_key: &str,
        ext: Ext,
    ) {
        let this = self.clone();
        let keyword = keyword.to_string();
        let plugin_cache_key = plugin_cache_key.to_string();
        let main_cache_key = main_cache_key.to_string();

        tokio::spawn(async move {
            let _slot = match this.runtime.acquire_worker_slot() {
                Some(slot) => slot,
                None => return,
            };

            let started = Instant::now();
            let results = match search_fn(this.background_client.clone(), keyword, ext).await {
                Ok(results) if !results.is_empty() => results,
                _ => return,
            };

            let new_count = results.len();
            let merged = merge_with_previous(results, &old.results);
            let merged_count = merged.len();

            this.runtime.store_response(
                &plugin_cache_key,
                CachedResponse {
                    results: merged.clone(),
                    timestamp: Utc::now(),
                    complete: true,
                    last_access: old.last_access,
                    access_count: old.access_count,
                },
            );
            this.shared
                .promote(&this.name, &main_cache_key, merged, this.cache_ttl, true)
                .await;

            debug!(
                target: "pansearch.plugin",
                plugin = %this.name,
                key = %plugin_cache_key,
                elapsed_ms = started.elapsed().as_millis() as u64,
                new = new_count,
                merged = merged_count,
                "background refresh complete"
            );
        });
    }
}

/// Keep every new result, then append old results whose `unique_id` the new
/// set does not contain.
fn merge_with_previous(
    new_results: Vec<SearchResult>,
    old_results: &[SearchResult],
) -> Vec<SearchResult> {
    if old_results.is_empty() {
        return new_results;
    }
    let seen: HashSet<String> = new_results
        .iter()
        .map(|result| result.unique_id.clone())
        .collect();
    let mut merged = new_results;
    for old in old_results {
        if !seen.contains(&old.unique_id) {
            merged.push(old.clone());
        }
    }
    merged
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Link;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn test_config() -> Config {
        Config {
            async_response_timeout_ms: 80,
            plugin_timeout_ms: 5_000,
            async_max_background_workers: 4,
            async_max_background_tasks: 8,
            ..Config::default()
        }
    }

    fn make_base(name: &str, runtime: &Arc<AsyncRuntime>) -> BaseAsyncPlugin {
        BaseAsyncPlugin::new(name, 2, Arc::clone(runtime), &test_config()).unwrap()
    }

    fn result(id: &str) -> SearchResult {
        SearchResult::new(id, format!("title {id}")).with_link(Link::new(format!("https://x/{id}")))
    }

    fn instant_fn(results: Vec<SearchResult>, calls: Arc<AtomicUsize>) -> SearchFn {
        Arc::new(move |_client, _kw, _ext| {
            calls.fetch_add(1, Ordering::SeqCst);
            let results = results.clone();
            Box::pin(async move { Ok(results) })
        })
    }

    fn delayed_fn(results: Vec<SearchResult>, delay: Duration) -> SearchFn {
        Arc::new(move |_client, _kw, _ext| {
            let results = results.clone();
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                Ok(results)
            })
        })
    }

    /// Collects every promoted update for assertions.
    fn recording_updater() -> (CacheUpdater, Arc<Mutex<Vec<(String, usize, bool)>>>) {
        let seen: Arc<Mutex<Vec<(String, usize, bool)>>> = Arc::new(Mutex::new(Vec::new()));
        let inner = Arc::clone(&seen);
        let updater: CacheUpdater = Arc::new(move |key, results, _ttl, is_final, _keyword| {
            let inner = Arc::clone(&inner);
            Box::pin(async move {
                inner.lock().unwrap().push((key, results.len(), is_final));
                Ok(())
            })
        });
        (updater, seen)
    }

    #[tokio::test]
    async fn test_fresh_cache_hit_skips_search() {
        let runtime = AsyncRuntime::new(&test_config());
        let base = make_base("quark", &runtime);
        let now = Utc::now();
        runtime.store_response(
            "quark:流浪地球",
            CachedResponse {
                results: vec![result("quark-1")],
                timestamp: now,
                complete: true,
                last_access: now,
                access_count: 1,
            },
        );

        let calls = Arc::new(AtomicUsize::new(0));
        let search_fn = instant_fn(vec![result("quark-2")], Arc::clone(&calls));

        let results = base
            .async_search("流浪地球", search_fn, "mainkey", &Ext::new())
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].unique_id, "quark-1");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(runtime.stats().cache_hits, 1);
    }

    #[tokio::test]
    async fn test_completion_within_budget_promotes_final() {
        let runtime = AsyncRuntime::new(&test_config());
        let base = make_base("quark", &runtime);
        let (updater, seen) = recording_updater();
        base.set_main_cache_updater(updater);
        base.set_current_keyword("哪吒");

        let calls = Arc::new(AtomicUsize::new(0));
        let search_fn = instant_fn(vec![result("quark-1"), result("quark-2")], calls);

        let results = base
            .async_search("哪吒", search_fn, "mainkey", &Ext::new())
            .await
            .unwrap();
        assert_eq!(results.len(), 2);

        // Let the spawned task finish its cache writes.
        tokio::time::sleep(Duration::from_millis(30)).await;

        let cached = runtime.get_response("quark:哪吒").unwrap();
        assert!(cached.complete);
        assert_eq!(cached.results.len(), 2);

        let updates = seen.lock().unwrap().clone();
        assert_eq!(updates, vec![("mainkey".to_string(), 2, true)]);
    }

    #[tokio::test]
    async fn test_timeout_writes_placeholder_then_background_replaces_it() {
        let runtime = AsyncRuntime::new(&test_config());
        let base = make_base("xuanzhi", &runtime);
        let (updater, seen) = recording_updater();
        base.set_main_cache_updater(updater);

        let search_fn = delayed_fn(
            vec![result("xuanzhi-1"), result("xuanzhi-2")],
            Duration::from_millis(250),
        );

        let started = Instant::now();
        let results = base
            .async_search("沙丘", search_fn, "mainkey", &Ext::new())
            .await
            .unwrap();
        assert!(results.is_empty());
        assert!(started.elapsed() < Duration::from_millis(200));

        // Placeholder marks the in-flight continuation.
        let placeholder = runtime.get_response("xuanzhi:沙丘").unwrap();
        assert!(!placeholder.complete);
        assert!(placeholder.results.is_empty());
        // The empty non-final promote makes the key visible immediately.
        assert_eq!(seen.lock().unwrap().first(), Some(&("mainkey".to_string(), 0, false)));

        tokio::time::sleep(Duration::from_millis(350)).await;

        let cached = runtime.get_response("xuanzhi:沙丘").unwrap();
        assert!(cached.complete);
        assert_eq!(cached.results.len(), 2);
        assert!(seen
            .lock()
            .unwrap()
            .contains(&("mainkey".to_string(), 2, true)));

        // A second dispatch is now a fresh hit.
        let search_fn = delayed_fn(Vec::new(), Duration::from_millis(250));
        let results = base
            .async_search("沙丘", search_fn, "mainkey", &Ext::new())
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_error_inside_budget_is_returned() {
        let runtime = AsyncRuntime::new(&test_config());
        let base = make_base("bad", &runtime);

        let search_fn: SearchFn = Arc::new(|_client, _kw, _ext| {
            Box::pin(async { Err(SearchError::plugin("bad", "parse failure")) })
        });

        let err = base
            .async_search("关键词", search_fn, "mainkey", &Ext::new())
            .await
            .unwrap_err();
        assert_eq!(err.code_str(), "plugin_error");
    }

    #[tokio::test]
    async fn test_saturated_pool_degrades_inline_and_still_promotes() {
        let config = Config {
            async_max_background_workers: 1,
            async_max_background_tasks: 1,
            ..test_config()
        };
        let runtime = AsyncRuntime::new(&config);
        let base = BaseAsyncPlugin::new("inline", 3, Arc::clone(&runtime), &config).unwrap();
        let (updater, seen) = recording_updater();
        base.set_main_cache_updater(updater);

        // Exhaust the pool so the dispatch degrades.
        let _held = runtime.acquire_worker_slot().unwrap();
        assert!(runtime.acquire_worker_slot().is_none());

        let calls = Arc::new(AtomicUsize::new(0));
        let search_fn = instant_fn(vec![result("inline-1")], calls);

        let results = base
            .async_search("速度与激情", search_fn, "mainkey", &Ext::new())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);

        tokio::time::sleep(Duration::from_millis(30)).await;
        let cached = runtime.get_response("inline:速度与激情").unwrap();
        assert!(cached.complete);
        assert_eq!(
            seen.lock().unwrap().clone(),
            vec![("mainkey".to_string(), 1, true)]
        );
    }

    #[tokio::test]
    async fn test_stale_cache_returns_old_and_refresh_merges() {
        let runtime = AsyncRuntime::new(&test_config());
        let base = make_base("quark", &runtime).with_cache_ttl(Duration::from_millis(10));
        let (updater, seen) = recording_updater();
        base.set_main_cache_updater(updater);

        let stale_ts = Utc::now() - chrono::Duration::seconds(60);
        runtime.store_response(
            "quark:毒液",
            CachedResponse {
                results: vec![result("quark-old")],
                timestamp: stale_ts,
                complete: true,
                last_access: stale_ts,
                access_count: 3,
            },
        );

        let search_fn = instant_fn(
            vec![result("quark-new")],
            Arc::new(AtomicUsize::new(0)),
        );
        let results = base
            .async_search("毒液", search_fn, "mainkey", &Ext::new())
            .await
            .unwrap();
        // Stale results come back immediately.
        assert_eq!(results[0].unique_id, "quark-old");

        tokio::time::sleep(Duration::from_millis(60)).await;

        let cached = runtime.get_response("quark:毒液").unwrap();
        assert!(cached.complete);
        let ids: Vec<&str> = cached.results.iter().map(|r| r.unique_id.as_str()).collect();
        // New results first, surviving old entries appended.
        assert_eq!(ids, vec!["quark-new", "quark-old"]);
        assert_eq!(cached.access_count, 3, "refresh carries the pre-dispatch access metadata");
        assert!(seen
            .lock()
            .unwrap()
            .contains(&("mainkey".to_string(), 2, true)));
    }

    #[tokio::test]
    async fn test_final_update_tracker_swallows_identical_writes() {
        let runtime = AsyncRuntime::new(&test_config());
        let base = make_base("quark", &runtime);
        let (updater, seen) = recording_updater();
        base.set_main_cache_updater(updater);

        let results = vec![result("quark-1"), result("quark-2")];
        base.shared
            .promote("quark", "mainkey", results.clone(), Duration::from_secs(60), true)
            .await;
        base.shared
            .promote("quark", "mainkey", results.clone(), Duration::from_secs(60), true)
            .await;
        // Different finality is a different write.
        base.shared
            .promote("quark", "mainkey", results, Duration::from_secs(60), false)
            .await;

        let updates = seen.lock().unwrap().clone();
        assert_eq!(
            updates,
            vec![
                ("mainkey".to_string(), 2, true),
                ("mainkey".to_string(), 2, false)
            ]
        );
    }

    #[tokio::test]
    async fn test_with_result_reports_finality() {
        let runtime = AsyncRuntime::new(&test_config());
        let base = make_base("quark", &runtime);

        // Slow path: timeout yields a non-final empty answer.
        let slow = delayed_fn(vec![result("quark-1")], Duration::from_millis(250));
        let timed_out = base
            .async_search_with_result("封神", slow, "mainkey", &Ext::new())
            .await
            .unwrap();
        assert!(!timed_out.is_final);
        assert!(timed_out.results.is_empty());
        assert_eq!(timed_out.source, "quark");

        tokio::time::sleep(Duration::from_millis(350)).await;

        // The continuation completed; a fresh dispatch is a final cache hit.
        let fast = delayed_fn(Vec::new(), Duration::from_millis(250));
        let from_cache = base
            .async_search_with_result("封神", fast, "mainkey", &Ext::new())
            .await
            .unwrap();
        assert!(from_cache.is_final);
        assert_eq!(from_cache.results.len(), 1);
        assert_eq!(from_cache.message, "served from cache");
    }

    #[tokio::test]
    async fn test_with_result_completion_inside_budget_is_final() {
        let runtime = AsyncRuntime::new(&test_config());
        let base = make_base("quark", &runtime);

        let search_fn = instant_fn(vec![result("quark-1")], Arc::new(AtomicUsize::new(0)));
        let outcome = base
            .async_search_with_result("哪吒", search_fn, "mainkey", &Ext::new())
            .await
            .unwrap();
        assert!(outcome.is_final);
        assert_eq!(outcome.results.len(), 1);
    }

    #[test]
    fn test_merge_with_previous_keeps_new_first() {
        let merged = merge_with_previous(
            vec![result("a-1"), result("a-2")],
            &[result("a-2"), result("a-3")],
        );
        let ids: Vec<&str> = merged.iter().map(|r| r.unique_id.as_str()).collect();
        assert_eq!(ids, vec!["a-1", "a-2", "a-3"]);
    }
}
