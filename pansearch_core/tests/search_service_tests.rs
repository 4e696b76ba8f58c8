//! End-to-end dispatcher scenarios: cache hits, response-budget timeouts
//! with background completion, and repeat-query idempotence.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use pansearch_core::cache::{generate_plugin_cache_key, TwoLevelCache};
use pansearch_core::service::ChannelSearcher;
use pansearch_core::{
    AsyncSearchPlugin, BaseAsyncPlugin, CacheUpdater, Config, Ext, Link, PluginManager,
    PluginRegistry, ResultType, SearchError, SearchFn, SearchRequest, SearchResult, SearchService,
    SourceType,
};
use pansearch_core::plugin::AsyncRuntime;

/// A plugin whose scrape is a configurable sleep; dispatches through the
/// real base machinery.
struct DelayedPlugin {
    base: BaseAsyncPlugin,
    results: Vec<SearchResult>,
    delay: Duration,
    search_calls: Arc<AtomicUsize>,
}

impl DelayedPlugin {
    fn new(
        name: &str,
        priority: i32,
        results: Vec<SearchResult>,
        delay: Duration,
        runtime: &Arc<AsyncRuntime>,
        config: &Config,
    ) -> Self {
        Self {
            base: BaseAsyncPlugin::new(name, priority, Arc::clone(runtime), config).unwrap(),
            results,
            delay,
            search_calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl AsyncSearchPlugin for DelayedPlugin {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn priority(&self) -> i32 {
        self.base.priority()
    }

    async fn search(&self, _keyword: &str, _ext: &Ext) -> Result<Vec<SearchResult>, SearchError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(self.results.clone())
    }

    async fn async_search(
        &self,
        keyword: &str,
        search_fn: SearchFn,
        main_cache_key: &str,
        ext: &Ext,
    ) -> Result<Vec<SearchResult>, SearchError> {
        self.base
            .async_search(keyword, search_fn, main_cache_key, ext)
            .await
    }

    fn set_main_cache_key(&self, key: &str) {
        self.base.set_main_cache_key(key);
    }

    fn set_current_keyword(&self, keyword: &str) {
        self.base.set_current_keyword(keyword);
    }

    fn set_main_cache_updater(&self, updater: CacheUpdater) {
        self.base.set_main_cache_updater(updater);
    }

    fn skip_service_filter(&self) -> bool {
        self.base.skip_service_filter()
    }
}

struct StaticChannelSearcher {
    results: Vec<SearchResult>,
}

#[async_trait]
impl ChannelSearcher for StaticChannelSearcher {
    async fn search_channel(
        &self,
        _keyword: &str,
        channel: &str,
    ) -> Result<Vec<SearchResult>, SearchError> {
        Ok(self
            .results
            .iter()
            .cloned()
            .map(|mut result| {
                result.channel = channel.to_string();
                result
            })
            .collect())
    }
}

fn fast_config() -> Config {
    Config {
        async_response_timeout_ms: 100,
        plugin_timeout_ms: 2_000,
        batch_flush_interval_ms: 50,
        default_concurrency: 4,
        ..Config::default()
    }
}

fn linked_result(id: &str, title: &str) -> SearchResult {
    SearchResult::new(id, title)
        .with_datetime(Utc::now())
        .with_link(Link::new(format!("https://pan.quark.cn/s/{id}")))
}

async fn build_service(
    config: Config,
    plugins: Vec<Arc<dyn AsyncSearchPlugin>>,
    cache: Option<Arc<TwoLevelCache>>,
    tg: Option<Arc<dyn ChannelSearcher>>,
) -> SearchService {
    let registry = Arc::new(PluginRegistry::new());
    let mut names = Vec::new();
    for plugin in plugins {
        names.push(plugin.name().to_string());
        registry.register(plugin);
    }
    let mut manager = PluginManager::new();
    manager.register_from_registry(&registry, Some(&names)).await;
    SearchService::new(config, registry, manager, cache, tg)
}

#[tokio::test]
async fn test_fresh_cache_hit_answers_without_touching_plugins() {
    let config = fast_config();
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(TwoLevelCache::new(dir.path()).unwrap());

    // Pre-populate the aggregate cache for the "alpha" fingerprint.
    let cached = vec![
        linked_result("seed-1", "alpha 资源一"),
        linked_result("seed-2", "alpha 资源二"),
        linked_result("seed-3", "alpha 资源三"),
    ];
    let key = generate_plugin_cache_key("alpha", None);
    let data = cache.serializer().serialize(&cached).unwrap();
    cache
        .set_both_levels(&key, data, Duration::from_secs(600))
        .await
        .unwrap();

    let runtime = AsyncRuntime::new(&config);
    let plugin = Arc::new(DelayedPlugin::new(
        "quark",
        1,
        vec![linked_result("quark-other", "alpha 插件结果")],
        Duration::from_millis(0),
        &runtime,
        &config,
    ));
    let calls = Arc::clone(&plugin.search_calls);
    let service = build_service(config, vec![plugin as Arc<dyn AsyncSearchPlugin>], Some(Arc::clone(&cache)), None).await;

    let started = Instant::now();
    let response = service
        .search(
            SearchRequest::new("alpha")
                .with_source_type(SourceType::Plugin)
                .with_result_type(ResultType::Results),
        )
        .await
        .unwrap();

    assert_eq!(response.total, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 0, "no plugin task invoked");
    assert!(started.elapsed() < Duration::from_millis(150));
}

#[tokio::test]
async fn test_response_timeout_then_background_completion_fills_cache() {
    let config = fast_config();
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(TwoLevelCache::new(dir.path()).unwrap());

    let runtime = AsyncRuntime::new(&config);
    let slow_results: Vec<SearchResult> = (1..=5)
        .map(|i| linked_result(&format!("slowpan-{i}"), &format!("bravo 资源{i}")))
        .collect();
    // Sleeps past the 100 ms response budget, well inside the hard cap.
    let plugin = Arc::new(DelayedPlugin::new(
        "slowpan",
        1,
        slow_results,
        Duration::from_millis(300),
        &runtime,
        &config,
    ));
    let calls = Arc::clone(&plugin.search_calls);
    let service = build_service(config, vec![plugin as Arc<dyn AsyncSearchPlugin>], Some(Arc::clone(&cache)), None).await;

    let request = SearchRequest::new("bravo")
        .with_source_type(SourceType::Plugin)
        .with_result_type(ResultType::Results);

    // First call: the budget expires, an empty answer comes back fast.
    let started = Instant::now();
    let first = service.search(request.clone()).await.unwrap();
    assert_eq!(first.total, 0);
    assert!(started.elapsed() < Duration::from_millis(250));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Give the background continuation time to finish and flush.
    tokio::time::sleep(Duration::from_millis(500)).await;

    // Second call: served from the updated cache, immediately and fully.
    let started = Instant::now();
    let second = service.search(request).await.unwrap();
    assert_eq!(second.total, 5);
    assert!(started.elapsed() < Duration::from_millis(150));
    assert_eq!(calls.load(Ordering::SeqCst), 1, "no second scrape");
}

#[tokio::test]
async fn test_repeat_search_is_bit_identical() {
    let config = fast_config();
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(TwoLevelCache::new(dir.path()).unwrap());

    let runtime = AsyncRuntime::new(&config);
    let plugin = Arc::new(DelayedPlugin::new(
        "quark",
        1,
        vec![
            linked_result("quark-1", "charlie 合集"),
            linked_result("quark-2", "charlie 系列"),
        ],
        Duration::from_millis(0),
        &runtime,
        &config,
    ));
    let service = build_service(config, vec![plugin as Arc<dyn AsyncSearchPlugin>], Some(cache), None).await;

    let request = SearchRequest::new("charlie").with_source_type(SourceType::Plugin);

    let first = service.search(request.clone()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    let second = service.search(request).await.unwrap();

    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap(),
    );
}

#[tokio::test]
async fn test_tg_and_plugin_results_merge_into_one_response() {
    let config = fast_config();
    let runtime = AsyncRuntime::new(&config);

    let plugin = Arc::new(DelayedPlugin::new(
        "quark",
        1,
        vec![linked_result("quark-1", "delta 插件资源")],
        Duration::from_millis(0),
        &runtime,
        &config,
    ));
    let tg = Arc::new(StaticChannelSearcher {
        results: vec![SearchResult::new("10086", "delta 频道资源")
            .with_datetime(Utc::now())
            .with_link(Link::new("https://pan.baidu.com/s/1tg"))],
    });

    let service = build_service(
        Config {
            cache_enabled: false,
            ..fast_config()
        },
        vec![plugin as Arc<dyn AsyncSearchPlugin>],
        None,
        Some(tg as Arc<dyn ChannelSearcher>),
    )
    .await;

    let response = service
        .search(
            SearchRequest::new("delta")
                .with_channels(vec!["moviepan".to_string()])
                .with_result_type(ResultType::All),
        )
        .await
        .unwrap();

    let results = response.results.unwrap();
    assert_eq!(results.len(), 2);
    let buckets = response.merged_by_type.unwrap();
    assert_eq!(buckets.get("quark").map(Vec::len), Some(1));
    assert_eq!(buckets.get("baidu").map(Vec::len), Some(1));

    let tg_result = results.iter().find(|r| r.channel == "moviepan").unwrap();
    assert_eq!(tg_result.unique_id, "10086");
}

#[tokio::test]
async fn test_force_refresh_bypasses_aggregate_cache() {
    let config = fast_config();
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(TwoLevelCache::new(dir.path()).unwrap());

    // Stale aggregate entry that a refresh must ignore.
    let key = generate_plugin_cache_key("echo", None);
    let stale = vec![linked_result("stale-1", "echo 旧数据")];
    let data = cache.serializer().serialize(&stale).unwrap();
    cache
        .set_both_levels(&key, data, Duration::from_secs(600))
        .await
        .unwrap();

    let runtime = AsyncRuntime::new(&config);
    let plugin = Arc::new(DelayedPlugin::new(
        "quark",
        1,
        vec![linked_result("quark-new", "echo 新数据")],
        Duration::from_millis(0),
        &runtime,
        &config,
    ));
    let calls = Arc::clone(&plugin.search_calls);
    let service = build_service(config, vec![plugin as Arc<dyn AsyncSearchPlugin>], Some(cache), None).await;

    let response = service
        .search(
            SearchRequest::new("echo")
                .with_source_type(SourceType::Plugin)
                .with_result_type(ResultType::Results)
                .with_force_refresh(true),
        )
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let ids: Vec<String> = response
        .results
        .unwrap()
        .iter()
        .map(|result| result.unique_id.clone())
        .collect();
    assert_eq!(ids, vec!["quark-new".to_string()]);
}
