// src/lib.rs
pub mod cache;
pub mod config;
pub mod error;
pub mod model;
pub mod plugin;
pub mod service;
pub mod task_pool;
pub mod util;

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

pub use crate::config::Config;
pub use crate::error::SearchError;
pub use crate::model::{
    Ext, Link, MergedLink, MergedLinks, PluginSearchResult, ResultType, SearchRequest,
    SearchResponse, SearchResult, SourceType,
};
pub use crate::plugin::{AsyncRuntime, BaseAsyncPlugin, PluginManager, PluginRegistry};
pub use crate::service::SearchService;

/// Future type produced by a [`SearchFn`].
pub type SearchFuture =
    Pin<Box<dyn std::future::Future<Output = Result<Vec<SearchResult>, SearchError>> + Send>>;

/// The raw search closure handed to [`AsyncSearchPlugin::async_search`].
///
/// It receives the HTTP client chosen by the dispatch path (short-timeout for
/// inline degradation, long-timeout for background work), the keyword and the
/// open extension map.
pub type SearchFn = Arc<dyn Fn(reqwest::Client, String, Ext) -> SearchFuture + Send + Sync>;

/// Capability object injected into every plugin at wiring time.
///
/// Arguments: main cache key, new results, TTL, is-final flag, keyword.
/// The closure closes over the owning plugin's name, so the cache layer can
/// tag updates without a back-pointer to the manager.
pub type CacheUpdater = Arc<
    dyn Fn(String, Vec<SearchResult>, Duration, bool, String) -> BoxFuture<'static, Result<(), SearchError>>
        + Send
        + Sync,
>;

/// Contract every federated searcher implements.
///
/// The dispatch machinery (`async_search`, caching, worker admission) comes
/// from [`BaseAsyncPlugin`]; a concrete plugin supplies `name`, `priority`
/// and the scraping logic behind `search`, then delegates the rest.
#[async_trait]
pub trait AsyncSearchPlugin: Send + Sync {
    /// Unique, lowercase, stable plugin name.
    fn name(&self) -> &str;

    /// Quality tier in `1..=4`; 1 is highest.
    fn priority(&self) -> i32;

    /// The synchronous convenience entry: run the real search end to end.
    async fn search(&self, keyword: &str, ext: &Ext) -> Result<Vec<SearchResult>, SearchError>;

    /// The dual-deadline dispatch entry; implemented by the base.
    async fn async_search(
        &self,
        keyword: &str,
        search_fn: SearchFn,
        main_cache_key: &str,
        ext: &Ext,
    ) -> Result<Vec<SearchResult>, SearchError>;

    /// Set the aggregate cache key before a dispatch.
    fn set_main_cache_key(&self, key: &str);

    /// Set the keyword under search, used for log lines.
    fn set_current_keyword(&self, keyword: &str);

    /// Inject the main-cache update capability.
    fn set_main_cache_updater(&self, updater: CacheUpdater);

    /// When true, the dispatcher's per-link keyword filter is suppressed
    /// (magnet-style plugins return deliberately broad results).
    fn skip_service_filter(&self) -> bool {
        false
    }

    /// Optional one-shot lazy initialization, invoked by the manager before
    /// the plugin joins the active set. The default is a no-op success; a
    /// plugin that returns an error is skipped, not fatal.
    async fn initialize(&self) -> Result<(), SearchError> {
        Ok(())
    }
}
