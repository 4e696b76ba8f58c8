//! The search service: one query in, one unified ranked response out.
//!
//! Orchestrates the parallel TG + plugin sub-searches, the aggregate cache,
//! the bounded fan-out pool, ranking and link grouping. Plugin cache updates
//! flow back through the capability closure wired here into the delayed
//! batch writer.

mod extractor;
mod merger;
mod ranker;

pub use extractor::{clean_title, extract_link_title_pairs, match_links_without_newlines};
pub use merger::{determine_link_type, merge_results_by_type, merge_search_results};
pub use ranker::{keyword_priority, result_source, ResultRanker, PRIORITY_KEYWORDS};

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{
    generate_plugin_cache_key, generate_tg_cache_key, BatchWriteManager, CacheOperation,
    DiskWriter, TwoLevelCache,
};
use crate::config::Config;
use crate::error::SearchError;
use crate::model::{
    Ext, ResultType, SearchRequest, SearchResponse, SearchResult, SourceType,
};
use crate::plugin::{PluginManager, PluginRegistry};
use crate::task_pool::execute_batch_with_timeout;
use crate::{AsyncSearchPlugin, CacheUpdater, SearchFn};

/// Interface to the Telegram-channel searcher. The HTML scraping behind it
/// is an external collaborator; the dispatcher only fans out over channels.
#[async_trait]
pub trait ChannelSearcher: Send + Sync {
    async fn search_channel(
        &self,
        keyword: &str,
        channel: &str,
    ) -> Result<Vec<SearchResult>, SearchError>;
}

pub struct SearchService {
    config: Config,
    registry: Arc<PluginRegistry>,
    manager: PluginManager,
    cache: Option<Arc<TwoLevelCache>>,
    tg_searcher: Option<Arc<dyn ChannelSearcher>>,
    ranker: ResultRanker,
}

impl SearchService {
    /// Wire the service together. When the cache is enabled this starts the
    /// batch write worker and injects a per-plugin cache updater (closing
    /// over each plugin's name) into every active plugin.
    pub fn new(
        config: Config,
        registry: Arc<PluginRegistry>,
        manager: PluginManager,
        cache: Option<Arc<TwoLevelCache>>,
        tg_searcher: Option<Arc<dyn ChannelSearcher>>,
    ) -> Self {
        let cache = if config.cache_enabled { cache } else { None };

        if let Some(cache) = &cache {
            let writer: DiskWriter = {
                let cache = Arc::clone(cache);
                Arc::new(move |key, data, ttl| {
                    let cache = Arc::clone(&cache);
                    Box::pin(async move { cache.set_both_levels(&key, data, ttl).await })
                })
            };
            let batch = BatchWriteManager::spawn(
                writer,
                cache.serializer(),
                config.batch_flush_interval(),
                config.batch_max_pending_bytes,
            );

            for plugin in manager.plugins() {
                let updater = make_plugin_updater(
                    Arc::clone(cache),
                    Arc::clone(&batch),
                    plugin.name().to_string(),
                    config.async_log_enabled,
                );
                plugin.set_main_cache_updater(updater);
            }
        }

        let ranker = ResultRanker::new(Arc::clone(&registry));
        Self {
            config,
            registry,
            manager,
            cache,
            tg_searcher,
            ranker,
        }
    }

    pub fn plugin_manager(&self) -> &PluginManager {
        &self.manager
    }

    /// Execute one query end to end.
    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse, SearchError> {
        if request.keyword.trim().is_empty() {
            return Err(SearchError::InvalidInput("keyword is required".into()));
        }

        let source_type = request.source_type;
        let plugins = self.normalize_plugins_param(source_type, request.plugins.as_deref());
        let concurrency = if request.concurrency == 0 {
            self.config.default_concurrency
        } else {
            request.concurrency
        };

        let mut ext = request.ext.clone();
        if request.force_refresh {
            ext.insert("refresh".to_string(), json!(true));
        }

        let tg_branch = async {
            if source_type.includes_tg() && self.tg_searcher.is_some() {
                self.search_tg(&request.keyword, &request.channels, request.force_refresh)
                    .await
            } else {
                Ok(Vec::new())
            }
        };
        let plugin_branch = async {
            if source_type.includes_plugins() && self.config.async_plugin_enabled {
                self.search_plugins(
                    &request.keyword,
                    plugins.as_deref(),
                    request.force_refresh,
                    concurrency,
                    &ext,
                )
                .await
            } else {
                Ok(Vec::new())
            }
        };

        let (tg_results, plugin_results) = tokio::join!(tg_branch, plugin_branch);
        let (tg_results, plugin_results) = (tg_results?, plugin_results?);

        let mut all_results = merge_search_results(tg_results, plugin_results);
        self.ranker.sort_results(&mut all_results);

        let filtered = self.filter_results(&all_results);
        let merged_links = merge_results_by_type(
            &all_results,
            &request.keyword,
            &request.cloud_types,
            &self.registry,
        );

        let total = match request.result_type {
            ResultType::MergedByType => merged_links.values().map(Vec::len).sum(),
            ResultType::All | ResultType::Results => filtered.len(),
        };

        let response = SearchResponse {
            total,
            results: Some(filtered),
            merged_by_type: Some(merged_links),
        };
        Ok(project_response(response, request.result_type))
    }

    /// Normalize the requested plugin list. `None` means "all plugins":
    /// an empty list, an all-empty-strings list, and the full registered set
    /// all collapse to it, so their cache keys coincide.
    fn normalize_plugins_param(
        &self,
        source_type: SourceType,
        plugins: Option<&[String]>,
    ) -> Option<Vec<String>> {
        if source_type == SourceType::Tg {
            return None;
        }

        let plugins = plugins?;
        let requested: Vec<String> = plugins
            .iter()
            .filter(|name| !name.is_empty())
            .map(|name| name.to_lowercase())
            .collect();
        if requested.is_empty() {
            return None;
        }

        let mut registered: Vec<String> = self
            .registry
            .names()
            .into_iter()
            .map(|name| name.to_lowercase())
            .collect();
        registered.sort();
        let mut sorted_requested = requested.clone();
        sorted_requested.sort();
        sorted_requested.dedup();
        if sorted_requested == registered {
            return None;
        }

        Some(requested)
    }

    fn filter_results(&self, results: &[SearchResult]) -> Vec<SearchResult> {
        results
            .iter()
            .filter(|result| {
                let source = result_source(result);
                let level = self.ranker.plugin_level_by_source(&source);
                result.datetime.is_some() || keyword_priority(&result.title) > 0 || level <= 2
            })
            .cloned()
            .collect()
    }

    async fn search_tg(
        &self,
        keyword: &str,
        channels: &[String],
        force_refresh: bool,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let searcher = match &self.tg_searcher {
            Some(searcher) => Arc::clone(searcher),
            None => return Ok(Vec::new()),
        };

        let cache_key = generate_tg_cache_key(keyword, channels);
        if !force_refresh {
            if let Some(results) = self.read_aggregate_cache(&cache_key).await {
                return Ok(results);
            }
        }

        let tasks: Vec<_> = channels
            .iter()
            .map(|channel| {
                let searcher = Arc::clone(&searcher);
                let keyword = keyword.to_string();
                let channel = channel.clone();
                async move {
                    match searcher.search_channel(&keyword, &channel).await {
                        Ok(results) => Some(results),
                        Err(err) => {
                            debug!(
                                target: "pansearch.service",
                                channel = %channel,
                                error = %err,
                                "channel search failed"
                            );
                            None
                        }
                    }
                }
            })
            .collect();

        let concurrency = channels.len().max(1);
        let batches =
            execute_batch_with_timeout(tasks, concurrency, self.config.plugin_timeout()).await;
        let results: Vec<SearchResult> = batches.into_iter().flatten().flatten().collect();

        self.write_back_aggregate(&cache_key, results.clone());
        Ok(results)
    }

    async fn search_plugins(
        &self,
        keyword: &str,
        plugins: Option<&[String]>,
        force_refresh: bool,
        concurrency: usize,
        ext: &Ext,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let cache_key = generate_plugin_cache_key(keyword, plugins);
        if !force_refresh {
            if let Some(results) = self.read_aggregate_cache(&cache_key).await {
                info!(
                    target: "pansearch.service",
                    keyword,
                    count = results.len(),
                    "aggregate cache hit"
                );
                return Ok(results);
            }
        }

        let available = self.select_available_plugins(plugins);
        let tasks: Vec<_> = available
            .iter()
            .map(|plugin| {
                let plugin = Arc::clone(plugin);
                let keyword = keyword.to_string();
                let cache_key = cache_key.clone();
                let ext = ext.clone();
                async move {
                    plugin.set_main_cache_key(&cache_key);
                    plugin.set_current_keyword(&keyword);

                    let plugin_for_fn = Arc::clone(&plugin);
                    let search_fn: SearchFn = Arc::new(move |_client, kw, ext| {
                        let plugin = Arc::clone(&plugin_for_fn);
                        Box::pin(async move { plugin.search(&kw, &ext).await })
                    });

                    match plugin
                        .async_search(&keyword, search_fn, &cache_key, &ext)
                        .await
                    {
                        Ok(results) => Some(results),
                        Err(err) => {
                            // A failing plugin contributes nothing; the query
                            // goes on.
                            debug!(
                                target: "pansearch.service",
                                plugin = plugin.name(),
                                error = %err,
                                "plugin search failed"
                            );
                            None
                        }
                    }
                }
            })
            .collect();

        let batches =
            execute_batch_with_timeout(tasks, concurrency, self.config.plugin_timeout()).await;
        let results: Vec<SearchResult> = batches
            .into_iter()
            .flatten()
            .flatten()
            .filter(|result| !result.links.is_empty())
            .collect();

        self.write_back_aggregate(&cache_key, results.clone());
        Ok(results)
    }

    fn select_available_plugins(
        &self,
        plugins: Option<&[String]>,
    ) -> Vec<Arc<dyn AsyncSearchPlugin>> {
        match plugins {
            None => self.manager.plugins().to_vec(),
            Some(requested) => {
                let allowed: Vec<String> =
                    requested.iter().map(|name| name.to_lowercase()).collect();
                self.manager
                    .plugins()
                    .iter()
                    .filter(|plugin| allowed.contains(&plugin.name().to_lowercase()))
                    .cloned()
                    .collect()
            }
        }
    }

    /// Read the aggregate cache, dropping the memory entry first so a newer
    /// disk write from a background continuation becomes visible.
    async fn read_aggregate_cache(&self, cache_key: &str) -> Option<Vec<SearchResult>> {
        let cache = self.cache.as_ref()?;
        cache.delete_memory(cache_key);
        match cache.get(cache_key).await {
            Ok((data, true)) => match cache.serializer().deserialize(&data) {
                Ok(results) => Some(results),
                Err(err) => {
                    // Corruption reads as a miss.
                    debug!(
                        target: "pansearch.service",
                        key = cache_key,
                        error = %err,
                        "aggregate cache entry undecodable"
                    );
                    None
                }
            },
            _ => None,
        }
    }

    /// Fire-and-forget write of the aggregated list; the response never
    /// waits on the cache.
    fn write_back_aggregate(&self, cache_key: &str, results: Vec<SearchResult>) {
        let cache = match &self.cache {
            Some(cache) => Arc::clone(cache),
            None => return,
        };
        let cache_key = cache_key.to_string();
        let ttl = self.config.cache_ttl();
        tokio::spawn(async move {
            let data = match cache.serializer().serialize(&results) {
                Ok(data) => data,
                Err(_) => return,
            };
            if let Err(err) = cache.set_both_levels(&cache_key, data, ttl).await {
                warn!(
                    target: "pansearch.service",
                    key = %cache_key,
                    error = %err,
                    "aggregate write-back failed"
                );
            }
        });
    }
}

/// Build the read-merge-write cache updater for one plugin.
///
/// Memory always updates immediately; the disk write rides the batch
/// manager (priority 1 for finals). If the batch worker is unavailable the
/// update degrades to a direct both-levels write for finals.
fn make_plugin_updater(
    cache: Arc<TwoLevelCache>,
    batch: Arc<BatchWriteManager>,
    plugin_name: String,
    log_enabled: bool,
) -> CacheUpdater {
    Arc::new(move |key, new_results, ttl, is_final, keyword| {
        let cache = Arc::clone(&cache);
        let batch = Arc::clone(&batch);
        let plugin_name = plugin_name.clone();
        Box::pin(async move {
            let serializer = cache.serializer();

            let merged = match cache.get(&key).await {
                Ok((data, true)) => match serializer.deserialize(&data) {
                    Ok(existing) => {
                        let existing_count = existing.len();
                        let merged = merge_search_results(existing, new_results.clone());
                        if log_enabled && !keyword.is_empty() {
                            info!(
                                target: "pansearch.service.cache",
                                plugin = %plugin_name,
                                keyword = %keyword,
                                existing = existing_count,
                                new = new_results.len(),
                                merged = merged.len(),
                                "merge-update"
                            );
                        }
                        merged
                    }
                    Err(_) => new_results,
                },
                _ => new_results,
            };

            let data = serializer.serialize(&merged)?;
            let data_size = data.len();
            cache.set_memory_only(&key, data.clone(), ttl).await?;

            let op = CacheOperation::new(
                key.clone(),
                merged,
                ttl,
                is_final,
                plugin_name.clone(),
                keyword,
                data_size,
            );
            match batch.handle_cache_operation(op).await {
                Ok(()) => Ok(()),
                Err(_) if is_final => cache.set_both_levels(&key, data, ttl).await,
                Err(_) => Ok(()),
            }
        })
    })
}

fn project_response(response: SearchResponse, result_type: ResultType) -> SearchResponse {
    match result_type {
        ResultType::All => response,
        ResultType::Results => SearchResponse {
            total: response.total,
            results: response.results,
            merged_by_type: None,
        },
        ResultType::MergedByType => SearchResponse {
            total: response.total,
            results: None,
            merged_by_type: response.merged_by_type,
        },
    }
}
