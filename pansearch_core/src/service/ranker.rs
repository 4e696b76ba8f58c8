//! Multi-factor result scoring: plugin tier, title keywords, recency.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

use crate::model::SearchResult;
use crate::plugin::PluginRegistry;

/// Title tokens that mark a richer resource, strongest first.
pub const PRIORITY_KEYWORDS: [&str; 7] = ["合集", "系列", "全", "完", "最新", "附", "complete"];

/// Title score: `(list length - index) * 70` for the first matching token.
pub fn keyword_priority(title: &str) -> i64 {
    let title = title.to_lowercase();
    for (idx, keyword) in PRIORITY_KEYWORDS.iter().enumerate() {
        if title.contains(keyword) {
            return ((PRIORITY_KEYWORDS.len() - idx) as i64) * 70;
        }
    }
    0
}

/// Provenance string for a result: `"tg:<channel>"` for TG output,
/// `"plugin:<name>"` recovered from the `<plugin>-<id>` unique-id convention,
/// `"unknown"` otherwise.
pub fn result_source(result: &SearchResult) -> String {
    if !result.channel.is_empty() {
        return format!("tg:{}", result.channel);
    }
    if let Some((plugin, _)) = result.unique_id.split_once('-') {
        if !plugin.is_empty() {
            return format!("plugin:{plugin}");
        }
    }
    "unknown".to_string()
}

/// Recency score, piecewise on age in days. Missing timestamps score zero.
fn time_score(datetime: Option<DateTime<Utc>>, now: DateTime<Utc>) -> i64 {
    let datetime = match datetime {
        Some(datetime) => datetime,
        None => return 0,
    };
    let days = (now - datetime).num_hours() as f64 / 24.0;
    match days {
        d if d <= 1.0 => 500,
        d if d <= 3.0 => 400,
        d if d <= 7.0 => 300,
        d if d <= 30.0 => 200,
        d if d <= 90.0 => 100,
        d if d <= 365.0 => 50,
        _ => 20,
    }
}

pub struct ResultRanker {
    registry: Arc<PluginRegistry>,
    /// source string -> tier; lookups against the registry are memoized.
    level_cache: DashMap<String, i32>,
}

impl ResultRanker {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self {
            registry,
            level_cache: DashMap::new(),
        }
    }

    /// Tier for a provenance string. TG and unknown sources sit at tier 3.
    pub fn plugin_level_by_source(&self, source: &str) -> i32 {
        if let Some(level) = self.level_cache.get(source) {
            return *level;
        }

        let level = match source.split_once(':') {
            Some(("plugin", name)) => self
                .registry
                .get_by_name(name)
                .map(|plugin| plugin.priority())
                .unwrap_or(3),
            _ => 3,
        };

        self.level_cache.insert(source.to_string(), level);
        level
    }

    fn plugin_level_score(&self, source: &str) -> i64 {
        match self.plugin_level_by_source(source) {
            1 => 1000,
            2 => 500,
            3 => 0,
            4 => -200,
            _ => 0,
        }
    }

    fn total_score(&self, result: &SearchResult, now: DateTime<Utc>) -> i64 {
        let source = result_source(result);
        self.plugin_level_score(&source)
            + keyword_priority(&result.title)
            + time_score(result.datetime, now)
    }

    /// Sort descending by composite score. The sort is stable, so equal
    /// scores keep their input order and the outcome is deterministic.
    pub fn sort_results(&self, results: &mut [SearchResult]) {
        let now = Utc::now();
        let mut scored: Vec<(i64, SearchResult)> = results
            .iter()
            .map(|result| (self.total_score(result, now), result.clone()))
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        for (slot, (_, result)) in results.iter_mut().zip(scored) {
            *slot = result;
        }
    }
}
