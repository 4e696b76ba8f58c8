//! Result merging and the grouped presentation view.
//!
//! Two distinct merges live here: the `unique_id`-keyed union of result
//! lists (cache updates, TG + plugin aggregation), and the URL-keyed dedup
//! that groups download links by cloud-provider type for the response.

use std::collections::HashMap;
use std::sync::Arc;

use crate::model::{MergedLink, MergedLinks, SearchResult};
use crate::plugin::PluginRegistry;
use crate::service::extractor::{extract_link_title_pairs, match_links_without_newlines};
use crate::service::ranker::result_source;
use crate::util::{cut_title_by_keywords, normalize_url};

/// Markers that cut a recovered title before trailing blurbs.
const TITLE_CUT_MARKERS: [&str; 2] = ["简介", "描述"];

/// Dedup key for a result: `unique_id` when present, else a title/channel
/// composite (some TG posts arrive without ids).
fn result_key(result: &SearchResult) -> String {
    if !result.unique_id.is_empty() {
        return result.unique_id.clone();
    }
    format!("title_{}_{}", result.title, result.channel)
}

/// How much a result knows about itself. The richer record wins a
/// `unique_id` collision during merge.
fn completeness_score(result: &SearchResult) -> usize {
    let mut score = 0;
    if !result.unique_id.is_empty() {
        score += 10;
    }
    if !result.links.is_empty() {
        score += 5 + result.links.len();
    }
    if !result.content.is_empty() {
        score += 3;
    }
    score += result.title.chars().count() / 10;
    if !result.channel.is_empty() {
        score += 2;
    }
    score += result.tags.len();
    score
}

/// Union-merge two result lists, deduplicated by `unique_id`. On collision
/// the more complete record survives. The output is ordered newest-first;
/// missing timestamps sort last, insertion order breaks ties.
pub fn merge_search_results(
    existing: Vec<SearchResult>,
    new_results: Vec<SearchResult>,
) -> Vec<SearchResult> {
    let mut order: Vec<String> = Vec::new();
    let mut by_key: HashMap<String, SearchResult> = HashMap::new();

    for result in existing.into_iter().chain(new_results) {
        let key = result_key(&result);
        match by_key.get(&key) {
            Some(current) => {
                if completeness_score(&result) > completeness_score(current) {
                    by_key.insert(key, result);
                }
            }
            None => {
                order.push(key.clone());
                by_key.insert(key, result);
            }
        }
    }

    let mut merged: Vec<SearchResult> = order
        .into_iter()
        .filter_map(|key| by_key.remove(&key))
        .collect();
    merged.sort_by(|a, b| b.datetime.cmp(&a.datetime));
    merged
}

/// Classify a URL into its cloud-provider type tag.
pub fn determine_link_type(url: &str) -> &'static str {
    let url = url.to_lowercase();
    if url.contains("quark") {
        "quark"
    } else if url.contains("baidu") {
        "baidu"
    } else if url.contains("xunlei") {
        "xunlei"
    } else if url.contains("aliyundrive") || url.contains("alipan") {
        "aliyun"
    } else if url.contains("uc.cn") {
        "uc"
    } else if url.contains("123pan") || url.contains("123684") {
        "123"
    } else if url.contains("115") {
        "115"
    } else if url.contains("tianyi") || url.contains("cloud.189.cn") {
        "tianyi"
    } else if url.contains("caiyun.139") {
        "mobile"
    } else if url.contains("pikpak") {
        "pikpak"
    } else if url.starts_with("magnet:") {
        "magnet"
    } else if url.starts_with("ed2k:") {
        "ed2k"
    } else {
        "unknown"
    }
}

/// Does the plugin that produced this result opt out of the keyword filter?
fn should_skip_filter(result: &SearchResult, registry: &PluginRegistry) -> bool {
    if result.channel.is_empty() {
        if let Some((plugin_name, _)) = result.unique_id.split_once('-') {
            if let Some(plugin) = registry.get_by_name(plugin_name) {
                return plugin.skip_service_filter();
            }
        }
    }
    false
}

/// Build the grouped, deduplicated link view of a result set.
///
/// Per link: recover its title (work-title override, pairing map, prefix
/// match, then the result title), apply the keyword filter unless the owning
/// plugin skips it, dedup by normalized URL with the later timestamp winning,
/// then bucket by provider type preserving insertion order.
pub fn merge_results_by_type(
    results: &[SearchResult],
    keyword: &str,
    cloud_types: &[String],
    registry: &Arc<PluginRegistry>,
) -> MergedLinks {
    let lower_keyword = keyword.to_lowercase();
    let mut unique: HashMap<String, MergedLink> = HashMap::new();

    for result in results {
        let mut pairs = extract_link_title_pairs(&result.content);
        if pairs.is_empty() && !result.links.is_empty() && !result.content.contains('\n') {
            pairs = match_links_without_newlines(&result.content, &result.links);
        }

        let skip_keyword_filter = should_skip_filter(result, registry);
        let source = result_source(result);

        for link in &result.links {
            let mut title = result.title.clone();
            if let Some(work_title) = &link.work_title {
                if !work_title.is_empty() {
                    title = work_title.clone();
                }
            } else if let Some(paired) = pairs.get(&link.url) {
                if !paired.is_empty() {
                    title = paired.clone();
                }
            } else if let Some(paired) = pairs
                .iter()
                .find(|(mapped_url, _)| mapped_url.starts_with(&link.url))
                .map(|(_, mapped_title)| mapped_title)
            {
                if !paired.is_empty() {
                    title = paired.clone();
                }
            }

            if !skip_keyword_filter
                && !lower_keyword.is_empty()
                && !title.to_lowercase().contains(&lower_keyword)
            {
                continue;
            }

            let title = cut_title_by_keywords(&title, &TITLE_CUT_MARKERS);
            let datetime = link.datetime.or(result.datetime);

            let merged_link = MergedLink {
                url: link.url.clone(),
                password: link.password.clone(),
                note: title,
                datetime,
                source: source.clone(),
                images: result.images.clone(),
            };

            let dedup_key = normalize_url(&link.url);
            match unique.get(&dedup_key) {
                Some(existing) if merged_link.datetime <= existing.datetime => {}
                _ => {
                    unique.insert(dedup_key, merged_link);
                }
            }
        }
    }

    // Re-walk the input to emit surviving links in first-seen order.
    let mut merged: MergedLinks = HashMap::new();
    let mut emitted: HashMap<String, ()> = HashMap::new();
    for result in results {
        for link in &result.links {
            let dedup_key = normalize_url(&link.url);
            if emitted.contains_key(&dedup_key) {
                continue;
            }
            if let Some(merged_link) = unique.get(&dedup_key) {
                emitted.insert(dedup_key, ());
                let link_type = determine_link_type(&merged_link.url);
                merged
                    .entry(link_type.to_string())
                    .or_default()
                    .push(merged_link.clone());
            }
        }
    }

    if cloud_types.is_empty() {
        return merged;
    }
    filter_links_by_cloud_types(merged, cloud_types)
}

fn filter_links_by_cloud_types(merged: MergedLinks, cloud_types: &[String]) -> MergedLinks {
    let allowed: Vec<String> = cloud_types
        .iter()
        .map(|cloud_type| cloud_type.trim().to_lowercase())
        .collect();
    merged
        .into_iter()
        .filter(|(link_type, _)| allowed.contains(&link_type.to_lowercase()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Link;
    use crate::plugin::tests_support::StubPlugin;
    use chrono::{Duration, Utc};

    fn empty_registry() -> Arc<PluginRegistry> {
        Arc::new(PluginRegistry::new())
    }

    #[test]
    fn test_merge_dedups_by_unique_id_and_keeps_richer_record() {
        let now = Utc::now();
        // Scenario: A returns [A-1, A-2]; B returns [A-1, B-3] where B's A-1
        // is later and carries an extra link.
        let from_a = vec![
            SearchResult::new("A-1", "resource one")
                .with_datetime(now - Duration::hours(2))
                .with_link(Link::new("https://pan.quark.cn/s/one")),
            SearchResult::new("A-2", "resource two")
                .with_datetime(now - Duration::hours(1))
                .with_link(Link::new("https://pan.quark.cn/s/two")),
        ];
        let from_b = vec![
            SearchResult::new("A-1", "resource one, richer")
                .with_datetime(now)
                .with_link(Link::new("https://pan.quark.cn/s/one"))
                .with_link(Link::new("https://pan.baidu.com/s/extra")),
            SearchResult::new("B-3", "resource three")
                .with_datetime(now - Duration::minutes(30))
                .with_link(Link::new("https://pan.quark.cn/s/three")),
        ];

        let merged = merge_search_results(from_a, from_b);
        assert_eq!(merged.len(), 3);

        let a1 = merged.iter().find(|r| r.unique_id == "A-1").unwrap();
        assert_eq!(a1.links.len(), 2, "the richer duplicate wins");
        assert_eq!(a1.title, "resource one, richer");
        // Newest-first ordering.
        assert_eq!(merged[0].unique_id, "A-1");
    }

    #[test]
    fn test_merge_is_order_insensitive_for_content() {
        let a = vec![SearchResult::new("x-1", "one"), SearchResult::new("x-2", "two")];
        let b = vec![SearchResult::new("x-2", "two"), SearchResult::new("x-3", "three")];

        let ab = merge_search_results(a.clone(), b.clone());
        let ba = merge_search_results(b, a);

        let mut ids_ab: Vec<String> = ab.iter().map(|r| r.unique_id.clone()).collect();
        let mut ids_ba: Vec<String> = ba.iter().map(|r| r.unique_id.clone()).collect();
        ids_ab.sort();
        ids_ba.sort();
        assert_eq!(ids_ab, ids_ba);
    }

    #[test]
    fn test_link_type_classification_table() {
        assert_eq!(determine_link_type("https://pan.quark.cn/s/a"), "quark");
        assert_eq!(determine_link_type("https://pan.baidu.com/s/1a"), "baidu");
        assert_eq!(determine_link_type("https://pan.xunlei.com/s/a"), "xunlei");
        assert_eq!(determine_link_type("https://www.alipan.com/s/a"), "aliyun");
        assert_eq!(determine_link_type("https://www.aliyundrive.com/s/a"), "aliyun");
        assert_eq!(determine_link_type("https://drive.uc.cn/s/ff00"), "uc");
        assert_eq!(determine_link_type("https://www.123pan.com/s/a"), "123");
        assert_eq!(determine_link_type("https://www.123684.com/s/a"), "123");
        assert_eq!(determine_link_type("https://115.com/s/a"), "115");
        assert_eq!(determine_link_type("https://cloud.189.cn/t/a"), "tianyi");
        assert_eq!(determine_link_type("https://caiyun.139.com/m/i?a"), "mobile");
        assert_eq!(determine_link_type("https://mypikpak.com/s/a"), "pikpak");
        assert_eq!(determine_link_type("magnet:?xt=urn:btih:ff"), "magnet");
        assert_eq!(determine_link_type("ed2k://|file|x|123|ff|/"), "ed2k");
        assert_eq!(determine_link_type("https://example.com/x"), "unknown");
    }

    #[test]
    fn test_grouping_scenario_quark_with_paired_note() {
        let result = SearchResult::new("tg-1", "合集")
            .with_channel("moviepan")
            .with_content("阿凡达\n夸克链接: https://pan.quark.cn/s/X 密码: abcd\n")
            .with_link(Link::new("https://pan.quark.cn/s/X").with_password("abcd"));

        let merged = merge_results_by_type(&[result], "阿凡达", &[], &empty_registry());
        let quark = merged.get("quark").expect("quark bucket");
        assert_eq!(quark.len(), 1);
        assert_eq!(quark[0].note, "阿凡达");
        assert_eq!(quark[0].password, "abcd");
        assert_eq!(quark[0].source, "tg:moviepan");
    }

    #[test]
    fn test_url_dedup_later_datetime_wins() {
        let now = Utc::now();
        let older = SearchResult::new("a-1", "资源 甲")
            .with_datetime(now - Duration::hours(5))
            .with_link(Link::new("https://pan.quark.cn/s/dup"));
        let newer = SearchResult::new("b-2", "资源 乙")
            .with_datetime(now)
            .with_link(Link::new("https://pan.quark.cn/s/dup"));

        let merged = merge_results_by_type(&[older, newer], "资源", &[], &empty_registry());
        let quark = merged.get("quark").unwrap();
        assert_eq!(quark.len(), 1);
        assert_eq!(quark[0].note, "资源 乙");
    }

    #[test]
    fn test_percent_encoded_urls_collide() {
        let first = SearchResult::new("a-1", "中文 资源")
            .with_link(Link::new("https://pan.quark.cn/s/%E4%B8%AD"));
        let second = SearchResult::new("b-2", "中文 资源 二")
            .with_datetime(Utc::now())
            .with_link(Link::new("https://pan.quark.cn/s/中"));

        let merged = merge_results_by_type(&[first, second], "", &[], &empty_registry());
        let quark = merged.get("quark").unwrap();
        assert_eq!(quark.len(), 1, "decoded escapes collide");
    }

    #[test]
    fn test_keyword_filter_drops_off_topic_links() {
        let on_topic = SearchResult::new("a-1", "流浪地球 4K")
            .with_link(Link::new("https://pan.quark.cn/s/on"));
        let off_topic = SearchResult::new("a-2", "完全无关")
            .with_link(Link::new("https://pan.quark.cn/s/off"));

        let merged =
            merge_results_by_type(&[on_topic, off_topic], "流浪地球", &[], &empty_registry());
        let quark = merged.get("quark").unwrap();
        assert_eq!(quark.len(), 1);
        assert_eq!(quark[0].url, "https://pan.quark.cn/s/on");
    }

    #[test]
    fn test_skip_service_filter_respected_for_magnet_plugin() {
        // Scenario: plugin "mag" skips the filter; its off-keyword magnet
        // link must still land in the magnet bucket.
        let registry = PluginRegistry::new();
        registry.register(Arc::new(StubPlugin::named("mag", 3).with_skip_filter()));
        let registry = Arc::new(registry);

        let result = SearchResult::new("mag-1", "标题与关键词无关")
            .with_link(Link::new("magnet:?xt=urn:btih:deadbeef"));

        let merged = merge_results_by_type(&[result], "流浪地球", &[], &registry);
        assert_eq!(merged.get("magnet").map(Vec::len), Some(1));
    }

    #[test]
    fn test_work_title_override_beats_pairing() {
        let result = SearchResult::new("a-1", "外层标题")
            .with_content("配对标题\nhttps://pan.quark.cn/s/w\n")
            .with_link(Link::new("https://pan.quark.cn/s/w").with_work_title("单链标题"));

        let merged = merge_results_by_type(&[result], "", &[], &empty_registry());
        assert_eq!(merged.get("quark").unwrap()[0].note, "单链标题");
    }

    #[test]
    fn test_cloud_types_filter_keeps_named_buckets_only() {
        let result = SearchResult::new("a-1", "资源")
            .with_link(Link::new("https://pan.quark.cn/s/q"))
            .with_link(Link::new("https://pan.baidu.com/s/1b"));

        let merged = merge_results_by_type(
            &[result],
            "资源",
            &["quark".to_string()],
            &empty_registry(),
        );
        assert!(merged.contains_key("quark"));
        assert!(!merged.contains_key("baidu"));
    }

    #[test]
    fn test_link_datetime_overrides_result_datetime() {
        let result_time = Utc::now() - Duration::days(10);
        let link_time = Utc::now();
        let result = SearchResult::new("a-1", "资源")
            .with_datetime(result_time)
            .with_link(Link::new("https://pan.quark.cn/s/q").with_datetime(link_time));

        let merged = merge_results_by_type(&[result], "资源", &[], &empty_registry());
        assert_eq!(merged.get("quark").unwrap()[0].datetime, Some(link_time));
    }
}
