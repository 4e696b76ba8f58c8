//! Text and URL helpers shared by the extractor, the merger and plugins.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::SearchResult;

/// Generic URL matcher used by the line-oriented title pairing pass.
pub static LINK_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s"']+"#).expect("link regex"));

/// Per-provider share-link patterns. Deliberately precise (anchored to the
/// provider host) so the single-line pairing pass never over-matches.
pub static TIANYI_PAN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://cloud\.189\.cn/(?:t/|web/share\?code=)?[0-9A-Za-z]+").unwrap());
pub static BAIDU_PAN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://pan\.baidu\.com/s/[0-9A-Za-z_-]+(?:\?pwd=[0-9A-Za-z]+)?").unwrap());
pub static QUARK_PAN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://pan\.quark\.cn/s/[0-9A-Za-z]+").unwrap());
pub static ALIYUN_PAN_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https?://(?:www\.)?(?:alipan|aliyundrive)\.com/s/[0-9A-Za-z]+").unwrap()
});
pub static UC_PAN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://drive\.uc\.cn/s/[0-9a-f]+(?:\?public=\d)?").unwrap());
pub static PAN_123_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https?://(?:www\.)?123(?:pan|684)\.(?:com|cn)/s/[0-9A-Za-z_-]+").unwrap()
});
pub static PAN_115_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://(?:115|anxia)\.com/s/[0-9A-Za-z]+(?:\?password=[0-9A-Za-z]+)?").unwrap());
pub static XUNLEI_PAN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://pan\.xunlei\.com/s/[0-9A-Za-z_-]+(?:\?pwd=[0-9A-Za-z]+)?").unwrap());

/// The single-line pairing pass scans with exactly these, in this order.
pub fn provider_patterns() -> [&'static Regex; 8] {
    [
        &TIANYI_PAN_PATTERN,
        &BAIDU_PAN_PATTERN,
        &QUARK_PAN_PATTERN,
        &ALIYUN_PAN_PATTERN,
        &UC_PAN_PATTERN,
        &PAN_123_PATTERN,
        &PAN_115_PATTERN,
        &XUNLEI_PAN_PATTERN,
    ]
}

/// Decode percent-escapes so `%E4%B8%AD` and `中` compare equal during URL
/// dedup. Returns the input unchanged when decoding fails.
pub fn normalize_url(raw: &str) -> String {
    match urlencoding::decode(raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw.to_string(),
    }
}

/// Cut a title before the first occurrence of any marker word.
///
/// Used to drop trailing blurbs ("简介", "描述") that scrapers glue onto
/// titles.
pub fn cut_title_by_keywords(title: &str, markers: &[&str]) -> String {
    let mut cut = title.len();
    for marker in markers {
        if let Some(idx) = title.find(marker) {
            cut = cut.min(idx);
        }
    }
    title[..cut].trim().to_string()
}

/// Case-insensitive multi-token keyword filter over title and content.
///
/// Every whitespace-separated token must appear in the title or the content.
/// Plugins use this to trim scraped pages down to on-topic results.
pub fn filter_results_by_keyword(results: Vec<SearchResult>, keyword: &str) -> Vec<SearchResult> {
    if keyword.is_empty() {
        return results;
    }

    let lower_keyword = keyword.to_lowercase();
    let tokens: Vec<&str> = lower_keyword.split_whitespace().collect();

    results
        .into_iter()
        .filter(|result| {
            let title = result.title.to_lowercase();
            let content = result.content.to_lowercase();
            tokens
                .iter()
                .all(|token| title.contains(token) || content.contains(token))
        })
        .collect()
}
