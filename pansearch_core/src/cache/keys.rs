//! Deterministic cache-key fingerprinting.
//!
//! Identical queries must land on identical disk keys across processes and
//! restarts, so the key source is fully normalized before hashing: keyword
//! lowercased and trimmed, plugin/channel sets sorted and lowercased, the
//! full (or unset) plugin set collapsed to `"all"`.

use sha2::{Digest, Sha256};

/// 128-bit hex digest of the normalized key source.
fn fingerprint(source: &str) -> String {
    let digest = Sha256::digest(source.as_bytes());
    let full = format!("{digest:x}");
    full[..32].to_string()
}

fn normalize_keyword(keyword: &str) -> String {
    keyword.trim().to_lowercase()
}

fn sorted_clause(names: &[String]) -> String {
    let mut cleaned: Vec<String> = names
        .iter()
        .filter(|name| !name.is_empty())
        .map(|name| name.to_lowercase())
        .collect();
    cleaned.sort();
    if cleaned.is_empty() {
        "all".to_string()
    } else {
        cleaned.join(",")
    }
}

/// Key for a plugin sub-search. `plugins == None` means the effective set is
/// every registered plugin, which shares the key with an explicit full list
/// (the dispatcher normalizes that case to `None` before calling).
pub fn generate_plugin_cache_key(keyword: &str, plugins: Option<&[String]>) -> String {
    let clause = match plugins {
        Some(plugins) => sorted_clause(plugins),
        None => "all".to_string(),
    };
    let source = format!("plugin:{}:{}", normalize_keyword(keyword), clause);
    fingerprint(&source)
}

/// Key for a TG sub-search over a channel set.
pub fn generate_tg_cache_key(keyword: &str, channels: &[String]) -> String {
    let source = format!("tg:{}:{}", normalize_keyword(keyword), sorted_clause(channels));
    fingerprint(&source)
}
