//! Link/title pairing: recover per-link titles from free-text content.
//!
//! Channel posts and scraped pages mix several resources into one blob of
//! text. Two strategies apply: a two-pass line scan when the content has
//! line breaks, and provider-regex segmentation when it is a single line.
//! Bare cloud-provider labels ("夸克", "百度网盘", …) are never titles.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use crate::model::Link;
use crate::util::{normalize_url, provider_patterns, LINK_REGEX};

static SYMBOL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\p{So}\p{Sk}]").expect("symbol regex"));

/// Decoration tokens that trail a resource name ("4K", "HDR", "更新12集" …)
/// and belong to the title rather than starting a new one.
static DECORATION_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:\d+K|HDR|MAX|臻彩|更新?\d+集|全\d+集|第\d+季)$").expect("decoration regex")
});

const LINK_LINE_PREFIXES: [&str; 6] = ["链接：", "地址：", "资源地址：", "网盘：", "网盘地址：", "链接:"];

const TITLE_PREFIXES: [&str; 6] = ["名称：", "标题：", "片名：", "名称:", "标题:", "片名:"];

const CLOUD_DISK_NAMES: [&str; 44] = [
    "夸克", "夸克网盘", "quark", "夸克云盘",
    "百度", "百度网盘", "baidu", "百度云", "bdwp", "bdpan",
    "迅雷", "迅雷网盘", "xunlei", "迅雷云盘",
    "115", "115网盘", "115云盘",
    "123", "123pan", "123网盘", "123云盘",
    "阿里", "阿里云", "阿里云盘", "aliyun", "alipan", "阿里网盘",
    "天翼", "天翼云", "天翼云盘", "tianyi", "天翼网盘",
    "uc", "uc网盘", "uc云盘",
    "移动", "移动云", "移动云盘", "caiyun", "彩云",
    "pikpak", "pikpak网盘",
    "磁力", "磁力链接",
];

/// Extract link-to-title correspondences from one result's content.
pub fn extract_link_title_pairs(content: &str) -> HashMap<String, String> {
    if content.contains('\n') {
        extract_pairs_with_newlines(content)
    } else {
        extract_pairs_without_newlines(content)
    }
}

fn extract_pairs_with_newlines(content: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let lines: Vec<&str> = content.split('\n').collect();

    // Pass 1: a line whose next line is (or contains) a link is a candidate
    // title; explicit markers override the heuristics.
    let mut last_title = String::new();

    for (i, raw_line) in lines.iter().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        let links: Vec<&str> = LINK_REGEX.find_iter(line).map(|m| m.as_str()).collect();

        if !links.is_empty() {
            let standard_link_line = is_link_line(line);

            if standard_link_line {
                if !last_title.is_empty() {
                    for link in &links {
                        map.insert((*link).to_string(), last_title.clone());
                    }
                }
            } else {
                // Possibly a "标题: 链接" one-liner.
                let inline_title = extract_title_from_link_line(line);
                if !inline_title.is_empty() {
                    for link in &links {
                        map.insert((*link).to_string(), inline_title.clone());
                    }
                } else if !last_title.is_empty() {
                    for link in &links {
                        map.insert((*link).to_string(), last_title.clone());
                    }
                }
            }
        } else {
            let next_is_link = lines
                .get(i + 1)
                .map(|next| {
                    let next = next.trim();
                    is_link_line(next) || LINK_REGEX.is_match(next)
                })
                .unwrap_or(true); // the final line may still be a title

            if next_is_link {
                let candidate = clean_title(line);
                if !candidate.is_empty() && !is_link_prefix(&candidate) {
                    last_title = candidate;
                }
            }
        }
    }

    // Pass 2: back-fill links that found no title, walking upward to the
    // nearest candidate title line.
    for (i, raw_line) in lines.iter().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        let links: Vec<&str> = LINK_REGEX.find_iter(line).map(|m| m.as_str()).collect();
        if links.is_empty() {
            continue;
        }

        for link in links {
            if map.contains_key(link) {
                continue;
            }
            for j in (0..i).rev() {
                let line_above = lines[j].trim();
                if line_above.is_empty() || LINK_REGEX.is_match(line_above) {
                    continue;
                }
                let candidate = clean_title(line_above);
                if !candidate.is_empty() && !is_link_prefix(&candidate) {
                    map.insert(link.to_string(), candidate);
                    break;
                }
            }
        }
    }

    map
}

fn extract_pairs_without_newlines(content: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();

    // Locate every provider link with its precise pattern, never a greedy
    // generic URL match.
    let mut found: Vec<(usize, &str)> = Vec::new();
    for pattern in provider_patterns() {
        for m in pattern.find_iter(content) {
            found.push((m.start(), m.as_str()));
        }
    }
    found.sort_by_key(|(pos, _)| *pos);

    // Dedup by normalized URL, keeping the first occurrence.
    let mut seen = HashMap::new();
    let mut links: Vec<(usize, &str)> = Vec::new();
    for (pos, url) in found {
        let normalized = normalize_url(url);
        if seen.insert(normalized, ()).is_none() {
            links.push((pos, url));
        }
    }

    if links.is_empty() {
        return map;
    }

    // Segment on link positions; each segment's trailing phrase names the
    // link that follows it.
    let mut last_end = 0usize;
    for (pos, url) in &links {
        if *pos >= last_end {
            let segment = &content[last_end..*pos];
            let title = extract_title_before_link(segment);
            if !title.is_empty() {
                map.insert((*url).to_string(), title);
            }
        }
        last_end = pos + url.len();
    }

    map
}

/// Pull the resource title off the tail of a segment preceding a link.
fn extract_title_before_link(text: &str) -> String {
    let text = text.trim();

    if let Some(idx) = text.find("链接：") {
        if idx > 0 {
            return checked_title(&text[..idx]);
        }
        return String::new();
    }

    // The trailing whitespace-delimited phrase names the next link. Walk
    // decoration tokens back onto the name they describe.
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.is_empty() {
        return String::new();
    }
    let mut start = tokens.len() - 1;
    while start > 0 && DECORATION_REGEX.is_match(tokens[start]) {
        start -= 1;
    }
    checked_title(&tokens[start..].join(" "))
}

/// A line that mainly carries a link, marked by a standard prefix.
fn is_link_line(line: &str) -> bool {
    let lower = line.to_lowercase();
    LINK_LINE_PREFIXES
        .iter()
        .any(|prefix| lower.starts_with(prefix))
}

/// Recover the title from a `"标题：链接"`-format line; empty when the part
/// before the colon is a link prefix or itself a URL.
fn extract_title_from_link_line(line: &str) -> String {
    for colon in ["：", ":"] {
        if let Some((head, _)) = line.split_once(colon) {
            if !head.contains("http") && !is_link_prefix(head) {
                return checked_title(head);
            }
            return String::new();
        }
    }
    String::new()
}

/// True for standard link-prefix words and bare cloud-provider labels,
/// including `"<provider>链接"` compounds. These never become titles.
fn is_link_prefix(text: &str) -> bool {
    let text = text.trim().to_lowercase();

    if ["链接", "地址", "资源地址", "网盘", "网盘地址"].contains(&text.as_str()) {
        return true;
    }

    if CLOUD_DISK_NAMES.contains(&text.as_str()) {
        return true;
    }

    let base = text
        .strip_suffix("链接")
        .or_else(|| text.strip_suffix("地址"))
        .unwrap_or(&text);
    CLOUD_DISK_NAMES.contains(&base)
}

/// Strip marker prefixes and unicode symbol characters off a title.
pub fn clean_title(title: &str) -> String {
    let mut title = title.trim();
    for prefix in TITLE_PREFIXES {
        title = title.strip_prefix(prefix).unwrap_or(title);
    }
    let cleaned = SYMBOL_REGEX.replace_all(title, "");
    cleaned.trim().to_string()
}

fn checked_title(text: &str) -> String {
    let title = clean_title(text);
    if is_link_prefix(&title) {
        String::new()
    } else {
        title
    }
}

/// Fallback for single-line content the regex pass could not pair: split on
/// a named provider prefix ("夸克链接：" …) and take each part's tail as the
/// preceding link's title.
pub fn match_links_without_newlines(content: &str, links: &[Link]) -> HashMap<String, String> {
    const SPLIT_PREFIXES: [&str; 9] = [
        "天翼链接：",
        "百度链接：",
        "夸克链接：",
        "阿里链接：",
        "UC链接：",
        "115链接：",
        "迅雷链接：",
        "123链接：",
        "链接：",
    ];

    let mut map = HashMap::new();

    let parts: Vec<&str> = match SPLIT_PREFIXES
        .iter()
        .find(|prefix| content.contains(*prefix))
    {
        Some(prefix) => content.split(prefix).collect(),
        None => return map,
    };

    if parts.len() < 2 || links.len() > parts.len() - 1 {
        return map;
    }

    let mut titles = vec![clean_title(parts[0])];
    for part in &parts[1..parts.len() - 1] {
        if let Some(end) = find_link_end(part) {
            if end > 0 {
                titles.push(clean_title(&part[end..]));
            }
        }
    }

    for (link, title) in links.iter().zip(titles) {
        if !title.is_empty() && !is_link_prefix(&title) {
            map.insert(link.url.clone(), title);
        }
    }

    map
}

/// First position after a bare link token: whitespace, a CJK character or an
/// opening parenthesis ends the URL.
fn find_link_end(text: &str) -> Option<usize> {
    for (idx, c) in text.char_indices() {
        if c.is_whitespace() || c == '(' || c == '（' || ('\u{4e00}'..='\u{9fff}').contains(&c) {
            return Some(idx);
        }
    }
    None
}
