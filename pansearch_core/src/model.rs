//! Core data model shared by plugins, the caches and the search service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;

use crate::error::SearchError;

/// Open extension map forwarded verbatim to plugins.
pub type Ext = serde_json::Map<String, Value>;

/// One resource record produced by a searcher.
///
/// `unique_id` is the dedup key. Plugin results use `"<plugin>-<source-id>"`;
/// Telegram results use the message id and carry the channel name in
/// `channel` (empty for plugin results — this is how provenance is told apart
/// without a separate tag).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub unique_id: String,

    pub title: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,

    /// Publication timestamp; `None` when the source does not provide one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datetime: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub channel: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Link>,
}

impl SearchResult {
    pub fn new(unique_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            unique_id: unique_id.into(),
            title: title.into(),
            content: String::new(),
            datetime: None,
            channel: String::new(),
            tags: Vec::new(),
            images: Vec::new(),
            links: Vec::new(),
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_datetime(mut self, datetime: DateTime<Utc>) -> Self {
        self.datetime = Some(datetime);
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub fn with_link(mut self, link: Link) -> Self {
        self.links.push(link);
        self
    }
}

/// One download pointer inside a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub url: String,

    /// Cloud-provider tag, one of the values produced by
    /// [`crate::service::determine_link_type`].
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub link_type: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,

    /// Per-link title override; wins over title pairing when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_title: Option<String>,

    /// Per-link timestamp; wins over the result timestamp when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datetime: Option<DateTime<Utc>>,
}

impl Link {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            link_type: String::new(),
            password: String::new(),
            work_title: None,
            datetime: None,
        }
    }

    pub fn with_type(mut self, link_type: impl Into<String>) -> Self {
        self.link_type = link_type.into();
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn with_work_title(mut self, title: impl Into<String>) -> Self {
        self.work_title = Some(title.into());
        self
    }

    pub fn with_datetime(mut self, datetime: DateTime<Utc>) -> Self {
        self.datetime = Some(datetime);
        self
    }
}

/// A deduplicated download link in the grouped presentation view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedLink {
    pub url: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,

    /// The per-link title recovered by pairing (or the result title).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub note: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datetime: Option<DateTime<Utc>>,

    /// Provenance: `"tg:<channel>"` or `"plugin:<name>"`.
    pub source: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

/// Grouped output: cloud-type tag to ordered link list.
pub type MergedLinks = HashMap<String, Vec<MergedLink>>;

/// Result of one plugin dispatch, with an explicit finality flag so callers
/// can distinguish "complete answer in hand" from "wait, more coming".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginSearchResult {
    pub results: Vec<SearchResult>,

    pub is_final: bool,

    pub timestamp: DateTime<Utc>,

    pub source: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// Which fields of the response get populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultType {
    All,
    Results,
    #[default]
    MergedByType,
}

impl FromStr for ResultType {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "merged_by_type" => Ok(ResultType::MergedByType),
            "all" => Ok(ResultType::All),
            "results" => Ok(ResultType::Results),
            other => Err(SearchError::InvalidInput(format!(
                "unknown result type: {other}"
            ))),
        }
    }
}

/// Which back-end families participate in a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    #[default]
    All,
    Tg,
    Plugin,
}

impl SourceType {
    pub fn includes_tg(self) -> bool {
        matches!(self, SourceType::All | SourceType::Tg)
    }

    pub fn includes_plugins(self) -> bool {
        matches!(self, SourceType::All | SourceType::Plugin)
    }
}

impl FromStr for SourceType {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "all" => Ok(SourceType::All),
            "tg" => Ok(SourceType::Tg),
            "plugin" => Ok(SourceType::Plugin),
            other => Err(SearchError::InvalidInput(format!(
                "unknown source type: {other}"
            ))),
        }
    }
}

/// One search query as seen by the dispatcher.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    pub keyword: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<String>,

    /// Fan-out parallelism; `0` means "use the configured default".
    #[serde(default)]
    pub concurrency: usize,

    #[serde(default)]
    pub force_refresh: bool,

    #[serde(default)]
    pub result_type: ResultType,

    #[serde(default)]
    pub source_type: SourceType,

    /// Plugin allow-list. `None`, empty, all-empty-strings, or the full
    /// registered set all normalize to "all plugins".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugins: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cloud_types: Vec<String>,

    #[serde(default, skip_serializing_if = "Ext::is_empty")]
    pub ext: Ext,
}

impl SearchRequest {
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            ..Default::default()
        }
    }

    pub fn with_channels(mut self, channels: Vec<String>) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_source_type(mut self, source_type: SourceType) -> Self {
        self.source_type = source_type;
        self
    }

    pub fn with_result_type(mut self, result_type: ResultType) -> Self {
        self.result_type = result_type;
        self
    }

    pub fn with_plugins(mut self, plugins: Vec<String>) -> Self {
        self.plugins = Some(plugins);
        self
    }

    pub fn with_cloud_types(mut self, cloud_types: Vec<String>) -> Self {
        self.cloud_types = cloud_types;
        self
    }

    pub fn with_force_refresh(mut self, force_refresh: bool) -> Self {
        self.force_refresh = force_refresh;
        self
    }
}

/// The unified answer returned to the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    pub total: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<SearchResult>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_by_type: Option<MergedLinks>,
}
