use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Plugin error [{plugin}]: {message}")]
    Plugin { plugin: String, message: String },

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl SearchError {
    pub fn plugin(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        SearchError::Plugin {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    pub fn code_str(&self) -> &'static str {
        match self {
            SearchError::InvalidInput(_) => "invalid_input",
            SearchError::Plugin { .. } => "plugin_error",
            SearchError::Cache(_) => "cache_error",
            SearchError::Timeout(_) => "timeout",
            SearchError::HttpRequest(_) => "upstream_error",
            SearchError::SerdeJson(_) => "serde_error",
            SearchError::Io(_) => "io_error",
            SearchError::InternalError(_) => "internal_error",
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "code": self.code_str(),
            "message": self.to_string(),
        })
    }
}
