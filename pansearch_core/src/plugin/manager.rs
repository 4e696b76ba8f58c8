//! The active-plugin set: allow-list activation plus one-shot lazy
//! initialization.

use std::sync::Arc;
use tracing::warn;

use crate::error::SearchError;
use crate::plugin::registry::PluginRegistry;
use crate::AsyncSearchPlugin;

#[derive(Default)]
pub struct PluginManager {
    plugins: Vec<Arc<dyn AsyncSearchPlugin>>,
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize and activate one plugin. An `initialize` failure logs and
    /// skips the plugin; the rest of the system is unaffected.
    pub async fn register_plugin(&mut self, plugin: Arc<dyn AsyncSearchPlugin>) {
        if let Err(err) = plugin.initialize().await {
            warn!(
                target: "pansearch.plugin.manager",
                plugin = plugin.name(),
                error = %err,
                "plugin initialization failed, skipping"
            );
            return;
        }
        self.plugins.push(plugin);
    }

    /// Activate registry plugins filtered by an allow-list.
    ///
    /// `None` (unset) and an empty list both mean "no plugins" — activation
    /// is explicit opt-in. Names match case-insensitively.
    pub async fn register_from_registry(
        &mut self,
        registry: &PluginRegistry,
        enabled: Option<&[String]>,
    ) {
        let enabled = match enabled {
            Some(enabled) if !enabled.is_empty() => enabled,
            _ => return,
        };

        let allowed: Vec<String> = enabled.iter().map(|name| name.to_lowercase()).collect();

        for plugin in registry.get_all() {
            if allowed.contains(&plugin.name().to_lowercase()) {
                self.register_plugin(plugin).await;
            }
        }
    }

    pub fn plugins(&self) -> &[Arc<dyn AsyncSearchPlugin>] {
        &self.plugins
    }

    pub fn plugin_names(&self) -> Vec<String> {
        self.plugins
            .iter()
            .map(|plugin| plugin.name().to_string())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }
}
