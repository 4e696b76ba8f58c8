//! Process-wide plugin registry.
//!
//! Populated once at startup by a `register_all`-style wiring function in the
//! embedding binary; read-heavy afterwards. Tests construct their own.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::AsyncSearchPlugin;

#[derive(Default)]
pub struct PluginRegistry {
    plugins: RwLock<HashMap<String, Arc<dyn AsyncSearchPlugin>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin under its own name. A plugin with an empty name is
    /// ignored; a duplicate name overwrites the earlier registration.
    pub fn register(&self, plugin: Arc<dyn AsyncSearchPlugin>) {
        let name = plugin.name().to_string();
        if name.is_empty() {
            return;
        }
        self.plugins
            .write()
            .expect("registry lock poisoned")
            .insert(name, plugin);
    }

    pub fn get_all(&self) -> Vec<Arc<dyn AsyncSearchPlugin>> {
        self.plugins
            .read()
            .expect("registry lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<dyn AsyncSearchPlugin>> {
        self.plugins
            .read()
            .expect("registry lock poisoned")
            .get(name)
            .cloned()
    }

    /// Registered plugin names, unordered.
    pub fn names(&self) -> Vec<String> {
        self.plugins
            .read()
            .expect("registry lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
