//! Plugin infrastructure: registry, manager, shared async runtime and the
//! base dispatch machinery every searcher delegates to.

mod base;
mod manager;
mod registry;
mod runtime;

pub use base::BaseAsyncPlugin;
pub use manager::PluginManager;
pub use registry::PluginRegistry;
pub use runtime::{AsyncRuntime, CachedResponse, RuntimeStatsSnapshot, WorkerSlot};

#[cfg(test)]
pub(crate) use base::tests_support;
