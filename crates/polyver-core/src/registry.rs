//! Process-wide directory of version managers.
//!
//! The registry maps a component name to the one [`VersionManager`] for it.
//! Construction happens under the write lock, so concurrent callers asking for
//! a new name all receive the same `Arc` and never observe a half-built manager.

use crate::config::ManagerConfig;
use crate::error::{PolyverError, Result};
use crate::loader::DylibLoader;
use crate::manager::VersionManager;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info};

static GLOBAL_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Component name → manager map.
#[derive(Default)]
pub struct Registry {
    managers: RwLock<HashMap<String, Arc<VersionManager>>>,
}

impl Registry {
    /// Create an empty registry, independent of the global one.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> &'static Registry {
        &GLOBAL_REGISTRY
    }

    /// Existing manager for `component`, or one built by `factory`.
    ///
    /// `factory` runs at most once per name while the registry is locked. It
    /// must not call back into this registry.
    pub fn get_or_create<F>(&self, component: &str, factory: F) -> Result<Arc<VersionManager>>
    where
        F: FnOnce(&str) -> Result<VersionManager>,
    {
        if let Some(manager) = self.managers.read().get(component) {
            return Ok(Arc::clone(manager));
        }

        let mut managers = self.managers.write();
        if let Some(manager) = managers.get(component) {
            return Ok(Arc::clone(manager));
        }

        let manager = factory(component)?;
        if manager.component() != component {
            return Err(PolyverError::Config {
                message: format!(
                    "factory for {} built a manager for {}",
                    component,
                    manager.component()
                ),
            });
        }

        let manager = Arc::new(manager);
        managers.insert(component.to_string(), Arc::clone(&manager));
        debug!("Created version manager for {}", component);
        Ok(manager)
    }

    /// Existing manager, or an in-memory one backed by [`DylibLoader::default`].
    pub fn get_or_create_default(&self, component: &str) -> Result<Arc<VersionManager>> {
        self.get_or_create(component, |name| {
            VersionManager::with_config(
                name,
                Arc::new(DylibLoader::default()),
                ManagerConfig::in_memory(),
            )
        })
    }

    /// Existing manager for `component`.
    pub fn get(&self, component: &str) -> Result<Arc<VersionManager>> {
        self.managers
            .read()
            .get(component)
            .cloned()
            .ok_or_else(|| PolyverError::ComponentNotFound {
                component: component.to_string(),
            })
    }

    pub fn contains(&self, component: &str) -> bool {
        self.managers.read().contains_key(component)
    }

    /// Registered component names, sorted.
    pub fn component_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.managers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop one manager from the registry.
    ///
    /// Holders of the returned `Arc` keep using it; later lookups build a new one.
    pub fn remove(&self, component: &str) -> Option<Arc<VersionManager>> {
        let removed = self.managers.write().remove(component);
        if removed.is_some() {
            debug!("Removed version manager for {}", component);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.managers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.read().is_empty()
    }

    /// Clear every manager. Returns how many were removed.
    pub fn reset(&self) -> usize {
        let removed = std::mem::take(&mut *self.managers.write());
        if !removed.is_empty() {
            info!("Reset version registry ({} managers)", removed.len());
        }
        removed.len()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("components", &self.component_names())
            .finish()
    }
}
