//! Per-component version management.
//!
//! A [`VersionManager`] owns the version table, the process-wide active
//! version and the binding cache for one component. All three live behind a
//! single lock. Loads happen outside it and are written back under it, first
//! writer wins.
//!
//! # Resolution
//!
//! [`VersionManager::current`] resolves, in order:
//! 1. the innermost override for this component on the calling thread or task
//! 2. the stored active version
//!
//! The first version registered into an empty pointer becomes the active one.

use crate::binding::{Binding, BindingCache};
use crate::config::ManagerConfig;
use crate::error::{PolyverError, Result};
use crate::loader::{LoadRequest, Loader};
use crate::overrides::{self, OverrideScope, VersionGuard};
use crate::store::VersionStore;
use crate::version::{Location, VersionInfo, VersionSpec};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

struct VersionEntry {
    spec: VersionSpec,
    /// Bumped on every (re-)registration so loads from a replaced spec are not cached.
    generation: u64,
}

struct ManagerState {
    versions: IndexMap<String, VersionEntry>,
    active_version: Option<String>,
    cache: BindingCache,
    next_generation: u64,
    /// Sequence number of the latest store snapshot taken.
    store_seq: u64,
}

impl ManagerState {
    fn bump_generation(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }

    /// Point the active version at `name` if nothing is active yet.
    fn adopt_if_unset(&mut self, name: &str) {
        if self.active_version.is_none() {
            self.active_version = Some(name.to_string());
        }
    }

    fn primary_name(&self) -> Option<&str> {
        self.versions
            .values()
            .find(|e| e.spec.is_primary())
            .map(|e| e.spec.name())
    }

    /// Insert or replace `spec`, keeping its position when it already exists.
    fn upsert(&mut self, spec: VersionSpec) -> bool {
        let generation = self.bump_generation();

        let name = spec.name().to_string();
        self.cache.evict(&name);
        self.versions
            .insert(name, VersionEntry { spec, generation })
            .is_some()
    }
}

/// A store snapshot taken under the state lock, written after it is released.
struct PendingSave {
    seq: u64,
    store: VersionStore,
}

/// Manages the installed versions of one component.
pub struct VersionManager {
    component: String,
    loader: Arc<dyn Loader>,
    config: ManagerConfig,
    state: Mutex<ManagerState>,
    /// Sequence number of the last snapshot written; serializes store writes.
    store_written: Mutex<u64>,
}

impl VersionManager {
    /// Create an in-memory manager.
    pub fn new(component: impl Into<String>, loader: impl Loader + 'static) -> Result<Self> {
        Self::with_config(component, Arc::new(loader), ManagerConfig::in_memory())
    }

    /// Create a manager with an explicit configuration.
    ///
    /// When the configuration names a store file that exists, its versions and
    /// active version are loaded.
    pub fn with_config(
        component: impl Into<String>,
        loader: Arc<dyn Loader>,
        config: ManagerConfig,
    ) -> Result<Self> {
        let component = component.into();
        if component.trim().is_empty() {
            return Err(PolyverError::Validation {
                field: "component".to_string(),
                message: "component name cannot be empty".to_string(),
            });
        }

        let mut state = ManagerState {
            versions: IndexMap::new(),
            active_version: None,
            cache: BindingCache::new(config.cache_ttl),
            next_generation: 0,
            store_seq: 0,
        };

        if let Some(path) = &config.store_path {
            if let Some(store) = VersionStore::load(path)? {
                if store.component != component {
                    warn!(
                        "Store {} belongs to {}, loading it for {}",
                        path.display(),
                        store.component,
                        component
                    );
                }
                let (specs, active) = store.into_specs()?;
                for spec in specs {
                    state.upsert(spec);
                }
                state.active_version = active;

                debug!(
                    "Loaded {} versions for {} from {}, active={:?}",
                    state.versions.len(),
                    component,
                    path.display(),
                    state.active_version
                );
            }
        }

        Ok(Self {
            component,
            loader,
            config,
            state: Mutex::new(state),
            store_written: Mutex::new(0),
        })
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    // ========================================
    // Registration
    // ========================================

    /// Register a new version. Fails if the name is taken.
    pub fn register_version(
        &self,
        name: impl Into<String>,
        location: impl Into<Location>,
    ) -> Result<VersionSpec> {
        self.register_spec(VersionSpec::new(name, location)?)
    }

    /// Register a prepared spec. Fails if the name is taken.
    pub fn register_spec(&self, spec: VersionSpec) -> Result<VersionSpec> {
        let mut state = self.state.lock();

        if state.versions.contains_key(spec.name()) {
            return Err(PolyverError::DuplicateVersion {
                component: self.component.clone(),
                version: spec.name().to_string(),
            });
        }
        self.check_primary_slot(&state, &spec)?;

        state.upsert(spec.clone());
        state.adopt_if_unset(spec.name());
        let pending = self.snapshot(&mut state);
        drop(state);
        self.persist(pending);

        info!(
            "Registered {} version {} at {}",
            self.component,
            spec.name(),
            spec.location()
        );
        Ok(spec)
    }

    /// Register the primary installation as `main`, replacing any earlier
    /// registration of that name.
    pub fn register_primary(&self) -> Result<VersionSpec> {
        self.replace_spec(VersionSpec::primary())
    }

    /// Register or replace a version.
    ///
    /// The cached binding is evicted immediately, even for the active version,
    /// so the next resolution loads from the new location.
    pub fn replace_version(
        &self,
        name: impl Into<String>,
        location: impl Into<Location>,
    ) -> Result<VersionSpec> {
        self.replace_spec(VersionSpec::new(name, location)?)
    }

    /// Register or replace a prepared spec.
    pub fn replace_spec(&self, spec: VersionSpec) -> Result<VersionSpec> {
        let mut state = self.state.lock();
        self.check_primary_slot(&state, &spec)?;

        let replaced = state.upsert(spec.clone());
        state.adopt_if_unset(spec.name());
        let pending = self.snapshot(&mut state);
        drop(state);
        self.persist(pending);

        if replaced {
            info!(
                "Replaced {} version {} with {}",
                self.component,
                spec.name(),
                spec.location()
            );
        } else {
            info!(
                "Registered {} version {} at {}",
                self.component,
                spec.name(),
                spec.location()
            );
        }
        Ok(spec)
    }

    /// Remove a version and its cached binding.
    ///
    /// The stored active version cannot be removed; switch away first.
    pub fn unregister_version(&self, name: &str) -> Result<VersionSpec> {
        let mut state = self.state.lock();

        if !state.versions.contains_key(name) {
            return Err(PolyverError::version_not_found(&self.component, name));
        }
        if state.active_version.as_deref() == Some(name) {
            return Err(PolyverError::invalid_operation(
                &self.component,
                format!("cannot unregister active version {}; switch away first", name),
            ));
        }

        let entry = state
            .versions
            .shift_remove(name)
            .ok_or_else(|| PolyverError::version_not_found(&self.component, name))?;
        state.cache.evict(name);
        let pending = self.snapshot(&mut state);
        drop(state);
        self.persist(pending);

        info!("Unregistered {} version {}", self.component, name);
        Ok(entry.spec)
    }

    // ========================================
    // Switching
    // ========================================

    /// Make `name` the process-wide active version and return its binding.
    ///
    /// The binding is loaded first; a failed load leaves the active version
    /// untouched. Concurrent switches race, last write wins.
    pub fn use_version(&self, name: &str) -> Result<Binding> {
        let binding = self.load_named(name)?;

        let mut state = self.state.lock();
        if !state.versions.contains_key(name) {
            return Err(PolyverError::version_not_found(&self.component, name));
        }
        state.active_version = Some(name.to_string());
        let pending = self.snapshot(&mut state);
        drop(state);
        self.persist(pending);

        info!("Set active {} version: {}", self.component, name);
        Ok(binding)
    }

    /// Move the active pointer without loading anything.
    ///
    /// Returns the previously stored active version.
    pub fn select_version(&self, name: &str) -> Result<Option<String>> {
        let mut state = self.state.lock();
        if !state.versions.contains_key(name) {
            return Err(PolyverError::version_not_found(&self.component, name));
        }

        let previous = state.active_version.replace(name.to_string());
        let pending = self.snapshot(&mut state);
        drop(state);
        self.persist(pending);

        info!("Selected active {} version: {}", self.component, name);
        Ok(previous)
    }

    /// Override the current version on this thread until the guard drops.
    pub fn temporary_version(&self, name: &str) -> Result<VersionGuard> {
        self.ensure_registered(name)?;
        debug!("Entering temporary {} version {}", self.component, name);
        Ok(VersionGuard::enter(&self.component, name))
    }

    /// Run `f` with `name` temporarily current on this thread.
    pub fn with_version<R>(&self, name: &str, f: impl FnOnce() -> R) -> Result<R> {
        let _guard = self.temporary_version(name)?;
        Ok(f())
    }

    /// Run `future` with `name` as the current version for every poll of it.
    ///
    /// Unlike [`temporary_version`](Self::temporary_version) the override
    /// follows the task across threads and never leaks into other tasks that
    /// share a worker thread.
    pub fn scope<F: Future>(&self, name: &str, future: F) -> Result<OverrideScope<F>> {
        self.ensure_registered(name)?;
        Ok(OverrideScope::new(&self.component, name, future))
    }

    // ========================================
    // Resolution
    // ========================================

    /// Binding for the version current on the calling thread or task.
    pub fn current(&self) -> Result<Binding> {
        let name = self.resolved_version()?;
        self.load_named(&name)
    }

    /// Like [`current`](Self::current), but loads on tokio's blocking pool.
    ///
    /// The version is resolved on the calling task, so overrides in effect
    /// there apply.
    pub async fn current_async(self: &Arc<Self>) -> Result<Binding> {
        let name = self.resolved_version()?;
        let manager = Arc::clone(self);
        let version = name.clone();

        tokio::task::spawn_blocking(move || manager.load_named(&version))
            .await
            .map_err(|e| PolyverError::load(&self.component, name, e))?
    }

    /// Binding for a named version, leaving the active version alone.
    pub fn get_version(&self, name: &str) -> Result<Binding> {
        self.load_named(name)
    }

    /// Drop the cached binding for `name` and load it again.
    ///
    /// Loads of `name` already in flight are not cached when they finish.
    pub fn reload_version(&self, name: &str) -> Result<Binding> {
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let generation = state.bump_generation();
            let entry = state
                .versions
                .get_mut(name)
                .ok_or_else(|| PolyverError::version_not_found(&self.component, name))?;
            entry.generation = generation;
            state.cache.evict(name);
        }
        debug!("Reloading {} version {}", self.component, name);
        self.load_named(name)
    }

    /// Name of the version [`current`](Self::current) would load.
    pub fn resolved_version(&self) -> Result<String> {
        if let Some(name) = overrides::active_override(&self.component) {
            return Ok(name);
        }

        self.state
            .lock()
            .active_version
            .clone()
            .ok_or_else(|| PolyverError::NoActiveVersion {
                component: self.component.clone(),
            })
    }

    // ========================================
    // Introspection
    // ========================================

    /// The stored process-wide active version.
    pub fn active_version(&self) -> Option<String> {
        self.state.lock().active_version.clone()
    }

    /// Spec of a registered version.
    pub fn version_spec(&self, name: &str) -> Option<VersionSpec> {
        self.state.lock().versions.get(name).map(|e| e.spec.clone())
    }

    /// Every version in registration order.
    pub fn list_versions(&self) -> Vec<VersionInfo> {
        let state = self.state.lock();
        let active = state.active_version.as_deref();

        state
            .versions
            .values()
            .map(|e| VersionInfo::from_spec(&e.spec, active == Some(e.spec.name())))
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.lock().versions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.state.lock().versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a binding for `name` is currently cached.
    pub fn is_cached(&self, name: &str) -> bool {
        self.state.lock().cache.contains(name)
    }

    pub fn cached_count(&self) -> usize {
        self.state.lock().cache.len()
    }

    // ========================================
    // Internals
    // ========================================

    fn ensure_registered(&self, name: &str) -> Result<()> {
        if self.contains(name) {
            Ok(())
        } else {
            Err(PolyverError::version_not_found(&self.component, name))
        }
    }

    fn check_primary_slot(&self, state: &ManagerState, spec: &VersionSpec) -> Result<()> {
        if !spec.is_primary() {
            return Ok(());
        }
        match state.primary_name() {
            Some(existing) if existing != spec.name() => Err(PolyverError::invalid_operation(
                &self.component,
                format!(
                    "primary installation already registered as {}",
                    existing
                ),
            )),
            _ => Ok(()),
        }
    }

    /// Serve from cache, or load without the lock and write back first-wins.
    fn load_named(&self, name: &str) -> Result<Binding> {
        let (spec, generation) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let entry = state
                .versions
                .get(name)
                .ok_or_else(|| PolyverError::version_not_found(&self.component, name))?;

            if let Some(binding) = state.cache.get(name, entry.generation) {
                return Ok(binding);
            }
            (entry.spec.clone(), entry.generation)
        };

        let loaded = self
            .loader
            .load(&LoadRequest::new(&self.component, &spec))?;

        let mut guard = self.state.lock();
        let state = &mut *guard;
        match state.versions.get(name) {
            Some(entry) if entry.generation == generation => {
                let cached = state.cache.insert_if_absent(name, generation, loaded.clone());
                if Binding::ptr_eq(&cached, &loaded) {
                    debug!(
                        "Cached {} version {} as {}",
                        self.component,
                        name,
                        cached.identity()
                    );
                } else {
                    debug!(
                        "Discarding duplicate load of {} version {}",
                        self.component, name
                    );
                }
                Ok(cached)
            }
            _ => {
                debug!(
                    "{} version {} changed while loading; not caching",
                    self.component, name
                );
                Ok(loaded)
            }
        }
    }

    fn snapshot(&self, state: &mut ManagerState) -> Option<PendingSave> {
        self.config.store_path.as_ref()?;

        state.store_seq += 1;
        Some(PendingSave {
            seq: state.store_seq,
            store: VersionStore::from_specs(
                &self.component,
                state.versions.values().map(|e| &e.spec),
                state.active_version.as_deref(),
            ),
        })
    }

    /// Write a snapshot unless a newer one already reached the store.
    fn persist(&self, pending: Option<PendingSave>) {
        let (Some(pending), Some(path)) = (pending, &self.config.store_path) else {
            return;
        };

        let mut written = self.store_written.lock();
        if *written >= pending.seq {
            debug!(
                "Skipping superseded {} store snapshot {}",
                self.component, pending.seq
            );
            return;
        }
        if let Err(e) = pending.store.save(path, self.config.keep_store_backup) {
            warn!(
                "Failed to save {} versions to {}: {}",
                self.component,
                path.display(),
                e
            );
        }
        *written = pending.seq;
    }
}

impl std::fmt::Debug for VersionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("VersionManager")
            .field("component", &self.component)
            .field("versions", &state.versions.keys().collect::<Vec<_>>())
            .field("active_version", &state.active_version)
            .finish_non_exhaustive()
    }
}
