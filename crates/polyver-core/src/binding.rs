//! Loaded bindings and the per-manager binding cache.

use mini_moka::sync::Cache;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A loaded, shareable handle to one version of a component.
///
/// The payload is type-erased so one registry can serve components whose
/// loaders produce different handle types; callers recover the concrete type
/// with [`Binding::downcast`] or [`Binding::downcast_ref`]. Clones share the
/// same payload.
#[derive(Clone)]
pub struct Binding {
    component: String,
    version: String,
    identity: String,
    handle: Arc<dyn Any + Send + Sync>,
}

impl Binding {
    pub fn new<T: Any + Send + Sync>(
        component: impl Into<String>,
        version: impl Into<String>,
        identity: impl Into<String>,
        value: T,
    ) -> Self {
        Self::from_arc(component, version, identity, Arc::new(value))
    }

    pub fn from_arc(
        component: impl Into<String>,
        version: impl Into<String>,
        identity: impl Into<String>,
        handle: Arc<dyn Any + Send + Sync>,
    ) -> Self {
        Self {
            component: component.into(),
            version: version.into(),
            identity: identity.into(),
            handle,
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    /// Name of the version this binding was loaded from.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Internal identity the loader assigned; unique per (component, version).
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.handle.downcast_ref::<T>()
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.handle.clone().downcast::<T>().ok()
    }

    /// True when both bindings share the same loaded payload.
    pub fn ptr_eq(a: &Binding, b: &Binding) -> bool {
        Arc::ptr_eq(&a.handle, &b.handle)
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("component", &self.component)
            .field("version", &self.version)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
struct CacheEntry {
    binding: Binding,
    generation: u64,
}

/// Memoized bindings keyed by version name.
///
/// Each entry remembers the registration generation of the spec it was loaded
/// from, so a binding loaded from a since-replaced spec is never served. Callers
/// serialize access through the manager lock, which keeps check-then-insert
/// atomic.
pub(crate) struct BindingCache {
    entries: Cache<String, CacheEntry>,
}

impl BindingCache {
    pub(crate) fn new(ttl: Option<Duration>) -> Self {
        let mut builder = Cache::builder();
        if let Some(ttl) = ttl {
            builder = builder.time_to_live(ttl);
        }
        Self {
            entries: builder.build(),
        }
    }

    /// Cached binding for `version` at `generation`, evicting stale entries.
    pub(crate) fn get(&mut self, version: &str, generation: u64) -> Option<Binding> {
        let entry = self.entries.get(&version.to_string())?;
        if entry.generation == generation {
            Some(entry.binding)
        } else {
            self.entries.invalidate(&version.to_string());
            None
        }
    }

    /// Store `binding` unless another writer got there first.
    ///
    /// Returns the binding that ended up cached, which is the earlier one when
    /// a fresh entry already exists.
    pub(crate) fn insert_if_absent(
        &mut self,
        version: &str,
        generation: u64,
        binding: Binding,
    ) -> Binding {
        if let Some(existing) = self.get(version, generation) {
            return existing;
        }

        self.entries.insert(
            version.to_string(),
            CacheEntry {
                binding: binding.clone(),
                generation,
            },
        );
        binding
    }

    pub(crate) fn evict(&mut self, version: &str) -> bool {
        let present = self.entries.contains_key(&version.to_string());
        self.entries.invalidate(&version.to_string());
        present
    }

    pub(crate) fn contains(&self, version: &str) -> bool {
        self.entries.contains_key(&version.to_string())
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.iter().count()
    }
}
