//! Polyver Core - side-by-side versions of a component in one process.
//!
//! Several installations of the same component can be registered under
//! distinct names, loaded under distinct internal identities, and switched
//! between at runtime. Each component has one [`VersionManager`] holding its
//! version table, the process-wide active version and a cache of loaded
//! bindings. Managers live in a process-wide [`Registry`].
//!
//! Callers can override the active version for the current thread with
//! [`VersionManager::temporary_version`], or for one async task with
//! [`VersionManager::scope`], without touching what other threads see.
//!
//! # Example
//!
//! ```rust,ignore
//! use polyver_core::manager;
//!
//! fn main() -> polyver_core::Result<()> {
//!     let widgets = manager("widgets")?;
//!     widgets.register_primary()?;
//!     widgets.register_version("legacy", "/opt/legacy")?;
//!     widgets.use_version("main")?;
//!
//!     {
//!         let _guard = widgets.temporary_version("legacy")?;
//!         let binding = widgets.current()?;
//!         println!("using {}", binding.identity());
//!     }
//!
//!     for info in widgets.list_versions() {
//!         println!("{} {} active={}", info.name, info.location, info.active);
//!     }
//!     Ok(())
//! }
//! ```

pub mod binding;
pub mod config;
pub mod error;
pub mod loader;
pub mod overrides;
pub mod registry;
pub mod store;
pub mod version;

mod manager;

// Re-export commonly used types
pub use binding::Binding;
pub use config::{ManagerConfig, PathsConfig, VersionConfig};
pub use error::{PolyverError, Result};
pub use loader::{alias_for, DylibLoader, FnLoader, LoadRequest, LoadedLibrary, Loader};
pub use manager::VersionManager;
pub use overrides::{OverrideScope, VersionGuard};
pub use registry::Registry;
pub use store::VersionStore;
pub use version::{Location, Metadata, VersionInfo, VersionSpec};

use std::sync::Arc;

/// The process-wide registry.
pub fn registry() -> &'static Registry {
    Registry::global()
}

/// The process-wide manager for `component`, created with the default
/// dynamic-library loader if it does not exist yet.
pub fn manager(component: &str) -> Result<Arc<VersionManager>> {
    Registry::global().get_or_create_default(component)
}
