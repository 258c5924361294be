//! Centralized configuration for polyver.
//!
//! Constants shared by the manager, the loader and the store, plus the
//! per-manager [`ManagerConfig`].

use std::path::PathBuf;
use std::time::Duration;

/// Version naming conventions.
pub struct VersionConfig;

impl VersionConfig {
    /// Name under which the primary (default-resolvable) installation is registered.
    pub const PRIMARY_VERSION_NAME: &'static str = "main";
    /// Separator between the encoded component and version in a binding alias.
    pub const ALIAS_SEPARATOR: &'static str = "__";
}

/// Shared directory and path configurations.
pub struct PathsConfig;

impl PathsConfig {
    pub const STAGING_DIR_NAME: &'static str = "polyver-staging";
    pub const STORE_FILE_SUFFIX: &'static str = "_versions.json";
    pub const STORE_BACKUP_EXTENSION: &'static str = "json.bak";

    /// Default store location for a component: `~/.{component}_versions.json`.
    ///
    /// Falls back to the current directory when no home directory is known.
    pub fn default_store_path(component: &str) -> PathBuf {
        let file_name = format!(".{}{}", component, Self::STORE_FILE_SUFFIX);
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(file_name)
    }

    /// Default staging directory for private copies of loaded libraries.
    pub fn default_staging_dir() -> PathBuf {
        std::env::temp_dir().join(Self::STAGING_DIR_NAME)
    }
}

/// Per-manager configuration.
#[derive(Debug, Clone, Default)]
pub struct ManagerConfig {
    /// Where the version table is persisted. `None` keeps the manager in memory only.
    pub store_path: Option<PathBuf>,
    /// How long a loaded binding stays cached. `None` caches until evicted.
    pub cache_ttl: Option<Duration>,
    /// Keep a `.bak` copy of the previous store on every write.
    pub keep_store_backup: bool,
}

impl ManagerConfig {
    /// In-memory configuration with no persistence and no cache expiry.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Persist to the default store path for `component`.
    pub fn persisted(component: &str) -> Self {
        Self {
            store_path: Some(PathsConfig::default_store_path(component)),
            ..Self::default()
        }
    }

    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn with_store_backup(mut self, keep: bool) -> Self {
        self.keep_store_backup = keep;
        self
    }
}
