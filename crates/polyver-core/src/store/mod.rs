//! On-disk version store.
//!
//! A manager configured with a store path mirrors its version table and
//! active version into a JSON file after every mutation and reads it back on
//! construction:
//!
//! ```json
//! {
//!   "component": "widgets",
//!   "activeVersion": "legacy",
//!   "versions": [
//!     { "name": "main", "location": { "kind": "primary" } },
//!     { "name": "legacy", "location": { "kind": "path", "path": "/opt/legacy" },
//!       "metadata": { "channel": "lts" }, "registeredAt": "2026-01-01T00:00:00+00:00" }
//!   ]
//! }
//! ```

mod atomic;

pub use atomic::{atomic_read_json, atomic_write_json};

use crate::error::{PolyverError, Result};
use crate::version::{Location, Metadata, VersionSpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Serialized form of a [`Location`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoredLocation {
    Primary,
    Path { path: PathBuf },
}

impl From<&Location> for StoredLocation {
    fn from(location: &Location) -> Self {
        match location {
            Location::Primary => StoredLocation::Primary,
            Location::Path(path) => StoredLocation::Path { path: path.clone() },
        }
    }
}

impl From<StoredLocation> for Location {
    fn from(stored: StoredLocation) -> Self {
        match stored {
            StoredLocation::Primary => Location::Primary,
            StoredLocation::Path { path } => Location::Path(path),
        }
    }
}

/// One persisted version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredVersion {
    pub name: String,
    pub location: StoredLocation,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
    #[serde(default)]
    pub registered_at: Option<String>,
}

/// Root structure of a store file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionStore {
    pub component: String,
    #[serde(default)]
    pub active_version: Option<String>,
    #[serde(default)]
    pub versions: Vec<StoredVersion>,
}

impl VersionStore {
    /// Build a store snapshot from specs in registration order.
    pub fn from_specs<'a>(
        component: &str,
        specs: impl IntoIterator<Item = &'a VersionSpec>,
        active_version: Option<&str>,
    ) -> Self {
        Self {
            component: component.to_string(),
            active_version: active_version.map(str::to_string),
            versions: specs
                .into_iter()
                .map(|spec| StoredVersion {
                    name: spec.name().to_string(),
                    location: spec.location().into(),
                    metadata: spec.metadata().clone(),
                    registered_at: Some(spec.registered_at().to_rfc3339()),
                })
                .collect(),
        }
    }

    /// Read a store file. `Ok(None)` when the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        atomic_read_json(path)
    }

    pub fn save(&self, path: &Path, keep_backup: bool) -> Result<()> {
        atomic_write_json(path, self, keep_backup)
    }

    /// Convert to specs, checking the invariants a manager relies on.
    ///
    /// An active version that names no stored version is dropped.
    pub fn into_specs(self) -> Result<(Vec<VersionSpec>, Option<String>)> {
        let mut seen = HashSet::new();
        let mut primary: Option<String> = None;
        let mut specs = Vec::with_capacity(self.versions.len());

        for stored in self.versions {
            if !seen.insert(stored.name.clone()) {
                return Err(PolyverError::Config {
                    message: format!(
                        "store for {} lists version {} twice",
                        self.component, stored.name
                    ),
                });
            }

            let location = Location::from(stored.location);
            if location.is_primary() {
                if let Some(existing) = &primary {
                    return Err(PolyverError::Config {
                        message: format!(
                            "store for {} has two primary versions: {} and {}",
                            self.component, existing, stored.name
                        ),
                    });
                }
                primary = Some(stored.name.clone());
            }

            let mut spec = VersionSpec::new(stored.name, location)?.with_metadata(stored.metadata);
            if let Some(ts) = stored
                .registered_at
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            {
                spec = spec.with_registered_at(ts.with_timezone(&Utc));
            }
            specs.push(spec);
        }

        let active = self.active_version.filter(|name| seen.contains(name));
        Ok((specs, active))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_specs() -> Vec<VersionSpec> {
        let mut metadata = Metadata::new();
        metadata.insert("channel".into(), serde_json::json!("lts"));
        vec![
            VersionSpec::primary(),
            VersionSpec::new("legacy", "/opt/legacy")
                .unwrap()
                .with_metadata(metadata),
        ]
    }

    #[test]
    fn test_store_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(".widgets_versions.json");
        let specs = sample_specs();

        VersionStore::from_specs("widgets", &specs, Some("legacy"))
            .save(&path, false)
            .unwrap();
        let (loaded, active) = VersionStore::load(&path)
            .unwrap()
            .unwrap()
            .into_specs()
            .unwrap();

        assert_eq!(active.as_deref(), Some("legacy"));
        assert_eq!(loaded.len(), 2);
        assert!(loaded[0].is_primary());
        assert_eq!(loaded[1].location(), &Location::from("/opt/legacy"));
        assert_eq!(loaded[1].metadata()["channel"], "lts");
        assert_eq!(loaded[1].registered_at(), specs[1].registered_at());
    }

    #[test]
    fn test_parses_documented_format() {
        let json = r#"{
            "component": "widgets",
            "activeVersion": "gone",
            "versions": [
                { "name": "main", "location": { "kind": "primary" } },
                { "name": "legacy", "location": { "kind": "path", "path": "/opt/legacy" } }
            ]
        }"#;
        let store: VersionStore = serde_json::from_str(json).unwrap();
        let (specs, active) = store.into_specs().unwrap();

        assert_eq!(specs.len(), 2);
        assert_eq!(active, None);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let store = VersionStore {
            component: "widgets".into(),
            active_version: None,
            versions: vec![
                StoredVersion {
                    name: "a".into(),
                    location: StoredLocation::Primary,
                    metadata: Metadata::new(),
                    registered_at: None,
                },
                StoredVersion {
                    name: "a".into(),
                    location: StoredLocation::Path { path: "/x".into() },
                    metadata: Metadata::new(),
                    registered_at: None,
                },
            ],
        };
        assert!(matches!(
            store.into_specs(),
            Err(PolyverError::Config { .. })
        ));
    }

    #[test]
    fn test_two_primaries_rejected() {
        let primary = |name: &str| StoredVersion {
            name: name.into(),
            location: StoredLocation::Primary,
            metadata: Metadata::new(),
            registered_at: None,
        };
        let store = VersionStore {
            component: "widgets".into(),
            active_version: None,
            versions: vec![primary("main"), primary("other")],
        };
        assert!(store.into_specs().is_err());
    }
}
