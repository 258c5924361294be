//! Version descriptions.
//!
//! A [`VersionSpec`] is the immutable record of one registered installation of a
//! component. Specs are cheap to clone and are handed to the loader on a cache miss.

use crate::config::VersionConfig;
use crate::error::{PolyverError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Free-form metadata attached to a version.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Where a version's binding comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    /// The installation reachable through the environment's default lookup.
    Primary,
    /// An installation at an explicit filesystem location.
    Path(PathBuf),
}

impl Location {
    pub fn is_primary(&self) -> bool {
        matches!(self, Location::Primary)
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Location::Primary => None,
            Location::Path(p) => Some(p),
        }
    }

    /// Human-readable descriptor used in listings.
    pub fn descriptor(&self) -> String {
        match self {
            Location::Primary => "<primary>".to_string(),
            Location::Path(p) => p.display().to_string(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.descriptor())
    }
}

impl From<PathBuf> for Location {
    fn from(path: PathBuf) -> Self {
        Location::Path(path)
    }
}

impl From<&Path> for Location {
    fn from(path: &Path) -> Self {
        Location::Path(path.to_path_buf())
    }
}

impl From<&str> for Location {
    fn from(path: &str) -> Self {
        Location::Path(PathBuf::from(path))
    }
}

/// One registered version of a component.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionSpec {
    name: String,
    location: Location,
    metadata: Metadata,
    registered_at: DateTime<Utc>,
}

impl VersionSpec {
    /// Create a spec, rejecting empty or whitespace-padded names.
    pub fn new(name: impl Into<String>, location: impl Into<Location>) -> Result<Self> {
        let name = name.into();
        validate_version_name(&name)?;

        Ok(Self {
            name,
            location: location.into(),
            metadata: Metadata::new(),
            registered_at: Utc::now(),
        })
    }

    /// Spec for the primary installation under its conventional name.
    pub fn primary() -> Self {
        Self {
            name: VersionConfig::PRIMARY_VERSION_NAME.to_string(),
            location: Location::Primary,
            metadata: Metadata::new(),
            registered_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub(crate) fn with_registered_at(mut self, registered_at: DateTime<Utc>) -> Self {
        self.registered_at = registered_at;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn is_primary(&self) -> bool {
        self.location.is_primary()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }
}

/// Snapshot of one version as reported by `list_versions`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub name: String,
    pub location: String,
    pub is_primary: bool,
    pub active: bool,
    pub metadata: Metadata,
    pub registered_at: String,
}

impl VersionInfo {
    pub(crate) fn from_spec(spec: &VersionSpec, active: bool) -> Self {
        Self {
            name: spec.name.clone(),
            location: spec.location.descriptor(),
            is_primary: spec.is_primary(),
            active,
            metadata: spec.metadata.clone(),
            registered_at: spec.registered_at.to_rfc3339(),
        }
    }
}

/// Validate a version name.
pub fn validate_version_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(PolyverError::Validation {
            field: "version".to_string(),
            message: "version name cannot be empty".to_string(),
        });
    }
    if name.trim() != name {
        return Err(PolyverError::Validation {
            field: "version".to_string(),
            message: format!("version name '{}' has surrounding whitespace", name),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_name_rejected() {
        let err = VersionSpec::new("", "/opt/legacy").unwrap_err();
        assert!(matches!(err, PolyverError::Validation { .. }));

        assert!(VersionSpec::new(" legacy", "/opt/legacy").is_err());
    }

    #[test]
    fn test_primary_spec() {
        let spec = VersionSpec::primary();
        assert_eq!(spec.name(), "main");
        assert!(spec.is_primary());
        assert_eq!(spec.location().path(), None);
    }

    #[test]
    fn test_location_descriptor() {
        assert_eq!(Location::Primary.descriptor(), "<primary>");
        assert_eq!(Location::from("/opt/legacy").descriptor(), "/opt/legacy");
    }

    #[test]
    fn test_info_reflects_spec() {
        let mut metadata = Metadata::new();
        metadata.insert("channel".into(), serde_json::json!("lts"));
        let spec = VersionSpec::new("legacy", "/opt/legacy")
            .unwrap()
            .with_metadata(metadata);

        let info = VersionInfo::from_spec(&spec, true);
        assert_eq!(info.name, "legacy");
        assert_eq!(info.location, "/opt/legacy");
        assert!(info.active);
        assert!(!info.is_primary);
        assert_eq!(info.metadata["channel"], "lts");
    }
}
