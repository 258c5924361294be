//! Error types for polyver.
//!
//! Every failure the version registry can surface is a variant of
//! [`PolyverError`]. Lookups, registration conflicts, disallowed mutations and
//! load failures are reported synchronously to the caller of the operation that
//! triggered them; nothing is retried on the caller's behalf.

use std::path::PathBuf;
use thiserror::Error;

/// Boxed underlying cause of a load failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for polyver.
#[derive(Debug, Error)]
pub enum PolyverError {
    // Lookup errors
    #[error("Component not found: {component}")]
    ComponentNotFound { component: String },

    #[error("Version {version} not found for component {component}")]
    VersionNotFound { component: String, version: String },

    #[error("No active version set for component {component}")]
    NoActiveVersion { component: String },

    // Registration errors
    #[error("Version {version} already registered for component {component}")]
    DuplicateVersion { component: String, version: String },

    #[error("Invalid operation on {component}: {message}")]
    InvalidOperation { component: String, message: String },

    // Loading errors
    #[error("Failed to load {component} version {version}: {message}")]
    Load {
        component: String,
        version: String,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Validation errors
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },
}

/// Result type alias for polyver operations.
pub type Result<T> = std::result::Result<T, PolyverError>;

impl From<std::io::Error> for PolyverError {
    fn from(err: std::io::Error) -> Self {
        PolyverError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for PolyverError {
    fn from(err: serde_json::Error) -> Self {
        PolyverError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl PolyverError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        PolyverError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a load error wrapping its underlying cause.
    pub fn load(
        component: impl Into<String>,
        version: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        let source = source.into();
        PolyverError::Load {
            component: component.into(),
            version: version.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    pub(crate) fn version_not_found(component: &str, version: &str) -> Self {
        PolyverError::VersionNotFound {
            component: component.to_string(),
            version: version.to_string(),
        }
    }

    pub(crate) fn invalid_operation(component: &str, message: impl Into<String>) -> Self {
        PolyverError::InvalidOperation {
            component: component.to_string(),
            message: message.into(),
        }
    }

    /// True for errors caused by an unknown component or version name.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            PolyverError::ComponentNotFound { .. } | PolyverError::VersionNotFound { .. }
        )
    }

    /// True when the underlying load of a binding failed.
    pub fn is_load_error(&self) -> bool {
        matches!(self, PolyverError::Load { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        let err = PolyverError::VersionNotFound {
            component: "widgets".into(),
            version: "legacy".into(),
        };
        assert_eq!(
            err.to_string(),
            "Version legacy not found for component widgets"
        );
    }

    #[test]
    fn test_not_found_classification() {
        assert!(PolyverError::ComponentNotFound {
            component: "widgets".into()
        }
        .is_not_found());
        assert!(!PolyverError::DuplicateVersion {
            component: "widgets".into(),
            version: "main".into()
        }
        .is_not_found());
    }

    #[test]
    fn test_load_error_keeps_cause() {
        let cause = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err = PolyverError::load("widgets", "legacy", cause);

        assert!(err.is_load_error());
        assert!(err.to_string().contains("no such file"));
        assert!(err.source().is_some());
    }
}
