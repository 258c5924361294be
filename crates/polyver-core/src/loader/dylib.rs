//! Native dynamic-library loader.
//!
//! `Primary` versions are opened by bare library name, so the dynamic linker's
//! normal search path decides which file is used. `Path` versions are copied to
//! a private staging directory named after the version's alias and opened from
//! there with local symbol visibility. The copy gives every version its own file
//! identity, which stops the linker from handing back an already-loaded object
//! for a second version, and local visibility keeps one version's exported
//! symbols out of the global scope where they could shadow another's.

// This module owns the dlopen boundary.
#![allow(unsafe_code)]

use super::{LoadRequest, Loader};
use crate::binding::Binding;
use crate::config::PathsConfig;
use crate::error::{PolyverError, Result};
use crate::version::Location;
use libloading::{Library, Symbol};
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A library opened for one version of a component.
///
/// Field order matters: the library is closed before its staged copy is removed.
pub struct LoadedLibrary {
    library: Library,
    identity: String,
    source: Option<PathBuf>,
    staged: Option<StagedCopy>,
}

impl LoadedLibrary {
    /// Alias this library was loaded under.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// The file the version was resolved to, or `None` for the primary install.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// The private copy that was actually opened, if any.
    pub fn staged_path(&self) -> Option<&Path> {
        self.staged.as_ref().map(|s| s.file.as_path())
    }

    /// Look up a symbol in this version's library.
    ///
    /// # Safety
    ///
    /// `T` must match the symbol's real type, and the returned symbol must not be
    /// used after the binding holding this library is dropped.
    pub unsafe fn get<T>(&self, symbol: &[u8]) -> std::result::Result<Symbol<'_, T>, libloading::Error> {
        // SAFETY: forwarded to the caller per this function's contract.
        unsafe { self.library.get(symbol) }
    }
}

impl std::fmt::Debug for LoadedLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedLibrary")
            .field("identity", &self.identity)
            .field("source", &self.source)
            .field("staged", &self.staged_path())
            .finish()
    }
}

/// A staging directory owned by one loaded library.
struct StagedCopy {
    dir: PathBuf,
    file: PathBuf,
}

impl Drop for StagedCopy {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.dir) {
            debug!(
                "Failed to remove staging directory {}: {}",
                self.dir.display(),
                e
            );
        }
    }
}

/// Loads versions of a component from native dynamic libraries.
#[derive(Debug, Clone)]
pub struct DylibLoader {
    staging_dir: PathBuf,
}

impl DylibLoader {
    /// Create a loader that stages private copies under `staging_dir`.
    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Resolve a version location to the library file it denotes.
    ///
    /// Tried in order:
    /// 1. `path` itself, if it is a file
    /// 2. `path/<platform library name>` and `path/lib/<platform library name>`
    /// 3. `path` with the platform library extension appended
    pub fn resolve_library_file(component: &str, path: &Path) -> Option<PathBuf> {
        if path.is_file() {
            return Some(path.to_path_buf());
        }

        let file_name = libloading::library_filename(component);
        if path.is_dir() {
            let candidates = [path.join(&file_name), path.join("lib").join(&file_name)];
            if let Some(found) = candidates.into_iter().find(|c| c.is_file()) {
                return Some(found);
            }
        }

        let mut with_ext = path.as_os_str().to_os_string();
        with_ext.push(".");
        with_ext.push(std::env::consts::DLL_EXTENSION);
        let with_ext = PathBuf::from(with_ext);
        if with_ext.is_file() {
            return Some(with_ext);
        }

        None
    }

    /// Copy `source` into a fresh directory named after `alias`.
    ///
    /// Every call gets its own directory, so two concurrent loads of the same
    /// version never write to a file the other has mapped.
    fn stage(&self, alias: &str, source: &Path) -> io::Result<StagedCopy> {
        let dir = self
            .staging_dir
            .join(format!("{}-{}", alias, uuid::Uuid::new_v4().simple()));
        fs::create_dir_all(&dir)?;

        let file = dir.join(libloading::library_filename(alias));
        if let Err(e) = fs::copy(source, &file) {
            let _ = fs::remove_dir_all(&dir);
            return Err(e);
        }

        Ok(StagedCopy { dir, file })
    }

    fn open_default(name: &OsStr) -> std::result::Result<Library, libloading::Error> {
        // SAFETY: opening a library runs its initializers. Components managed
        // here are trusted installations chosen by the embedding application.
        unsafe { Library::new(name) }
    }

    #[cfg(unix)]
    fn open_isolated(path: &Path) -> std::result::Result<Library, libloading::Error> {
        use libloading::os::unix::{Library as UnixLibrary, RTLD_LOCAL, RTLD_NOW};

        // SAFETY: as in `open_default`; RTLD_LOCAL keeps the symbols out of the
        // global lookup scope.
        let library = unsafe { UnixLibrary::open(Some(path), RTLD_NOW | RTLD_LOCAL)? };
        Ok(library.into())
    }

    #[cfg(not(unix))]
    fn open_isolated(path: &Path) -> std::result::Result<Library, libloading::Error> {
        // SAFETY: as in `open_default`. Windows resolves imports per module, so
        // a distinct file name is enough to keep versions apart.
        unsafe { Library::new(path) }
    }
}

impl Default for DylibLoader {
    fn default() -> Self {
        Self::new(PathsConfig::default_staging_dir())
    }
}

impl Loader for DylibLoader {
    fn load(&self, request: &LoadRequest<'_>) -> Result<Binding> {
        let component = request.component;
        let version = request.version();
        let alias = request.alias();

        let loaded = match request.spec.location() {
            Location::Primary => {
                let name = libloading::library_filename(component);
                debug!(
                    "Loading {} version {} via default lookup of {:?}",
                    component, version, name
                );
                let library = Self::open_default(&name)
                    .map_err(|e| PolyverError::load(component, version, e))?;

                LoadedLibrary {
                    library,
                    identity: alias.clone(),
                    source: None,
                    staged: None,
                }
            }
            Location::Path(path) => {
                debug!(
                    "Loading {} version {} from path: {}",
                    component,
                    version,
                    path.display()
                );
                let resolved = Self::resolve_library_file(component, path).ok_or_else(|| {
                    PolyverError::load(
                        component,
                        version,
                        io::Error::new(
                            io::ErrorKind::NotFound,
                            format!(
                                "no library for {} found at {} (exists: {})",
                                component,
                                path.display(),
                                path.exists()
                            ),
                        ),
                    )
                })?;

                let staged = self
                    .stage(&alias, &resolved)
                    .map_err(|e| PolyverError::load(component, version, e))?;
                let library = Self::open_isolated(&staged.file).map_err(|e| {
                    warn!(
                        "Failed to open staged copy of {} for {} {}: {}",
                        resolved.display(),
                        component,
                        version,
                        e
                    );
                    PolyverError::load(component, version, e)
                })?;

                LoadedLibrary {
                    library,
                    identity: alias.clone(),
                    source: Some(resolved),
                    staged: Some(staged),
                }
            }
        };

        Ok(Binding::new(component, version, alias, loaded))
    }
}
