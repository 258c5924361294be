//! Binding loaders.
//!
//! A [`Loader`] turns a [`VersionSpec`] into a [`Binding`]. Managers call it only
//! on a cache miss and without holding their lock, so implementations may block
//! on I/O.
//!
//! # Identity contract
//!
//! Every loaded version must get an internal identity that no other
//! (component, version) pair shares, and loading one version must never replace
//! or shadow state another loaded version depends on in whatever process-wide
//! resolution table the environment keeps (the dynamic linker's loaded-object
//! list and global symbol scope, for native libraries). [`alias_for`] gives the
//! canonical identity; loaders that need a filesystem or symbol name derive it
//! from there.

mod dylib;

pub use dylib::{DylibLoader, LoadedLibrary};

use crate::binding::Binding;
use crate::config::VersionConfig;
use crate::error::Result;
use crate::version::VersionSpec;

/// What the manager asks a loader for.
#[derive(Debug, Clone, Copy)]
pub struct LoadRequest<'a> {
    pub component: &'a str,
    pub spec: &'a VersionSpec,
}

impl<'a> LoadRequest<'a> {
    pub fn new(component: &'a str, spec: &'a VersionSpec) -> Self {
        Self { component, spec }
    }

    pub fn version(&self) -> &'a str {
        self.spec.name()
    }

    /// Canonical identity for this (component, version) pair.
    pub fn alias(&self) -> String {
        alias_for(self.component, self.spec.name())
    }
}

/// Produces bindings for registered versions.
pub trait Loader: Send + Sync {
    /// Load the binding described by `request`.
    ///
    /// Failures must be reported as [`PolyverError::Load`](crate::PolyverError::Load)
    /// carrying the underlying cause.
    fn load(&self, request: &LoadRequest<'_>) -> Result<Binding>;
}

/// Adapts a closure into a [`Loader`].
///
/// Handy for in-process factories where "loading" a version means building a
/// value rather than opening a file.
pub struct FnLoader<F> {
    load_fn: F,
}

impl<F> FnLoader<F>
where
    F: Fn(&LoadRequest<'_>) -> Result<Binding> + Send + Sync,
{
    pub fn new(load_fn: F) -> Self {
        Self { load_fn }
    }
}

impl<F> Loader for FnLoader<F>
where
    F: Fn(&LoadRequest<'_>) -> Result<Binding> + Send + Sync,
{
    fn load(&self, request: &LoadRequest<'_>) -> Result<Binding> {
        (self.load_fn)(request)
    }
}

/// Deterministic identity for a (component, version) pair.
///
/// ASCII alphanumerics pass through; every other byte becomes `_XX` (upper-case
/// hex). The two encoded halves are joined by `__`, which the encoding itself
/// never produces, so distinct pairs always get distinct aliases and every alias
/// is a valid C identifier fragment and file name.
pub fn alias_for(component: &str, version: &str) -> String {
    let mut alias = encode_alias_part(component);
    alias.push_str(VersionConfig::ALIAS_SEPARATOR);
    alias.push_str(&encode_alias_part(version));
    alias
}

fn encode_alias_part(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    for byte in part.bytes() {
        if byte.is_ascii_alphanumeric() {
            out.push(byte as char);
        } else {
            out.push_str(&format!("_{:02X}", byte));
        }
    }
    out
}
