//! Loading passthrough implementations into the calling process.

use std::ffi::c_void;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::core::version::HalVersion;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("{} does not exist", .0.display())]
    NotFound(PathBuf),

    #[error("failed to open {}: {reason}", .path.display())]
    Open { path: PathBuf, reason: String },
}

/// A shared object mapped into this process.
pub trait LoadedLibrary: Send + Sync + fmt::Debug {
    fn path(&self) -> &Path;

    /// Address of an exported symbol.
    fn symbol_address(&self, name: &str) -> Option<usize>;
}

/// Opens shared objects.
pub trait LibraryLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Arc<dyn LoadedLibrary>, LoadError>;
}

/// Implementation library of `package@version`: `<package>@<major>.<minor>-impl.so`.
pub fn impl_library_name(package: &str, version: HalVersion) -> String {
    format!("{}@{}-impl.so", package, version)
}

/// Factory entry point exported by a passthrough implementation.
pub fn factory_symbol(interface: &str) -> String {
    format!("HIDL_FETCH_{}", interface)
}

/// [`LibraryLoader`] backed by the platform dynamic loader.
#[derive(Debug, Default, Clone, Copy)]
pub struct DlopenLoader;

struct DlopenLibrary {
    path: PathBuf,
    lib: libloading::Library,
}

impl fmt::Debug for DlopenLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DlopenLibrary")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl LoadedLibrary for DlopenLibrary {
    fn path(&self) -> &Path {
        &self.path
    }

    fn symbol_address(&self, name: &str) -> Option<usize> {
        // Only the address is taken; nothing is called through it here.
        let symbol = unsafe { self.lib.get::<*const c_void>(name.as_bytes()) }.ok()?;
        Some(*symbol as usize)
    }
}

impl LibraryLoader for DlopenLoader {
    fn load(&self, path: &Path) -> Result<Arc<dyn LoadedLibrary>, LoadError> {
        if !path.exists() {
            return Err(LoadError::NotFound(path.to_path_buf()));
        }

        // Loading runs the library's initializers.
        let lib = unsafe { libloading::Library::new(path) }.map_err(|e| LoadError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        tracing::debug!("dlopen {}", path.display());
        Ok(Arc::new(DlopenLibrary {
            path: path.to_path_buf(),
            lib,
        }))
    }
}
