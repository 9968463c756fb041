//! Test utilities and mocks for halbind unit tests.
//!
//! In-memory stand-ins for the device image, the dynamic loader and the
//! native bridge, so resolution and bridge logic can be tested without a
//! device.
//!
//! # Example
//!
//! ```rust,ignore
//! use halbind::test_support::{fixtures, MockFileSystem};
//!
//! let mut fs = MockFileSystem::new();
//! fs.add_file("/vendor/etc/vintf/manifest.toml", fixtures::device_manifest("IFoo", "1.0", false));
//! ```

pub mod fixtures;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::bridge::{
    GuestAbi, LibraryHandle, NamespaceHandle, NativeBridge, RuntimeCallbacks, RuntimeValues,
    Shorty, Trampoline, Value,
};
use crate::resolver::{LibraryLoader, LoadError, LoadedLibrary};
use crate::sources::FileSystem;

/// In-memory device image.
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    files: BTreeMap<PathBuf, Vec<u8>>,
    dirs: BTreeSet<PathBuf>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file, creating its parent directories.
    pub fn add_file(&mut self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            self.add_dir(parent);
        }
        self.files.insert(path, content.into());
    }

    pub fn add_dir(&mut self, path: impl AsRef<Path>) {
        for ancestor in path.as_ref().ancestors() {
            if ancestor.as_os_str().is_empty() {
                break;
            }
            self.dirs.insert(ancestor.to_path_buf());
        }
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path) || self.dirs.contains(path)
    }
}

impl FileSystem for MockFileSystem {
    fn fetch(&self, path: &str) -> Result<Option<String>> {
        match self.files.get(Path::new(path)) {
            Some(bytes) => String::from_utf8(bytes.clone())
                .map(Some)
                .map_err(|e| anyhow!("invalid UTF-8 in {}: {}", path, e)),
            None => Ok(None),
        }
    }

    fn list_files(&self, dir: &str) -> Result<Vec<String>> {
        let dir = Path::new(dir);
        Ok(self
            .files
            .keys()
            .filter(|p| p.parent() == Some(dir))
            .filter_map(|p| p.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect())
    }
}

#[derive(Debug)]
struct FakeLibrary {
    path: PathBuf,
    symbols: Vec<String>,
}

impl LoadedLibrary for FakeLibrary {
    fn path(&self) -> &Path {
        &self.path
    }

    fn symbol_address(&self, name: &str) -> Option<usize> {
        self.symbols
            .iter()
            .position(|s| s == name)
            .map(|i| 0x1000 + i * 0x10)
    }
}

/// Loader serving a fixed set of libraries and their exports.
#[derive(Debug, Clone, Default)]
pub struct FakeLibraryLoader {
    libraries: BTreeMap<PathBuf, Vec<String>>,
}

impl FakeLibraryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_library(mut self, path: impl Into<PathBuf>, symbols: &[&str]) -> Self {
        self.libraries.insert(
            path.into(),
            symbols.iter().map(|s| s.to_string()).collect(),
        );
        self
    }
}

impl LibraryLoader for FakeLibraryLoader {
    fn load(&self, path: &Path) -> Result<Arc<dyn LoadedLibrary>, LoadError> {
        let symbols = self
            .libraries
            .get(path)
            .ok_or_else(|| LoadError::NotFound(path.to_path_buf()))?;
        Ok(Arc::new(FakeLibrary {
            path: path.to_path_buf(),
            symbols: symbols.clone(),
        }))
    }
}

/// Runtime callbacks that know no methods.
#[derive(Debug, Clone, Copy, Default)]
pub struct FakeRuntimeCallbacks;

impl RuntimeCallbacks for FakeRuntimeCallbacks {
    fn method_shorty(&self, _method: &str) -> Option<Shorty> {
        None
    }

    fn native_method_count(&self, _class: &str) -> usize {
        0
    }
}

/// A native bridge whose guest libraries are a table of `path -> symbol`.
///
/// Every trampoline returns 42 in the type its shorty asks for. `libguest.so`
/// exporting `answer` is always present.
#[derive(Debug)]
pub struct FakeNativeBridge {
    libraries: BTreeMap<String, String>,
    loaded: Mutex<Vec<String>>,
    initialized_isa: Mutex<Option<String>>,
    last_error: Mutex<Option<String>>,
    pre_fork_calls: AtomicUsize,
}

impl Default for FakeNativeBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeNativeBridge {
    pub fn new() -> Self {
        let mut libraries = BTreeMap::new();
        libraries.insert("libguest.so".to_string(), "answer".to_string());
        FakeNativeBridge {
            libraries,
            loaded: Mutex::new(Vec::new()),
            initialized_isa: Mutex::new(None),
            last_error: Mutex::new(None),
            pre_fork_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_library(mut self, path: &str, symbol: &str) -> Self {
        self.libraries.insert(path.to_string(), symbol.to_string());
        self
    }

    pub fn initialized_isa(&self) -> Option<String> {
        self.initialized_isa.lock().unwrap().clone()
    }

    pub fn pre_fork_calls(&self) -> usize {
        self.pre_fork_calls.load(Ordering::SeqCst)
    }
}

impl NativeBridge for FakeNativeBridge {
    fn initialize(
        &self,
        _runtime: Arc<dyn RuntimeCallbacks>,
        _private_dir: Option<&Path>,
        isa: &str,
    ) -> bool {
        *self.initialized_isa.lock().unwrap() = Some(isa.to_string());
        true
    }

    fn load_library(&self, path: &str, _flags: i32) -> Option<LibraryHandle> {
        if !self.libraries.contains_key(path) {
            *self.last_error.lock().unwrap() = Some(format!("{} not found", path));
            return None;
        }
        let mut loaded = self.loaded.lock().unwrap();
        loaded.push(path.to_string());
        Some(LibraryHandle(loaded.len() as u64))
    }

    fn get_trampoline(&self, handle: LibraryHandle, name: &str, shorty: &Shorty) -> Option<Trampoline> {
        let loaded = self.loaded.lock().unwrap();
        let path = loaded.get((handle.0 as usize).checked_sub(1)?)?;
        if self.libraries.get(path).map(String::as_str) != Some(name) {
            return None;
        }
        let ret = shorty.ret();
        Some(Trampoline::new(
            name,
            shorty.clone(),
            GuestAbi::Arm,
            Arc::new(move |_: &[Value]| Value::from_bits(ret, 42)),
        ))
    }

    fn is_supported(&self, path: &str) -> bool {
        self.libraries.contains_key(path)
    }

    fn get_app_env(&self, abi: &str) -> Option<RuntimeValues> {
        Some(RuntimeValues {
            os_arch: "armv8l".to_string(),
            cpu_abi: abi.to_string(),
            cpu_abi2: None,
            supported_abis: vec![abi.to_string()],
        })
    }

    fn get_error(&self) -> Option<String> {
        self.last_error.lock().unwrap().take()
    }

    fn get_vendor_namespace(&self) -> Option<NamespaceHandle> {
        Some(NamespaceHandle(1))
    }

    fn pre_zygote_fork(&self) {
        self.pre_fork_calls.fetch_add(1, Ordering::SeqCst);
    }
}
