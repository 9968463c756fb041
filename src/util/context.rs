//! Process context for VINTF lookups.
//!
//! Holds the configuration, the device image accessors and the manifests
//! built from them. Manifests are assembled on first use and then shared as
//! immutable `Arc`s; later reads never lock. Nothing here depends on static
//! initialization order.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;

use crate::bridge::{BootstrapGuard, BridgeProvider, NativeBridgeRuntime};
use crate::core::manifest::{Level, Manifest, VersionPolicy};
use crate::core::matrix::CompatibilityMatrix;
use crate::core::transport::Bitness;
use crate::resolver::{LibraryLoader, ServiceManager, TransportResolver};
use crate::sources::{
    fetch_device_manifest, fetch_framework_manifest, fetch_framework_matrices, FileSystem,
    PropertyFetcher, RealFileSystem, StaticProperties,
};
use crate::util::config::Config;

/// Guest ISA used when the config names none.
const DEFAULT_GUEST_ISA: &str = "arm";

/// Shared state for one process's HAL lookups.
pub struct VintfContext {
    config: Config,
    root: PathBuf,
    fs: Arc<dyn FileSystem>,
    properties: Arc<dyn PropertyFetcher>,

    device_manifest: OnceCell<Arc<Manifest>>,
    framework_manifest: OnceCell<Arc<Manifest>>,
    framework_matrices: OnceCell<Arc<Vec<CompatibilityMatrix>>>,

    bridge: Arc<NativeBridgeRuntime>,
    tls_guard: BootstrapGuard,
}

/// Builder for [`VintfContext`].
#[derive(Default)]
pub struct VintfContextBuilder {
    config: Option<Config>,
    fs: Option<Arc<dyn FileSystem>>,
    properties: Option<Arc<dyn PropertyFetcher>>,
}

impl VintfContextBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = Some(fs);
        self
    }

    pub fn properties(mut self, properties: Arc<dyn PropertyFetcher>) -> Self {
        self.properties = Some(properties);
        self
    }

    /// Fill in anything not set from the config: the file system is rooted
    /// at `root` (or `/`) and properties come from `[properties]`.
    pub fn build(self) -> VintfContext {
        let config = self.config.unwrap_or_default();
        let root = config.root.clone().unwrap_or_else(|| PathBuf::from("/"));
        let fs = self
            .fs
            .unwrap_or_else(|| Arc::new(RealFileSystem::new(root.clone())));
        let properties = self
            .properties
            .unwrap_or_else(|| Arc::new(StaticProperties::new(config.properties.clone())));

        VintfContext {
            config,
            root,
            fs,
            properties,
            device_manifest: OnceCell::new(),
            framework_manifest: OnceCell::new(),
            framework_matrices: OnceCell::new(),
            bridge: Arc::new(NativeBridgeRuntime::new()),
            tls_guard: BootstrapGuard::new(),
        }
    }
}

impl VintfContext {
    pub fn builder() -> VintfContextBuilder {
        VintfContextBuilder::default()
    }

    /// A context reading the device image under the config's `root`.
    pub fn from_config(config: Config) -> Self {
        Self::builder().config(config).build()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Host directory standing in for the device's `/`.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn file_system(&self) -> &dyn FileSystem {
        self.fs.as_ref()
    }

    pub fn properties(&self) -> &dyn PropertyFetcher {
        self.properties.as_ref()
    }

    pub fn version_policy(&self) -> VersionPolicy {
        self.config.version_policy()
    }

    pub fn caller_bitness(&self) -> Bitness {
        self.config.caller_bitness()
    }

    /// The device manifest, assembled once.
    pub fn device_manifest(&self) -> Result<Arc<Manifest>> {
        self.device_manifest
            .get_or_try_init(|| self.device_manifest_uncached().map(Arc::new))
            .cloned()
    }

    /// Assemble the device manifest again, bypassing the cache.
    pub fn device_manifest_uncached(&self) -> Result<Manifest> {
        fetch_device_manifest(self.fs.as_ref(), self.properties.as_ref())
            .context("failed to assemble device manifest")
    }

    /// The framework manifest, assembled once.
    pub fn framework_manifest(&self) -> Result<Arc<Manifest>> {
        self.framework_manifest
            .get_or_try_init(|| self.framework_manifest_uncached().map(Arc::new))
            .cloned()
    }

    pub fn framework_manifest_uncached(&self) -> Result<Manifest> {
        fetch_framework_manifest(self.fs.as_ref()).context("failed to assemble framework manifest")
    }

    /// Every framework compatibility matrix, loaded once.
    pub fn framework_matrices(&self) -> Result<Arc<Vec<CompatibilityMatrix>>> {
        self.framework_matrices
            .get_or_try_init(|| self.framework_matrices_uncached().map(Arc::new))
            .cloned()
    }

    pub fn framework_matrices_uncached(&self) -> Result<Vec<CompatibilityMatrix>> {
        fetch_framework_matrices(self.fs.as_ref()).context("failed to load framework matrices")
    }

    /// The device manifest's target level.
    pub fn device_level(&self) -> Result<Level> {
        self.device_manifest()?
            .target_level()
            .context("device manifest declares no target-level")
    }

    /// The process's native bridge runtime.
    pub fn bridge(&self) -> &Arc<NativeBridgeRuntime> {
        &self.bridge
    }

    /// Guard for the one-time static TLS bootstrap of this process.
    pub fn tls_guard(&self) -> &BootstrapGuard {
        &self.tls_guard
    }

    /// Load and pre-initialize the bridge named in `[bridge]`.
    ///
    /// Returns whether a bridge is now loaded; a missing or disabled name
    /// leaves the runtime without one.
    pub fn load_bridge(&self, provider: &dyn BridgeProvider) -> Result<bool> {
        let Some(name) = self.config.bridge.library.as_deref() else {
            tracing::debug!("no native bridge configured");
            return Ok(false);
        };
        if !self.bridge.load(name, provider)? {
            return Ok(false);
        }
        let isa = self.config.bridge.isa.as_deref().unwrap_or(DEFAULT_GUEST_ISA);
        self.bridge
            .pre_initialize(self.config.bridge.app_data_dir.as_deref(), isa)?;
        Ok(true)
    }

    /// A resolver over the device manifest, set up from the config.
    ///
    /// The bridge is attached only once it has been loaded.
    pub fn resolver(
        &self,
        loader: Arc<dyn LibraryLoader>,
        services: Arc<dyn ServiceManager>,
    ) -> Result<TransportResolver> {
        self.resolver_for(self.device_manifest()?, loader, services)
    }

    /// A resolver over an explicit manifest, e.g. the framework manifest.
    pub fn resolver_for(
        &self,
        manifest: Arc<Manifest>,
        loader: Arc<dyn LibraryLoader>,
        services: Arc<dyn ServiceManager>,
    ) -> Result<TransportResolver> {
        let mut resolver = TransportResolver::new(manifest, loader, services)
            .with_caller(self.caller_bitness())
            .with_policy(self.version_policy())
            .with_passthrough(self.config.passthrough.clone())
            .with_root(self.root.clone());
        if self.bridge.is_loaded() {
            resolver = resolver.with_bridge(self.bridge.clone());
        }
        Ok(resolver)
    }
}
