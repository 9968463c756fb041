//! Native bridge lifecycle.
//!
//! ```text
//! NotSetup --load--> Opened --pre_initialize--> PreInitialized --initialize--> Initialized
//!     |                 |                             |                             |
//!     +---"0"---> Closed <----------------- unload ---+-----------------------------+
//! ```
//!
//! Any failed step moves the runtime to `Error`. Failures are fatal to the
//! attempt, never to the process.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::bridge::callbacks::{
    BridgeError, BridgeVersion, Capability, LibraryHandle, NamespaceConfig, NamespaceHandle,
    NativeBridgeCallbacks, RuntimeCallbacks, RuntimeValues, SignalHandler,
};
use crate::bridge::shorty::Shorty;
use crate::bridge::trampoline::Trampoline;

/// Name that disables the bridge.
pub const DISABLED_NAME: &str = "0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BridgeState {
    NotSetup,
    Opened,
    PreInitialized,
    Initialized,
    Closed,
    Error,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BridgeState::NotSetup => "not set up",
            BridgeState::Opened => "opened",
            BridgeState::PreInitialized => "pre-initialized",
            BridgeState::Initialized => "initialized",
            BridgeState::Closed => "closed",
            BridgeState::Error => "in error",
        };
        f.write_str(s)
    }
}

/// What to do with the bridge in a freshly forked child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeBridgeAction {
    Unload,
    Initialize,
}

/// Outcome of [`NativeBridgeRuntime::pre_zygote_fork`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreForkOutcome {
    /// Forwarded to the bridge.
    Forwarded,
    /// The bridge predates the hook.
    Unsupported,
    /// No initialized bridge.
    NoBridge,
    /// The hook already ran in this process.
    AlreadyDone,
}

/// Opens bridge implementations by library name.
pub trait BridgeProvider: Send + Sync {
    fn open(&self, name: &str) -> Result<NativeBridgeCallbacks, BridgeError>;
}

type Factory = Arc<dyn Fn() -> NativeBridgeCallbacks + Send + Sync>;

/// In-process bridge implementations keyed by library name.
///
/// Construction never fails; lookups happen when a bridge is loaded.
#[derive(Default, Clone)]
pub struct BridgeRegistry {
    factories: BTreeMap<String, Factory>,
}

impl BridgeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn() -> NativeBridgeCallbacks + Send + Sync + 'static,
    ) {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.factories.keys().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl BridgeProvider for BridgeRegistry {
    fn open(&self, name: &str) -> Result<NativeBridgeCallbacks, BridgeError> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| BridgeError::OpenFailed(name.to_string()))
    }
}

/// Library names: first character alphabetic, the rest alphanumeric or `._-`.
pub fn is_name_acceptable(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

#[derive(Debug)]
struct Inner {
    state: BridgeState,
    name: Option<String>,
    callbacks: Option<NativeBridgeCallbacks>,
    code_cache_dir: Option<PathBuf>,
    isa: Option<String>,
}

/// The process's native bridge.
#[derive(Debug)]
pub struct NativeBridgeRuntime {
    inner: RwLock<Inner>,
    pre_fork_done: AtomicBool,
}

impl Default for NativeBridgeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeBridgeRuntime {
    pub fn new() -> Self {
        NativeBridgeRuntime {
            inner: RwLock::new(Inner {
                state: BridgeState::NotSetup,
                name: None,
                callbacks: None,
                code_cache_dir: None,
                isa: None,
            }),
            pre_fork_done: AtomicBool::new(false),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> BridgeState {
        self.read().state
    }

    pub fn name(&self) -> Option<String> {
        self.read().name.clone()
    }

    pub fn code_cache_dir(&self) -> Option<PathBuf> {
        self.read().code_cache_dir.clone()
    }

    /// Loaded and not closed.
    pub fn is_loaded(&self) -> bool {
        matches!(
            self.state(),
            BridgeState::Opened | BridgeState::PreInitialized | BridgeState::Initialized
        )
    }

    pub fn is_initialized(&self) -> bool {
        self.state() == BridgeState::Initialized
    }

    fn fail(inner: &mut Inner, err: BridgeError) -> BridgeError {
        tracing::warn!("native bridge: {}", err);
        inner.state = BridgeState::Error;
        inner.callbacks = None;
        err
    }

    /// Open the bridge library `name`.
    ///
    /// Returns `Ok(false)` when `name` disables the bridge. A bridge of
    /// version 2 or later must declare itself compatible with
    /// [`BridgeVersion::SIGNAL`], otherwise it is refused.
    pub fn load(&self, name: &str, provider: &dyn BridgeProvider) -> Result<bool, BridgeError> {
        let mut inner = self.write();
        if inner.state != BridgeState::NotSetup {
            return Err(BridgeError::InvalidState {
                op: "load",
                state: inner.state,
            });
        }

        if name.is_empty() || name == DISABLED_NAME {
            tracing::debug!("native bridge disabled");
            inner.state = BridgeState::Closed;
            return Ok(false);
        }

        if !is_name_acceptable(name) {
            return Err(Self::fail(&mut inner, BridgeError::InvalidName(name.to_string())));
        }

        let callbacks = match provider.open(name) {
            Ok(callbacks) => callbacks,
            Err(e) => return Err(Self::fail(&mut inner, e)),
        };

        if callbacks.version().0 == 0 || !callbacks.is_compatible_with(BridgeVersion::SIGNAL) {
            let err = BridgeError::Incompatible {
                version: callbacks.version(),
                required: BridgeVersion::SIGNAL,
            };
            return Err(Self::fail(&mut inner, err));
        }

        tracing::info!("loaded native bridge {} ({})", name, callbacks.version());
        inner.name = Some(name.to_string());
        inner.callbacks = Some(callbacks);
        inner.state = BridgeState::Opened;
        Ok(true)
    }

    /// Prepare per-app state: the code cache directory and the guest ISA.
    ///
    /// Failing to create `code_cache` is logged and the bridge continues
    /// without one.
    pub fn pre_initialize(&self, app_data_dir: Option<&Path>, isa: &str) -> Result<(), BridgeError> {
        let mut inner = self.write();
        if inner.state != BridgeState::Opened {
            return Err(BridgeError::InvalidState {
                op: "pre-initialize",
                state: inner.state,
            });
        }

        inner.code_cache_dir = None;
        if let Some(dir) = app_data_dir {
            let cache = dir.join("code_cache");
            match std::fs::create_dir_all(&cache) {
                Ok(()) => inner.code_cache_dir = Some(cache),
                Err(source) => {
                    let err = BridgeError::CodeCache { path: cache, source };
                    tracing::warn!("{}; continuing without a code cache", err);
                }
            }
        }

        inner.isa = Some(isa.to_string());
        inner.state = BridgeState::PreInitialized;
        Ok(())
    }

    /// Hand the runtime callbacks to the bridge.
    pub fn initialize(
        &self,
        runtime: Arc<dyn RuntimeCallbacks>,
        isa: &str,
    ) -> Result<(), BridgeError> {
        let mut inner = self.write();
        if inner.state != BridgeState::PreInitialized {
            return Err(BridgeError::InvalidState {
                op: "initialize",
                state: inner.state,
            });
        }

        let Some(callbacks) = inner.callbacks.clone() else {
            return Err(Self::fail(&mut inner, BridgeError::Disabled));
        };

        let cache = inner.code_cache_dir.clone();
        match callbacks.initialize(runtime, cache.as_deref(), isa) {
            Ok(true) => {
                tracing::info!("native bridge initialized for {}", isa);
                inner.state = BridgeState::Initialized;
                Ok(())
            }
            Ok(false) => Err(Self::fail(&mut inner, BridgeError::InitializeFailed(isa.to_string()))),
            Err(e) => Err(Self::fail(&mut inner, e)),
        }
    }

    /// Drop the bridge. Handles and trampolines issued earlier stay usable.
    pub fn unload(&self) {
        let mut inner = self.write();
        if inner.callbacks.take().is_some() {
            tracing::info!("native bridge unloaded");
        }
        inner.state = BridgeState::Closed;
    }

    /// Apply the post-fork action in a child process.
    pub fn init_post_fork(
        &self,
        action: NativeBridgeAction,
        runtime: Arc<dyn RuntimeCallbacks>,
        isa: &str,
    ) -> Result<(), BridgeError> {
        match action {
            NativeBridgeAction::Unload => {
                self.unload();
                Ok(())
            }
            NativeBridgeAction::Initialize => self.initialize(runtime, isa),
        }
    }

    /// Fire the bridge's pre-fork hook. Only the first call that reaches an
    /// initialized bridge has any effect; calls before that leave the hook armed.
    pub fn pre_zygote_fork(&self) -> PreForkOutcome {
        let callbacks = match self.initialized() {
            Ok(callbacks) => callbacks,
            Err(_) => return PreForkOutcome::NoBridge,
        };

        if self.pre_fork_done.swap(true, Ordering::AcqRel) {
            tracing::warn!("pre-zygote-fork hook already ran; ignoring");
            return PreForkOutcome::AlreadyDone;
        }

        if !callbacks.has(Capability::PreZygoteFork) {
            tracing::info!(
                "native bridge {} does not support the pre-zygote-fork hook",
                callbacks.version()
            );
            return PreForkOutcome::Unsupported;
        }

        match callbacks.pre_zygote_fork() {
            Ok(()) => PreForkOutcome::Forwarded,
            Err(_) => PreForkOutcome::Unsupported,
        }
    }

    /// The callback table of a loaded bridge.
    pub fn callbacks(&self) -> Result<NativeBridgeCallbacks, BridgeError> {
        let inner = self.read();
        match (&inner.callbacks, inner.state) {
            (Some(callbacks), BridgeState::Opened | BridgeState::PreInitialized | BridgeState::Initialized) => {
                Ok(callbacks.clone())
            }
            (_, state) => Err(BridgeError::InvalidState {
                op: "be used",
                state,
            }),
        }
    }

    fn initialized(&self) -> Result<NativeBridgeCallbacks, BridgeError> {
        let inner = self.read();
        match (&inner.callbacks, inner.state) {
            (Some(callbacks), BridgeState::Initialized) => Ok(callbacks.clone()),
            (_, state) => Err(BridgeError::InvalidState {
                op: "be called",
                state,
            }),
        }
    }

    pub fn load_library(&self, path: &str, flags: i32) -> Result<LibraryHandle, BridgeError> {
        let callbacks = self.initialized()?;
        callbacks
            .load_library(path, flags)?
            .ok_or_else(|| BridgeError::LoadFailed {
                path: path.to_string(),
                reason: self.last_error(&callbacks),
            })
    }

    pub fn get_trampoline(
        &self,
        handle: LibraryHandle,
        name: &str,
        shorty: &Shorty,
    ) -> Result<Trampoline, BridgeError> {
        self.initialized()?
            .get_trampoline(handle, name, shorty)?
            .ok_or_else(|| BridgeError::SymbolNotFound {
                symbol: name.to_string(),
            })
    }

    pub fn is_supported(&self, path: &str) -> Result<bool, BridgeError> {
        self.initialized()?.is_supported(path)
    }

    pub fn get_app_env(&self, abi: &str) -> Result<Option<RuntimeValues>, BridgeError> {
        self.initialized()?.get_app_env(abi)
    }

    /// False when no bridge is loaded.
    pub fn is_compatible_with(&self, version: BridgeVersion) -> bool {
        self.callbacks()
            .map(|c| c.is_compatible_with(version))
            .unwrap_or(false)
    }

    pub fn get_signal_handler(&self, signal: i32) -> Result<Option<SignalHandler>, BridgeError> {
        self.initialized()?.get_signal_handler(signal)
    }

    /// The bridge may keep the library mapped; earlier handles stay valid either way.
    pub fn unload_library(&self, handle: LibraryHandle) -> Result<bool, BridgeError> {
        self.initialized()?.unload_library(handle)
    }

    pub fn get_error(&self) -> Result<Option<String>, BridgeError> {
        self.initialized()?.get_error()
    }

    pub fn is_path_supported(&self, path: &str) -> Result<bool, BridgeError> {
        self.initialized()?.is_path_supported(path)
    }

    pub fn init_anonymous_namespace(
        &self,
        public_libs: &str,
        library_path: &str,
    ) -> Result<bool, BridgeError> {
        self.initialized()?
            .init_anonymous_namespace(public_libs, library_path)
    }

    pub fn create_namespace(
        &self,
        config: &NamespaceConfig,
    ) -> Result<Option<NamespaceHandle>, BridgeError> {
        self.initialized()?.create_namespace(config)
    }

    pub fn link_namespaces(
        &self,
        from: NamespaceHandle,
        to: NamespaceHandle,
        shared_libs: &str,
    ) -> Result<bool, BridgeError> {
        self.initialized()?.link_namespaces(from, to, shared_libs)
    }

    pub fn load_library_ext(
        &self,
        path: &str,
        flags: i32,
        ns: NamespaceHandle,
    ) -> Result<Option<LibraryHandle>, BridgeError> {
        self.initialized()?.load_library_ext(path, flags, ns)
    }

    pub fn get_vendor_namespace(&self) -> Result<Option<NamespaceHandle>, BridgeError> {
        self.initialized()?.get_vendor_namespace()
    }

    pub fn get_exported_namespace(&self, name: &str) -> Result<Option<NamespaceHandle>, BridgeError> {
        self.initialized()?.get_exported_namespace(name)
    }

    fn last_error(&self, callbacks: &NativeBridgeCallbacks) -> String {
        callbacks
            .get_error()
            .ok()
            .flatten()
            .unwrap_or_else(|| "unknown error".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeNativeBridge, FakeRuntimeCallbacks};
    use tempfile::TempDir;

    fn registry(version: u32, bridge: Arc<FakeNativeBridge>) -> BridgeRegistry {
        let mut registry = BridgeRegistry::new();
        registry.register("libfake_bridge.so", move || {
            NativeBridgeCallbacks::new(BridgeVersion(version), bridge.clone())
        });
        registry
    }

    fn initialized(version: u32) -> (NativeBridgeRuntime, Arc<FakeNativeBridge>) {
        let bridge = Arc::new(FakeNativeBridge::new());
        let runtime = NativeBridgeRuntime::new();
        runtime
            .load("libfake_bridge.so", &registry(version, bridge.clone()))
            .unwrap();
        runtime.pre_initialize(None, "arm").unwrap();
        runtime
            .initialize(Arc::new(FakeRuntimeCallbacks), "arm")
            .unwrap();
        (runtime, bridge)
    }

    #[test]
    fn test_name_validation() {
        assert!(is_name_acceptable("libnb.so"));
        assert!(is_name_acceptable("lib-nb_2.so"));
        assert!(!is_name_acceptable("0"));
        assert!(!is_name_acceptable(".hidden"));
        assert!(!is_name_acceptable("lib/nb.so"));
        assert!(!is_name_acceptable(""));
    }

    #[test]
    fn test_disabled_by_zero() {
        let runtime = NativeBridgeRuntime::new();
        let loaded = runtime.load("0", &BridgeRegistry::new()).unwrap();
        assert!(!loaded);
        assert_eq!(runtime.state(), BridgeState::Closed);
    }

    #[test]
    fn test_invalid_name_is_error_state() {
        let runtime = NativeBridgeRuntime::new();
        let err = runtime.load("/abs/lib.so", &BridgeRegistry::new()).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidName(_)));
        assert_eq!(runtime.state(), BridgeState::Error);
    }

    #[test]
    fn test_full_lifecycle() {
        let tmp = TempDir::new().unwrap();
        let bridge = Arc::new(FakeNativeBridge::new());
        let runtime = NativeBridgeRuntime::new();

        assert!(runtime
            .load("libfake_bridge.so", &registry(6, bridge.clone()))
            .unwrap());
        assert_eq!(runtime.state(), BridgeState::Opened);

        runtime.pre_initialize(Some(tmp.path()), "arm").unwrap();
        assert_eq!(runtime.state(), BridgeState::PreInitialized);
        assert!(tmp.path().join("code_cache").is_dir());

        runtime
            .initialize(Arc::new(FakeRuntimeCallbacks), "arm")
            .unwrap();
        assert!(runtime.is_initialized());
        assert_eq!(bridge.initialized_isa().as_deref(), Some("arm"));

        runtime.unload();
        assert_eq!(runtime.state(), BridgeState::Closed);
        assert!(!runtime.is_loaded());
    }

    #[test]
    fn test_out_of_order_lifecycle_rejected() {
        let runtime = NativeBridgeRuntime::new();
        assert!(matches!(
            runtime.pre_initialize(None, "arm"),
            Err(BridgeError::InvalidState { .. })
        ));
        assert!(matches!(
            runtime.initialize(Arc::new(FakeRuntimeCallbacks), "arm"),
            Err(BridgeError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_unknown_bridge_fails_attempt_only() {
        let runtime = NativeBridgeRuntime::new();
        let err = runtime.load("libmissing.so", &BridgeRegistry::new()).unwrap_err();
        assert!(matches!(err, BridgeError::OpenFailed(_)));
        assert_eq!(runtime.state(), BridgeState::Error);
    }

    #[test]
    fn test_pre_zygote_fork_runs_once() {
        let (runtime, bridge) = initialized(6);
        assert_eq!(runtime.pre_zygote_fork(), PreForkOutcome::Forwarded);
        assert_eq!(runtime.pre_zygote_fork(), PreForkOutcome::AlreadyDone);
        assert_eq!(bridge.pre_fork_calls(), 1);
    }

    #[test]
    fn test_pre_zygote_fork_before_initialize_stays_armed() {
        let bridge = Arc::new(FakeNativeBridge::new());
        let runtime = NativeBridgeRuntime::new();
        assert_eq!(runtime.pre_zygote_fork(), PreForkOutcome::NoBridge);

        runtime
            .load("libfake_bridge.so", &registry(6, bridge.clone()))
            .unwrap();
        runtime.pre_initialize(None, "arm").unwrap();
        assert_eq!(runtime.pre_zygote_fork(), PreForkOutcome::NoBridge);

        runtime
            .initialize(Arc::new(FakeRuntimeCallbacks), "arm")
            .unwrap();
        assert_eq!(runtime.pre_zygote_fork(), PreForkOutcome::Forwarded);
        assert_eq!(bridge.pre_fork_calls(), 1);
    }

    #[test]
    fn test_pre_zygote_fork_on_old_bridge() {
        let (runtime, bridge) = initialized(5);
        assert_eq!(runtime.pre_zygote_fork(), PreForkOutcome::Unsupported);
        assert_eq!(bridge.pre_fork_calls(), 0);
    }

    #[test]
    fn test_unload_library_keeps_trampolines() {
        let (runtime, _bridge) = initialized(6);
        let handle = runtime.load_library("libguest.so", 0).unwrap();
        let shorty = Shorty::parse("I").unwrap();
        let trampoline = runtime.get_trampoline(handle, "answer", &shorty).unwrap();

        assert!(runtime.unload_library(handle).unwrap());
        assert_eq!(
            trampoline.invoke(&[]).unwrap(),
            crate::bridge::shorty::Value::Int(42)
        );
    }

    #[test]
    fn test_post_fork_unload() {
        let (runtime, _bridge) = initialized(6);
        runtime
            .init_post_fork(NativeBridgeAction::Unload, Arc::new(FakeRuntimeCallbacks), "arm")
            .unwrap();
        assert_eq!(runtime.state(), BridgeState::Closed);
        assert!(!runtime.is_compatible_with(BridgeVersion::DEFAULT));
    }

    #[test]
    fn test_missing_library_reports_bridge_error() {
        let (runtime, _bridge) = initialized(6);
        let err = runtime.load_library("libabsent.so", 0).unwrap_err();
        assert!(err.to_string().contains("libabsent.so"));
    }
}
