//! The versioned native bridge callback table.
//!
//! Each bridge version appends callbacks; none are ever removed or reordered.
//! A bridge built against version N provides exactly the callbacks introduced
//! in versions `1..=N`, and every call is checked against that table.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::bridge::shorty::{MarshalError, Shorty};
use crate::bridge::trampoline::Trampoline;

/// Version of the callback table a bridge implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct BridgeVersion(pub u32);

impl BridgeVersion {
    pub const DEFAULT: BridgeVersion = BridgeVersion(1);
    pub const SIGNAL: BridgeVersion = BridgeVersion(2);
    pub const NAMESPACE: BridgeVersion = BridgeVersion(3);
    pub const VENDOR_NAMESPACE: BridgeVersion = BridgeVersion(4);
    pub const RUNTIME_NAMESPACE: BridgeVersion = BridgeVersion(5);
    pub const PRE_ZYGOTE_FORK: BridgeVersion = BridgeVersion(6);

    /// Newest version this runtime knows about.
    pub const SUPPORTED_MAX: BridgeVersion = BridgeVersion::PRE_ZYGOTE_FORK;

    /// Slots a table of this version has, in table order.
    pub fn capabilities(self) -> Vec<Capability> {
        Capability::ALL
            .iter()
            .copied()
            .filter(|c| self >= c.introduced_in())
            .collect()
    }

    /// Whether a bridge of this version can serve a runtime expecting `runtime`.
    ///
    /// Version 1 tables predate the check and accept any non-zero version.
    /// Later tables accept `1..=self`, so the answer is monotonic.
    pub fn serves(self, runtime: BridgeVersion) -> bool {
        if runtime.0 == 0 || self.0 == 0 {
            return false;
        }
        if self < BridgeVersion::SIGNAL {
            return true;
        }
        runtime <= self
    }
}

impl fmt::Display for BridgeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// One slot of the callback table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Capability {
    Initialize,
    LoadLibrary,
    GetTrampoline,
    IsSupported,
    GetAppEnv,
    IsCompatibleWith,
    GetSignalHandler,
    UnloadLibrary,
    GetError,
    IsPathSupported,
    InitAnonymousNamespace,
    CreateNamespace,
    LinkNamespaces,
    LoadLibraryExt,
    GetVendorNamespace,
    GetExportedNamespace,
    PreZygoteFork,
}

impl Capability {
    /// Every slot, in table order. Append-only.
    pub const ALL: [Capability; 17] = [
        Capability::Initialize,
        Capability::LoadLibrary,
        Capability::GetTrampoline,
        Capability::IsSupported,
        Capability::GetAppEnv,
        Capability::IsCompatibleWith,
        Capability::GetSignalHandler,
        Capability::UnloadLibrary,
        Capability::GetError,
        Capability::IsPathSupported,
        Capability::InitAnonymousNamespace,
        Capability::CreateNamespace,
        Capability::LinkNamespaces,
        Capability::LoadLibraryExt,
        Capability::GetVendorNamespace,
        Capability::GetExportedNamespace,
        Capability::PreZygoteFork,
    ];

    pub fn introduced_in(&self) -> BridgeVersion {
        match self {
            Capability::Initialize
            | Capability::LoadLibrary
            | Capability::GetTrampoline
            | Capability::IsSupported
            | Capability::GetAppEnv => BridgeVersion::DEFAULT,
            Capability::IsCompatibleWith | Capability::GetSignalHandler => BridgeVersion::SIGNAL,
            Capability::UnloadLibrary
            | Capability::GetError
            | Capability::IsPathSupported
            | Capability::InitAnonymousNamespace
            | Capability::CreateNamespace
            | Capability::LinkNamespaces
            | Capability::LoadLibraryExt => BridgeVersion::NAMESPACE,
            Capability::GetVendorNamespace => BridgeVersion::VENDOR_NAMESPACE,
            Capability::GetExportedNamespace => BridgeVersion::RUNTIME_NAMESPACE,
            Capability::PreZygoteFork => BridgeVersion::PRE_ZYGOTE_FORK,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Capability::Initialize => "initialize",
            Capability::LoadLibrary => "loadLibrary",
            Capability::GetTrampoline => "getTrampoline",
            Capability::IsSupported => "isSupported",
            Capability::GetAppEnv => "getAppEnv",
            Capability::IsCompatibleWith => "isCompatibleWith",
            Capability::GetSignalHandler => "getSignalHandler",
            Capability::UnloadLibrary => "unloadLibrary",
            Capability::GetError => "getError",
            Capability::IsPathSupported => "isPathSupported",
            Capability::InitAnonymousNamespace => "initAnonymousNamespace",
            Capability::CreateNamespace => "createNamespace",
            Capability::LinkNamespaces => "linkNamespaces",
            Capability::LoadLibraryExt => "loadLibraryExt",
            Capability::GetVendorNamespace => "getVendorNamespace",
            Capability::GetExportedNamespace => "getExportedNamespace",
            Capability::PreZygoteFork => "preZygoteFork",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors from the native bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("native bridge {version} does not provide `{capability}`")]
    Unsupported {
        capability: Capability,
        version: BridgeVersion,
    },

    #[error("native bridge {version} is not compatible with {required}")]
    Incompatible {
        version: BridgeVersion,
        required: BridgeVersion,
    },

    #[error("native bridge library name `{0}` is not acceptable")]
    InvalidName(String),

    #[error("native bridge `{0}` could not be opened")]
    OpenFailed(String),

    #[error("native bridge is disabled")]
    Disabled,

    #[error("native bridge cannot {op} while {state}")]
    InvalidState {
        op: &'static str,
        state: crate::bridge::runtime::BridgeState,
    },

    #[error("native bridge failed to initialize for `{0}`")]
    InitializeFailed(String),

    #[error("native bridge could not load `{path}`: {reason}")]
    LoadFailed { path: String, reason: String },

    #[error("symbol `{symbol}` not found through the native bridge")]
    SymbolNotFound { symbol: String },

    #[error("failed to create code cache {}", .path.display())]
    CodeCache {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Marshal(#[from] MarshalError),
}

/// Handle of a library loaded through the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LibraryHandle(pub u64);

/// Handle of a linker namespace managed by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NamespaceHandle(pub u64);

/// Values the bridge reports for the guest environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuntimeValues {
    pub os_arch: String,
    pub cpu_abi: String,
    pub cpu_abi2: Option<String>,
    pub supported_abis: Vec<String>,
}

/// Parameters of `createNamespace`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceConfig {
    pub name: String,
    pub ld_library_path: String,
    pub default_library_path: String,
    pub kind: u64,
    pub permitted_when_isolated_path: String,
    pub parent: Option<NamespaceHandle>,
}

/// Handler the bridge installs for a signal it needs to see first.
pub type SignalHandler = Arc<dyn Fn(i32) -> bool + Send + Sync>;

/// What the host runtime exposes to the bridge.
pub trait RuntimeCallbacks: Send + Sync {
    /// Shorty of a native method, by its qualified name.
    fn method_shorty(&self, method: &str) -> Option<Shorty>;

    /// Number of native methods registered for `class`.
    fn native_method_count(&self, class: &str) -> usize;
}

/// The function set of a bridge implementation.
///
/// Callbacks introduced after version 1 have defaults so that an
/// implementation written against an older version only provides what that
/// version defines. Presence is decided by [`NativeBridgeCallbacks`], never by
/// the implementation.
pub trait NativeBridge: Send + Sync {
    fn initialize(
        &self,
        runtime: Arc<dyn RuntimeCallbacks>,
        private_dir: Option<&std::path::Path>,
        isa: &str,
    ) -> bool;

    fn load_library(&self, path: &str, flags: i32) -> Option<LibraryHandle>;

    fn get_trampoline(&self, handle: LibraryHandle, name: &str, shorty: &Shorty) -> Option<Trampoline>;

    fn is_supported(&self, path: &str) -> bool;

    fn get_app_env(&self, abi: &str) -> Option<RuntimeValues>;

    fn get_signal_handler(&self, _signal: i32) -> Option<SignalHandler> {
        None
    }

    /// May do nothing: code loaded through the bridge can stay mapped.
    fn unload_library(&self, _handle: LibraryHandle) -> bool {
        true
    }

    fn get_error(&self) -> Option<String> {
        None
    }

    fn is_path_supported(&self, _path: &str) -> bool {
        false
    }

    fn init_anonymous_namespace(&self, _public_libs: &str, _library_path: &str) -> bool {
        false
    }

    fn create_namespace(&self, _config: &NamespaceConfig) -> Option<NamespaceHandle> {
        None
    }

    fn link_namespaces(&self, _from: NamespaceHandle, _to: NamespaceHandle, _shared_libs: &str) -> bool {
        false
    }

    fn load_library_ext(&self, _path: &str, _flags: i32, _ns: NamespaceHandle) -> Option<LibraryHandle> {
        None
    }

    fn get_vendor_namespace(&self) -> Option<NamespaceHandle> {
        None
    }

    fn get_exported_namespace(&self, _name: &str) -> Option<NamespaceHandle> {
        None
    }

    /// Reset fork-related state before the zygote forks.
    fn pre_zygote_fork(&self) {}
}

/// A bridge implementation paired with the table version it was built against.
#[derive(Clone)]
pub struct NativeBridgeCallbacks {
    version: BridgeVersion,
    imp: Arc<dyn NativeBridge>,
}

impl fmt::Debug for NativeBridgeCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeBridgeCallbacks")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl NativeBridgeCallbacks {
    pub fn new(version: BridgeVersion, imp: Arc<dyn NativeBridge>) -> Self {
        NativeBridgeCallbacks { version, imp }
    }

    pub fn version(&self) -> BridgeVersion {
        self.version
    }

    /// Whether the table has the slot for `capability`.
    pub fn has(&self, capability: Capability) -> bool {
        self.version >= capability.introduced_in()
    }

    /// Slots present in this table, in table order.
    pub fn capabilities(&self) -> Vec<Capability> {
        self.version.capabilities()
    }

    fn require(&self, capability: Capability) -> Result<&dyn NativeBridge, BridgeError> {
        if self.has(capability) {
            Ok(self.imp.as_ref())
        } else {
            Err(BridgeError::Unsupported {
                capability,
                version: self.version,
            })
        }
    }

    /// Whether this bridge can serve a runtime expecting `version`.
    pub fn is_compatible_with(&self, version: BridgeVersion) -> bool {
        self.version.serves(version)
    }

    pub fn initialize(
        &self,
        runtime: Arc<dyn RuntimeCallbacks>,
        private_dir: Option<&std::path::Path>,
        isa: &str,
    ) -> Result<bool, BridgeError> {
        Ok(self
            .require(Capability::Initialize)?
            .initialize(runtime, private_dir, isa))
    }

    pub fn load_library(&self, path: &str, flags: i32) -> Result<Option<LibraryHandle>, BridgeError> {
        Ok(self.require(Capability::LoadLibrary)?.load_library(path, flags))
    }

    pub fn get_trampoline(
        &self,
        handle: LibraryHandle,
        name: &str,
        shorty: &Shorty,
    ) -> Result<Option<Trampoline>, BridgeError> {
        Ok(self
            .require(Capability::GetTrampoline)?
            .get_trampoline(handle, name, shorty))
    }

    pub fn is_supported(&self, path: &str) -> Result<bool, BridgeError> {
        Ok(self.require(Capability::IsSupported)?.is_supported(path))
    }

    pub fn get_app_env(&self, abi: &str) -> Result<Option<RuntimeValues>, BridgeError> {
        Ok(self.require(Capability::GetAppEnv)?.get_app_env(abi))
    }

    pub fn get_signal_handler(&self, signal: i32) -> Result<Option<SignalHandler>, BridgeError> {
        Ok(self
            .require(Capability::GetSignalHandler)?
            .get_signal_handler(signal))
    }

    pub fn unload_library(&self, handle: LibraryHandle) -> Result<bool, BridgeError> {
        Ok(self.require(Capability::UnloadLibrary)?.unload_library(handle))
    }

    pub fn get_error(&self) -> Result<Option<String>, BridgeError> {
        Ok(self.require(Capability::GetError)?.get_error())
    }

    pub fn is_path_supported(&self, path: &str) -> Result<bool, BridgeError> {
        Ok(self
            .require(Capability::IsPathSupported)?
            .is_path_supported(path))
    }

    pub fn init_anonymous_namespace(
        &self,
        public_libs: &str,
        library_path: &str,
    ) -> Result<bool, BridgeError> {
        Ok(self
            .require(Capability::InitAnonymousNamespace)?
            .init_anonymous_namespace(public_libs, library_path))
    }

    pub fn create_namespace(
        &self,
        config: &NamespaceConfig,
    ) -> Result<Option<NamespaceHandle>, BridgeError> {
        Ok(self
            .require(Capability::CreateNamespace)?
            .create_namespace(config))
    }

    pub fn link_namespaces(
        &self,
        from: NamespaceHandle,
        to: NamespaceHandle,
        shared_libs: &str,
    ) -> Result<bool, BridgeError> {
        Ok(self
            .require(Capability::LinkNamespaces)?
            .link_namespaces(from, to, shared_libs))
    }

    pub fn load_library_ext(
        &self,
        path: &str,
        flags: i32,
        ns: NamespaceHandle,
    ) -> Result<Option<LibraryHandle>, BridgeError> {
        Ok(self
            .require(Capability::LoadLibraryExt)?
            .load_library_ext(path, flags, ns))
    }

    pub fn get_vendor_namespace(&self) -> Result<Option<NamespaceHandle>, BridgeError> {
        Ok(self
            .require(Capability::GetVendorNamespace)?
            .get_vendor_namespace())
    }

    pub fn get_exported_namespace(&self, name: &str) -> Result<Option<NamespaceHandle>, BridgeError> {
        Ok(self
            .require(Capability::GetExportedNamespace)?
            .get_exported_namespace(name))
    }

    pub fn pre_zygote_fork(&self) -> Result<(), BridgeError> {
        self.require(Capability::PreZygoteFork)?.pre_zygote_fork();
        Ok(())
    }
}
