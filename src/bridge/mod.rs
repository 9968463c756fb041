//! Cross-ABI support: running HAL implementations built for another ISA.
//!
//! The [`NativeBridgeRuntime`] owns the process's bridge and its lifecycle.
//! A bridge exposes a versioned table of callbacks
//! ([`NativeBridgeCallbacks`]); code behind it is reached through
//! [`Trampoline`]s whose argument marshaling is described by a [`Shorty`].

pub mod callbacks;
pub mod runtime;
pub mod shorty;
pub mod tls;
pub mod trampoline;

pub use callbacks::{
    BridgeError, BridgeVersion, Capability, LibraryHandle, NamespaceConfig, NamespaceHandle,
    NativeBridge, NativeBridgeCallbacks, RuntimeCallbacks, RuntimeValues, SignalHandler,
};
pub use runtime::{
    is_name_acceptable, BridgeProvider, BridgeRegistry, BridgeState, NativeBridgeAction,
    NativeBridgeRuntime, PreForkOutcome,
};
pub use shorty::{GuestAbi, MarshalError, Shorty, ShortyError, ShortyType, Value};
pub use tls::{BootstrapError, BootstrapGuard, HostRuntime, StaticTlsConfig};
pub use trampoline::{HostFn, Trampoline};
