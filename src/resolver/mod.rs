//! Transport resolution and binding.
//!
//! A request names a HAL instance. The device manifest decides how it is
//! reached:
//!
//! - passthrough, built for the caller's bitness: load the implementation
//!   library and call its factory in-process;
//! - passthrough, built only for the other bitness: load it through the
//!   native bridge and call the factory via a trampoline;
//! - hwbinder or aidl: look the service up in the service manager.
//!
//! Not being declared is an expected outcome: [`TransportResolver::transport_of`]
//! returns the empty transport and [`TransportResolver::resolve`] returns `None`.

pub mod binder;
pub mod errors;
pub mod passthrough;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::bridge::{BridgeError, LibraryHandle, NativeBridgeRuntime, Shorty, ShortyType, Trampoline};
use crate::core::fqname::FqName;
use crate::core::manifest::{Manifest, VersionPolicy};
use crate::core::manifest_instance::ManifestInstance;
use crate::core::transport::{Bitness, Transport, TransportArch};
use crate::util::config::PassthroughConfig;

pub use binder::{Binder, LocalBinder, LocalServiceManager, ServiceManager, FLAG_ONEWAY};
pub use errors::{BindError, BinderError, NotFound};
pub use passthrough::{
    factory_symbol, impl_library_name, DlopenLoader, LibraryLoader, LoadError, LoadedLibrary,
};

/// `dlopen` flag passed to the bridge when loading an implementation.
const RTLD_NOW: i32 = 2;

/// How a declared instance is reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum BindingStrategy {
    /// Load one of `libraries` into this process and call `symbol`.
    Passthrough {
        libraries: Vec<PathBuf>,
        symbol: String,
    },
    /// Load one of `libraries` through the native bridge.
    CrossAbi {
        libraries: Vec<PathBuf>,
        symbol: String,
        guest: Bitness,
    },
    /// Ask the service manager for `service`.
    Binder { service: String },
}

impl BindingStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            BindingStrategy::Passthrough { .. } => "passthrough",
            BindingStrategy::CrossAbi { .. } => "cross-abi",
            BindingStrategy::Binder { .. } => "binder",
        }
    }
}

/// The manifest entry serving a request and how to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub instance: ManifestInstance,
    pub strategy: BindingStrategy,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BindOptions {
    /// Wait this long for a binder service to register.
    pub wait: Option<Duration>,
}

/// A bound HAL.
pub enum HalHandle {
    InProcess {
        library: Arc<dyn LoadedLibrary>,
        factory: String,
        address: usize,
    },
    Remote {
        service: String,
        binder: Arc<dyn Binder>,
    },
    Bridged {
        library: PathBuf,
        handle: LibraryHandle,
        factory: Trampoline,
    },
}

impl HalHandle {
    pub fn kind(&self) -> &'static str {
        match self {
            HalHandle::InProcess { .. } => "in-process",
            HalHandle::Remote { .. } => "remote",
            HalHandle::Bridged { .. } => "bridged",
        }
    }

    /// Send a transaction to a remote handle.
    ///
    /// Blocks until the reply arrives. With [`FLAG_ONEWAY`] no reply is
    /// returned. Failures are reported as-is.
    pub fn transact(&self, code: u32, data: &[u8], flags: u32) -> Result<Option<Vec<u8>>, BinderError> {
        let HalHandle::Remote { binder, .. } = self else {
            return Err(BinderError::NotRemote);
        };
        if !binder.is_alive() {
            return Err(BinderError::DeadObject);
        }
        let reply = binder.transact(code, data, flags)?;
        if flags & FLAG_ONEWAY != 0 {
            Ok(None)
        } else {
            Ok(Some(reply))
        }
    }
}

impl fmt::Debug for HalHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HalHandle::InProcess {
                library, factory, ..
            } => f
                .debug_struct("InProcess")
                .field("library", &library.path())
                .field("factory", factory)
                .finish_non_exhaustive(),
            HalHandle::Remote { service, binder } => f
                .debug_struct("Remote")
                .field("service", service)
                .field("alive", &binder.is_alive())
                .finish(),
            HalHandle::Bridged {
                library,
                handle,
                factory,
            } => f
                .debug_struct("Bridged")
                .field("library", library)
                .field("handle", handle)
                .field("factory", factory)
                .finish(),
        }
    }
}

/// Resolves HAL requests against a device manifest.
pub struct TransportResolver {
    manifest: Arc<Manifest>,
    caller: Bitness,
    policy: VersionPolicy,
    passthrough: PassthroughConfig,
    root: PathBuf,
    loader: Arc<dyn LibraryLoader>,
    services: Arc<dyn ServiceManager>,
    bridge: Option<Arc<NativeBridgeRuntime>>,
}

impl TransportResolver {
    pub fn new(
        manifest: Arc<Manifest>,
        loader: Arc<dyn LibraryLoader>,
        services: Arc<dyn ServiceManager>,
    ) -> Self {
        TransportResolver {
            manifest,
            caller: Bitness::host(),
            policy: VersionPolicy::default(),
            passthrough: PassthroughConfig::default(),
            root: PathBuf::from("/"),
            loader,
            services,
            bridge: None,
        }
    }

    pub fn with_caller(mut self, bitness: Bitness) -> Self {
        self.caller = bitness;
        self
    }

    pub fn with_policy(mut self, policy: VersionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_passthrough(mut self, config: PassthroughConfig) -> Self {
        self.passthrough = config;
        self
    }

    /// Directory standing in for the device's `/` when locating libraries.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_bridge(mut self, bridge: Arc<NativeBridgeRuntime>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn caller(&self) -> Bitness {
        self.caller
    }

    /// Declared transport of `fq_name`, or [`TransportArch::EMPTY`].
    pub fn transport_of(&self, fq_name: &FqName) -> TransportArch {
        self.manifest
            .find_instance(fq_name, &self.policy)
            .map(ManifestInstance::transport_arch)
            .unwrap_or(TransportArch::EMPTY)
    }

    /// How `fq_name` would be bound, or `None` when nothing serves it.
    pub fn resolve(&self, fq_name: &FqName) -> Option<Resolution> {
        let instance = self.manifest.find_instance(fq_name, &self.policy)?;

        let strategy = match instance.transport() {
            Transport::Empty => return None,
            Transport::Hwbinder | Transport::Aidl => BindingStrategy::Binder {
                service: instance.description(),
            },
            Transport::Passthrough => {
                let symbol = factory_symbol(instance.interface());
                if instance.arch().contains_bitness(self.caller) {
                    BindingStrategy::Passthrough {
                        libraries: self.candidates(instance, self.caller)?,
                        symbol,
                    }
                } else {
                    let guest = self.caller.other();
                    if !instance.arch().contains_bitness(guest) {
                        return None;
                    }
                    BindingStrategy::CrossAbi {
                        libraries: self.candidates(instance, guest)?,
                        symbol,
                        guest,
                    }
                }
            }
        };

        tracing::debug!("{} resolves to {} via {}", fq_name, instance, strategy.name());
        Some(Resolution {
            instance: instance.clone(),
            strategy,
        })
    }

    fn candidates(&self, instance: &ManifestInstance, bitness: Bitness) -> Option<Vec<PathBuf>> {
        let library = impl_library_name(instance.package(), instance.version()?);
        Some(
            self.passthrough
                .search_dirs(bitness)
                .iter()
                .map(|dir| self.host_path(&dir.join(&library)))
                .collect(),
        )
    }

    fn host_path(&self, device_path: &Path) -> PathBuf {
        self.root
            .join(device_path.strip_prefix("/").unwrap_or(device_path))
    }

    /// Bind to `fq_name`.
    pub fn bind(&self, fq_name: &FqName, options: BindOptions) -> Result<HalHandle, BindError> {
        let name = fq_name.to_string();
        let resolution = self
            .resolve(fq_name)
            .ok_or_else(|| BindError::not_found(&name, NotFound::NotDeclared))?;

        match resolution.strategy {
            BindingStrategy::Passthrough { libraries, symbol } => {
                self.bind_passthrough(&name, libraries, symbol)
            }
            BindingStrategy::Binder { service } => self.bind_binder(&name, service, options),
            BindingStrategy::CrossAbi {
                libraries, symbol, ..
            } => self.bind_cross_abi(&name, libraries, symbol),
        }
    }

    fn bind_passthrough(
        &self,
        name: &str,
        libraries: Vec<PathBuf>,
        symbol: String,
    ) -> Result<HalHandle, BindError> {
        let mut missing_symbol = None;

        for path in &libraries {
            let library = match self.loader.load(path) {
                Ok(library) => library,
                Err(e) => {
                    tracing::debug!("{}", e);
                    continue;
                }
            };
            match library.symbol_address(&symbol) {
                Some(address) => {
                    tracing::info!("bound {} in-process from {}", name, path.display());
                    return Ok(HalHandle::InProcess {
                        library,
                        factory: symbol,
                        address,
                    });
                }
                None => {
                    tracing::warn!("{} does not export {}", path.display(), symbol);
                    missing_symbol.get_or_insert_with(|| path.clone());
                }
            }
        }

        let reason = match missing_symbol {
            Some(library) => NotFound::SymbolMissing { library, symbol },
            None => NotFound::LibraryMissing {
                candidates: libraries,
            },
        };
        Err(BindError::not_found(name, reason))
    }

    fn bind_binder(
        &self,
        name: &str,
        service: String,
        options: BindOptions,
    ) -> Result<HalHandle, BindError> {
        let binder = match options.wait {
            None => self
                .services
                .get_service(&service)
                .ok_or_else(|| BindError::not_found(name, NotFound::NotRegistered))?,
            Some(timeout) => self
                .services
                .wait_for_service(&service, timeout)
                .ok_or_else(|| BindError::not_found(name, NotFound::TimedOut(timeout)))?,
        };

        if !binder.is_alive() {
            return Err(BindError::DeadObject {
                name: name.to_string(),
            });
        }

        tracing::info!("bound {} to service {}", name, service);
        Ok(HalHandle::Remote { service, binder })
    }

    fn bind_cross_abi(
        &self,
        name: &str,
        libraries: Vec<PathBuf>,
        symbol: String,
    ) -> Result<HalHandle, BindError> {
        let bridge = match &self.bridge {
            Some(bridge) if bridge.is_initialized() => bridge,
            _ => {
                return Err(BindError::NoBridge {
                    name: name.to_string(),
                })
            }
        };
        let bridge_err = |source: BridgeError| BindError::Bridge {
            name: name.to_string(),
            source,
        };

        let factory_shorty = Shorty::nullary(ShortyType::Reference);
        let mut missing_symbol = None;

        for path in &libraries {
            let path_str = path.to_string_lossy();
            if !bridge.is_supported(&path_str).map_err(bridge_err)? {
                tracing::debug!("native bridge does not support {}", path_str);
                continue;
            }

            let handle = match bridge.load_library(&path_str, RTLD_NOW) {
                Ok(handle) => handle,
                Err(BridgeError::LoadFailed { reason, .. }) => {
                    tracing::debug!("bridge could not load {}: {}", path_str, reason);
                    continue;
                }
                Err(e) => return Err(bridge_err(e)),
            };

            match bridge.get_trampoline(handle, &symbol, &factory_shorty) {
                Ok(factory) => {
                    tracing::info!("bound {} through the native bridge from {}", name, path_str);
                    return Ok(HalHandle::Bridged {
                        library: path.clone(),
                        handle,
                        factory,
                    });
                }
                Err(BridgeError::SymbolNotFound { .. }) => {
                    tracing::warn!("{} does not export {} for the guest", path_str, symbol);
                    missing_symbol.get_or_insert_with(|| path.clone());
                }
                Err(e) => return Err(bridge_err(e)),
            }
        }

        let reason = match missing_symbol {
            Some(library) => NotFound::SymbolMissing { library, symbol },
            None => NotFound::LibraryMissing {
                candidates: libraries,
            },
        };
        Err(BindError::not_found(name, reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{BridgeRegistry, BridgeVersion, NativeBridgeCallbacks};
    use crate::core::manifest::ManifestType;
    use crate::core::transport::{Arch, HalFormat};
    use crate::core::version::HalVersion;
    use crate::test_support::{FakeLibraryLoader, FakeNativeBridge, FakeRuntimeCallbacks};

    fn hidl(version: (u32, u32), instance: &str, transport: Transport, arch: Arch) -> ManifestInstance {
        ManifestInstance::new(
            FqName::hidl(
                "android.hardware.foo",
                HalVersion::new(version.0, version.1),
                "IFoo",
                Some(instance),
            ),
            TransportArch::new(transport, arch),
            HalFormat::Hidl,
        )
    }

    fn manifest(entries: Vec<ManifestInstance>) -> Arc<Manifest> {
        let mut manifest = Manifest::new(ManifestType::Device);
        for entry in entries {
            manifest.add(entry).unwrap();
        }
        Arc::new(manifest)
    }

    fn fq(s: &str) -> FqName {
        s.parse().unwrap()
    }

    fn resolver(manifest: Arc<Manifest>, loader: FakeLibraryLoader) -> (TransportResolver, Arc<LocalServiceManager>) {
        let services = Arc::new(LocalServiceManager::new());
        let resolver = TransportResolver::new(manifest, Arc::new(loader), services.clone())
            .with_caller(Bitness::B64);
        (resolver, services)
    }

    fn bridged_resolver(bridge: Arc<FakeNativeBridge>) -> TransportResolver {
        let mut registry = BridgeRegistry::new();
        registry.register("libfake_bridge.so", move || {
            NativeBridgeCallbacks::new(BridgeVersion(6), bridge.clone())
        });
        let runtime = Arc::new(NativeBridgeRuntime::new());
        runtime.load("libfake_bridge.so", &registry).unwrap();
        runtime.pre_initialize(None, "arm").unwrap();
        runtime.initialize(Arc::new(FakeRuntimeCallbacks), "arm").unwrap();

        let m = manifest(vec![hidl((1, 0), "default", Transport::Passthrough, Arch::B32)]);
        let (r, _) = resolver(m, FakeLibraryLoader::new());
        r.with_bridge(runtime)
    }

    #[test]
    fn test_transport_lookup_scenario() {
        let m = manifest(vec![hidl((1, 0), "default", Transport::Hwbinder, Arch::empty())]);
        let (r, _) = resolver(m, FakeLibraryLoader::new());

        assert_eq!(
            r.transport_of(&fq("android.hardware.foo@1.0::IFoo/default")).transport,
            Transport::Hwbinder
        );
        assert!(r
            .transport_of(&fq("android.hardware.foo@1.0::IFoo/other_instance"))
            .is_empty());
        assert!(r.transport_of(&fq("android.hardware.foo@2.0::IFoo/default")).is_empty());
        assert!(r.resolve(&fq("android.hardware.foo@2.0::IFoo/default")).is_none());
    }

    #[test]
    fn test_resolve_passthrough_candidates() {
        let m = manifest(vec![hidl((1, 1), "default", Transport::Passthrough, Arch::B32 | Arch::B64)]);
        let (r, _) = resolver(m, FakeLibraryLoader::new());
        let r = r.with_root("/img");

        let resolution = r.resolve(&fq("android.hardware.foo@1.0::IFoo/default")).unwrap();
        match resolution.strategy {
            BindingStrategy::Passthrough { libraries, symbol } => {
                assert_eq!(symbol, "HIDL_FETCH_IFoo");
                assert_eq!(
                    libraries[0],
                    PathBuf::from("/img/odm/lib64/hw/android.hardware.foo@1.1-impl.so")
                );
                assert_eq!(libraries.len(), 3);
            }
            other => panic!("unexpected strategy {:?}", other),
        }
    }

    #[test]
    fn test_bind_passthrough() {
        let m = manifest(vec![hidl((1, 0), "default", Transport::Passthrough, Arch::B64)]);
        let loader = FakeLibraryLoader::new().with_library(
            "/vendor/lib64/hw/android.hardware.foo@1.0-impl.so",
            &["HIDL_FETCH_IFoo"],
        );
        let (r, _) = resolver(m, loader);

        let handle = r
            .bind(&fq("android.hardware.foo@1.0::IFoo/default"), BindOptions::default())
            .unwrap();
        assert_eq!(handle.kind(), "in-process");
        assert_eq!(handle.transact(1, &[], 0), Err(BinderError::NotRemote));
    }

    #[test]
    fn test_bind_passthrough_missing_library() {
        let m = manifest(vec![hidl((1, 0), "default", Transport::Passthrough, Arch::B64)]);
        let (r, _) = resolver(m, FakeLibraryLoader::new());

        let err = r
            .bind(&fq("android.hardware.foo@1.0::IFoo/default"), BindOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            BindError::ServiceNotFound {
                reason: NotFound::LibraryMissing { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_bind_passthrough_missing_symbol() {
        let m = manifest(vec![hidl((1, 0), "default", Transport::Passthrough, Arch::B64)]);
        let loader = FakeLibraryLoader::new()
            .with_library("/system/lib64/hw/android.hardware.foo@1.0-impl.so", &["other"]);
        let (r, _) = resolver(m, loader);

        let err = r
            .bind(&fq("android.hardware.foo@1.0::IFoo/default"), BindOptions::default())
            .unwrap_err();
        match err {
            BindError::ServiceNotFound {
                reason: NotFound::SymbolMissing { symbol, .. },
                ..
            } => assert_eq!(symbol, "HIDL_FETCH_IFoo"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_bind_binder() {
        let m = manifest(vec![hidl((1, 1), "default", Transport::Hwbinder, Arch::empty())]);
        let (r, services) = resolver(m, FakeLibraryLoader::new());
        let request = fq("android.hardware.foo@1.0::IFoo/default");

        let err = r.bind(&request, BindOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            BindError::ServiceNotFound {
                reason: NotFound::NotRegistered,
                ..
            }
        ));

        services.add_service(
            "android.hardware.foo@1.1::IFoo/default",
            Arc::new(LocalBinder::new(|_, data| Ok(data.to_vec()))),
        );
        let handle = r.bind(&request, BindOptions::default()).unwrap();
        assert_eq!(handle.transact(7, b"ping", 0).unwrap(), Some(b"ping".to_vec()));
        assert_eq!(handle.transact(7, b"ping", FLAG_ONEWAY).unwrap(), None);
    }

    #[test]
    fn test_bind_binder_wait_times_out() {
        let m = manifest(vec![hidl((1, 0), "default", Transport::Hwbinder, Arch::empty())]);
        let (r, _) = resolver(m, FakeLibraryLoader::new());
        let err = r
            .bind(
                &fq("android.hardware.foo@1.0::IFoo/default"),
                BindOptions {
                    wait: Some(Duration::from_millis(10)),
                },
            )
            .unwrap_err();
        assert!(matches!(
            err,
            BindError::ServiceNotFound {
                reason: NotFound::TimedOut(_),
                ..
            }
        ));
    }

    #[test]
    fn test_bind_dead_service() {
        let m = manifest(vec![hidl((1, 0), "default", Transport::Hwbinder, Arch::empty())]);
        let (r, services) = resolver(m, FakeLibraryLoader::new());
        let binder = Arc::new(LocalBinder::new(|_, _| Ok(Vec::new())));
        binder.kill();
        services.add_service("android.hardware.foo@1.0::IFoo/default", binder);

        let err = r
            .bind(&fq("android.hardware.foo@1.0::IFoo/default"), BindOptions::default())
            .unwrap_err();
        assert!(matches!(err, BindError::DeadObject { .. }));
    }

    #[test]
    fn test_aidl_service_name() {
        let mut manifest = Manifest::new(ManifestType::Device);
        manifest
            .add(ManifestInstance::new(
                FqName::aidl("android.hardware.power", "IPower", Some("default")),
                TransportArch::new(Transport::Aidl, Arch::empty()),
                HalFormat::Aidl,
            ))
            .unwrap();
        let (r, _) = resolver(Arc::new(manifest), FakeLibraryLoader::new());

        let resolution = r
            .resolve(&fq("android.hardware.power.IPower/default"))
            .unwrap();
        assert_eq!(
            resolution.strategy,
            BindingStrategy::Binder {
                service: "android.hardware.power.IPower/default".to_string()
            }
        );
    }

    #[test]
    fn test_cross_abi_requires_bridge() {
        let m = manifest(vec![hidl((1, 0), "default", Transport::Passthrough, Arch::B32)]);
        let (r, _) = resolver(m, FakeLibraryLoader::new());
        let request = fq("android.hardware.foo@1.0::IFoo/default");

        let resolution = r.resolve(&request).unwrap();
        assert!(matches!(
            resolution.strategy,
            BindingStrategy::CrossAbi {
                guest: Bitness::B32,
                ..
            }
        ));
        assert!(matches!(
            r.bind(&request, BindOptions::default()),
            Err(BindError::NoBridge { .. })
        ));
    }

    #[test]
    fn test_bind_cross_abi_through_bridge() {
        let bridge = Arc::new(FakeNativeBridge::new().with_library(
            "/vendor/lib/hw/android.hardware.foo@1.0-impl.so",
            "HIDL_FETCH_IFoo",
        ));
        let r = bridged_resolver(bridge);

        let handle = r
            .bind(&fq("android.hardware.foo@1.0::IFoo/default"), BindOptions::default())
            .unwrap();
        match handle {
            HalHandle::Bridged { library, factory, .. } => {
                assert_eq!(
                    library,
                    PathBuf::from("/vendor/lib/hw/android.hardware.foo@1.0-impl.so")
                );
                assert_eq!(factory.symbol(), "HIDL_FETCH_IFoo");
                assert_eq!(factory.returns(), ShortyType::Reference);
            }
            other => panic!("unexpected handle {:?}", other),
        }
    }

    #[test]
    fn test_bind_cross_abi_skips_library_without_factory() {
        let bridge = Arc::new(
            FakeNativeBridge::new()
                .with_library("/odm/lib/hw/android.hardware.foo@1.0-impl.so", "unrelated")
                .with_library(
                    "/vendor/lib/hw/android.hardware.foo@1.0-impl.so",
                    "HIDL_FETCH_IFoo",
                ),
        );
        let r = bridged_resolver(bridge);

        let handle = r
            .bind(&fq("android.hardware.foo@1.0::IFoo/default"), BindOptions::default())
            .unwrap();
        match handle {
            HalHandle::Bridged { library, .. } => assert_eq!(
                library,
                PathBuf::from("/vendor/lib/hw/android.hardware.foo@1.0-impl.so")
            ),
            other => panic!("unexpected handle {:?}", other),
        }
    }

    #[test]
    fn test_bind_cross_abi_missing_factory() {
        let bridge = Arc::new(
            FakeNativeBridge::new()
                .with_library("/odm/lib/hw/android.hardware.foo@1.0-impl.so", "unrelated"),
        );
        let r = bridged_resolver(bridge);

        let err = r
            .bind(&fq("android.hardware.foo@1.0::IFoo/default"), BindOptions::default())
            .unwrap_err();
        match err {
            BindError::ServiceNotFound {
                reason: NotFound::SymbolMissing { library, symbol },
                ..
            } => {
                assert_eq!(
                    library,
                    PathBuf::from("/odm/lib/hw/android.hardware.foo@1.0-impl.so")
                );
                assert_eq!(symbol, "HIDL_FETCH_IFoo");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
