//! A single HAL instance declared by a manifest.

use std::fmt;

use crate::core::fqname::FqName;
use crate::core::transport::{Arch, HalFormat, Transport, TransportArch};
use crate::core::version::HalVersion;

/// One `(interface, instance, transport, arch, format)` tuple of a manifest.
///
/// Ordering follows `(package, version, interface, instance, transport, arch,
/// format)`, which is the field order below.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ManifestInstance {
    fq_name: FqName,
    transport_arch: TransportArch,
    format: HalFormat,
}

impl ManifestInstance {
    /// Create an instance. `fq_name` must name an interface and an instance.
    pub fn new(fq_name: FqName, transport_arch: TransportArch, format: HalFormat) -> Self {
        debug_assert!(fq_name.interface().is_some() && fq_name.instance().is_some());
        ManifestInstance {
            fq_name,
            transport_arch,
            format,
        }
    }

    pub fn fq_name(&self) -> &FqName {
        &self.fq_name
    }

    pub fn package(&self) -> &str {
        self.fq_name.package()
    }

    pub fn version(&self) -> Option<HalVersion> {
        self.fq_name.version()
    }

    pub fn interface(&self) -> &str {
        self.fq_name.interface().unwrap_or_default()
    }

    pub fn instance(&self) -> &str {
        self.fq_name.instance().unwrap_or_default()
    }

    pub fn transport_arch(&self) -> TransportArch {
        self.transport_arch
    }

    pub fn transport(&self) -> Transport {
        self.transport_arch.transport
    }

    pub fn arch(&self) -> Arch {
        self.transport_arch.arch
    }

    pub fn format(&self) -> HalFormat {
        self.format
    }

    /// The fully-qualified instance string, e.g. `android.hardware.foo@1.0::IFoo/default`.
    pub fn description(&self) -> String {
        self.fq_name.to_string()
    }

    /// Whether this entry and `other` name the same package, major, interface and instance.
    pub fn same_major_instance(&self, other: &ManifestInstance) -> bool {
        self.package() == other.package()
            && self.interface() == other.interface()
            && self.instance() == other.instance()
            && self.version().map(|v| v.major) == other.version().map(|v| v.major)
    }
}

impl fmt::Display for ManifestInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}, {}]", self.fq_name, self.format, self.transport_arch)
    }
}
