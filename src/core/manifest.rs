//! HAL manifests.
//!
//! A manifest lists the HAL instances a device (vendor/odm partitions) or the
//! framework (system partition) provides. Manifests are stored as TOML:
//!
//! ```toml
//! type = "device"
//! target-level = 2
//!
//! [[hal]]
//! format = "hidl"
//! name = "android.hardware.foo"
//! transport = "hwbinder"
//! versions = ["1.0"]
//! fqnames = ["@1.1::IFoo/extra"]
//!
//! [[hal.interface]]
//! name = "IFoo"
//! instances = ["default"]
//! ```
//!
//! Once built, a manifest is never mutated; the process context shares it
//! behind an `Arc`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::fqname::{FqName, FqNameError};
use crate::core::manifest_instance::ManifestInstance;
use crate::core::transport::{Arch, HalFormat, Transport, TransportArch};
use crate::core::version::HalVersion;
use crate::util::diagnostic::ManifestSyntaxError;

/// Which image a manifest or matrix describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestType {
    #[default]
    Device,
    Framework,
}

impl fmt::Display for ManifestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestType::Device => write!(f, "device"),
            ManifestType::Framework => write!(f, "framework"),
        }
    }
}

/// Framework compatibility matrix (FCM) level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Level(pub u32);

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which declared versions satisfy a request.
///
/// Loaded from configuration so that the forward-compatibility rule can be
/// changed per release without touching lookup code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct VersionPolicy {
    /// A declaration at `M.n` satisfies requests for any `M.m` with `m <= n`.
    /// When false, the minor must match exactly.
    pub minor_forward_compatible: bool,
}

impl Default for VersionPolicy {
    fn default() -> Self {
        VersionPolicy {
            minor_forward_compatible: true,
        }
    }
}

impl VersionPolicy {
    /// Whether a HAL declared at `declared` can serve a request for `requested`.
    pub fn satisfies(&self, declared: &HalVersion, requested: &HalVersion) -> bool {
        if self.minor_forward_compatible {
            declared.minor_at_least(requested)
        } else {
            declared == requested
        }
    }
}

/// Semantic errors in a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("duplicated manifest entry `{0}`")]
    Duplicate(String),

    #[error("HAL `{hal}`: transport `{transport}` is not valid for {format} HALs")]
    InvalidTransport {
        hal: String,
        format: HalFormat,
        transport: TransportArch,
    },

    #[error("HAL `{hal}`: invalid fqname")]
    InvalidFqName {
        hal: String,
        #[source]
        source: FqNameError,
    },

    #[error("HAL `{hal}`: fqname `{fqname}` belongs to a different package")]
    PackageMismatch { hal: String, fqname: String },

    #[error("HAL `{hal}`: fqname `{fqname}` must name a version, interface and instance")]
    IncompleteFqName { hal: String, fqname: String },

    #[error("HAL `{hal}`: AIDL HALs do not carry HIDL versions")]
    UnexpectedVersion { hal: String },
}

/// An ordered, duplicate-free set of HAL instances.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    kind: ManifestType,
    target_level: Option<Level>,
    instances: BTreeMap<FqName, ManifestInstance>,
    /// `(package, major)` pairs declared with `override = true`.
    overrides: BTreeSet<(String, Option<u32>)>,
}

impl Manifest {
    /// Create an empty manifest.
    pub fn new(kind: ManifestType) -> Self {
        Manifest {
            kind,
            ..Default::default()
        }
    }

    pub fn with_target_level(mut self, level: Level) -> Self {
        self.target_level = Some(level);
        self
    }

    pub fn kind(&self) -> ManifestType {
        self.kind
    }

    pub fn target_level(&self) -> Option<Level> {
        self.target_level
    }

    /// Add an instance. Instances are unique by fully-qualified name.
    pub fn add(&mut self, instance: ManifestInstance) -> Result<(), ManifestError> {
        let key = instance.fq_name().clone();
        if self.instances.contains_key(&key) {
            return Err(ManifestError::Duplicate(key.to_string()));
        }
        self.instances.insert(key, instance);
        Ok(())
    }

    /// Merge `other` into this manifest.
    ///
    /// For every HAL `other` declares with `override = true`, entries with the
    /// same package and major version are dropped first.
    pub fn add_all(&mut self, other: &Manifest) -> Result<(), ManifestError> {
        for (package, major) in &other.overrides {
            let before = self.instances.len();
            self.instances.retain(|fq, _| {
                !(fq.package() == package && fq.version().map(|v| v.major) == *major)
            });
            let removed = before - self.instances.len();
            if removed > 0 {
                tracing::debug!(
                    "override of `{}` (major {:?}) removed {} entries",
                    package,
                    major,
                    removed
                );
            }
        }

        for instance in other.instances.values() {
            self.add(instance.clone())?;
        }

        self.overrides.extend(other.overrides.iter().cloned());
        if self.target_level.is_none() {
            self.target_level = other.target_level;
        }
        Ok(())
    }

    /// All instances in `(package, version, interface, instance)` order.
    pub fn instances(&self) -> impl Iterator<Item = &ManifestInstance> + '_ {
        self.instances.values()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Distinct packages with at least one instance.
    pub fn packages(&self) -> BTreeSet<&str> {
        self.instances.keys().map(|fq| fq.package()).collect()
    }

    /// Exact membership test.
    pub fn contains(&self, fq_name: &FqName) -> bool {
        self.instances.contains_key(fq_name)
    }

    /// Find the entry serving `fq_name` under `policy`.
    ///
    /// HIDL names match any declared version the policy accepts; when several
    /// do, the highest minor wins. AIDL names match exactly.
    pub fn find_instance(
        &self,
        fq_name: &FqName,
        policy: &VersionPolicy,
    ) -> Option<&ManifestInstance> {
        let interface = fq_name.interface()?;
        let instance = fq_name.instance()?;

        if fq_name.is_aidl() {
            return self
                .instances
                .get(fq_name)
                .filter(|e| e.format() == HalFormat::Aidl);
        }

        let requested = fq_name.version()?;
        self.instances
            .values()
            .filter(|e| {
                e.format() == HalFormat::Hidl
                    && e.package() == fq_name.package()
                    && e.interface() == interface
                    && e.instance() == instance
                    && e
                        .version()
                        .is_some_and(|declared| policy.satisfies(&declared, &requested))
            })
            .max_by_key(|e| e.version())
    }

    /// Transport declared for a HIDL instance, or [`Transport::Empty`].
    pub fn get_hidl_transport(
        &self,
        package: &str,
        version: HalVersion,
        interface: &str,
        instance: &str,
    ) -> Transport {
        self.get_hidl_transport_with(&VersionPolicy::default(), package, version, interface, instance)
    }

    /// [`Manifest::get_hidl_transport`] under an explicit policy.
    pub fn get_hidl_transport_with(
        &self,
        policy: &VersionPolicy,
        package: &str,
        version: HalVersion,
        interface: &str,
        instance: &str,
    ) -> Transport {
        let fq = FqName::hidl(package, version, interface, Some(instance));
        self.find_instance(&fq, policy)
            .map(|e| e.transport())
            .unwrap_or(Transport::Empty)
    }

    /// Transport declared for an AIDL instance, or [`Transport::Empty`].
    pub fn get_aidl_transport(&self, package: &str, interface: &str, instance: &str) -> Transport {
        let fq = FqName::aidl(package, interface, Some(instance));
        self.find_instance(&fq, &VersionPolicy::default())
            .map(|e| e.transport())
            .unwrap_or(Transport::Empty)
    }

    /// Transport for any fully-qualified instance name.
    pub fn get_transport(&self, fq_name: &FqName) -> Transport {
        self.find_instance(fq_name, &VersionPolicy::default())
            .map(|e| e.transport())
            .unwrap_or(Transport::Empty)
    }

    /// Instance names of `package@version::interface` served at `version` or a later minor.
    pub fn get_hidl_instances(
        &self,
        package: &str,
        version: HalVersion,
        interface: &str,
    ) -> BTreeSet<String> {
        self.list_instances(package, version, interface)
            .into_iter()
            .map(|(instance, _)| instance)
            .collect()
    }

    /// `(instance, declared version)` pairs of HIDL entries serving at least `version`.
    pub fn list_instances(
        &self,
        package: &str,
        version: HalVersion,
        interface: &str,
    ) -> Vec<(String, HalVersion)> {
        self.instances
            .values()
            .filter(|e| {
                e.format() == HalFormat::Hidl && e.package() == package && e.interface() == interface
            })
            .filter_map(|e| {
                let declared = e.version()?;
                declared
                    .minor_at_least(&version)
                    .then(|| (e.instance().to_string(), declared))
            })
            .collect()
    }

    /// Parse a manifest from TOML. `origin` names the file in error messages.
    pub fn from_toml(content: &str, origin: &str) -> Result<Self> {
        let raw: RawManifest = toml::from_str(content)
            .map_err(|e| ManifestSyntaxError::from_toml(origin, content, &e))?;

        Self::from_raw(raw).with_context(|| format!("invalid manifest {}", origin))
    }

    fn from_raw(raw: RawManifest) -> Result<Self, ManifestError> {
        let mut manifest = Manifest {
            kind: raw.kind,
            target_level: raw.target_level,
            ..Default::default()
        };

        for hal in raw.hals {
            for instance in convert_hal(&hal)? {
                if hal.override_ {
                    manifest
                        .overrides
                        .insert((hal.name.clone(), instance.version().map(|v| v.major)));
                }
                manifest.add(instance)?;
            }
            if hal.override_ && hal.interfaces.is_empty() && hal.fqnames.is_empty() {
                for version in &hal.versions {
                    manifest
                        .overrides
                        .insert((hal.name.clone(), Some(version.major)));
                }
            }
        }

        Ok(manifest)
    }

    /// Serialise back to the TOML schema, one `[[hal]]` per
    /// `(format, package, transport, version)`.
    pub fn to_toml(&self) -> Result<String> {
        let mut groups: BTreeMap<GroupKey, BTreeMap<String, Vec<String>>> = BTreeMap::new();
        for e in self.instances.values() {
            let key = GroupKey {
                format: e.format(),
                package: e.package().to_string(),
                transport_arch: e.transport_arch(),
                version: e.version(),
            };
            groups
                .entry(key)
                .or_default()
                .entry(e.interface().to_string())
                .or_default()
                .push(e.instance().to_string());
        }

        let hals = groups
            .into_iter()
            .map(|(key, interfaces)| {
                let major = key.version.map(|v| v.major);
                RawHal {
                    format: key.format,
                    override_: self.overrides.contains(&(key.package.clone(), major)),
                    transport: (!key.transport_arch.transport.is_empty())
                        .then_some(key.transport_arch.transport),
                    arch: (!key.transport_arch.arch.is_empty()).then_some(key.transport_arch.arch),
                    name: key.package,
                    versions: key.version.into_iter().collect(),
                    fqnames: Vec::new(),
                    interfaces: interfaces
                        .into_iter()
                        .map(|(name, instances)| RawInterface { name, instances })
                        .collect(),
                }
            })
            .collect();

        let raw = RawManifest {
            kind: self.kind,
            target_level: self.target_level,
            hals,
        };
        toml::to_string_pretty(&raw).context("failed to serialize manifest")
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct GroupKey {
    format: HalFormat,
    package: String,
    transport_arch: TransportArch,
    version: Option<HalVersion>,
}

/// Raw manifest as deserialized from TOML.
#[derive(Debug, Serialize, Deserialize)]
struct RawManifest {
    #[serde(rename = "type", default)]
    kind: ManifestType,

    #[serde(rename = "target-level", default, skip_serializing_if = "Option::is_none")]
    target_level: Option<Level>,

    #[serde(rename = "hal", default)]
    hals: Vec<RawHal>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawHal {
    #[serde(default)]
    format: HalFormat,

    name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    transport: Option<Transport>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    arch: Option<Arch>,

    #[serde(rename = "override", default, skip_serializing_if = "std::ops::Not::not")]
    override_: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    versions: Vec<HalVersion>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    fqnames: Vec<String>,

    #[serde(rename = "interface", default, skip_serializing_if = "Vec::is_empty")]
    interfaces: Vec<RawInterface>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawInterface {
    name: String,

    #[serde(default)]
    instances: Vec<String>,
}

fn hal_transport(hal: &RawHal) -> Result<TransportArch, ManifestError> {
    let arch = hal.arch.unwrap_or_default();
    let transport_arch = match hal.format {
        HalFormat::Hidl => TransportArch::new(hal.transport.unwrap_or_default(), arch),
        HalFormat::Aidl => TransportArch::new(hal.transport.unwrap_or(Transport::Aidl), arch),
        HalFormat::Native => TransportArch::new(hal.transport.unwrap_or_default(), arch),
    };

    let valid = match hal.format {
        HalFormat::Hidl => {
            transport_arch.is_valid() && transport_arch.transport != Transport::Aidl
        }
        HalFormat::Aidl => transport_arch.transport == Transport::Aidl && arch.is_empty(),
        HalFormat::Native => transport_arch == TransportArch::EMPTY,
    };
    if !valid {
        return Err(ManifestError::InvalidTransport {
            hal: hal.name.clone(),
            format: hal.format,
            transport: transport_arch,
        });
    }
    Ok(transport_arch)
}

fn convert_hal(hal: &RawHal) -> Result<Vec<ManifestInstance>, ManifestError> {
    let transport_arch = hal_transport(hal)?;
    let mut out = Vec::new();

    if hal.format == HalFormat::Aidl {
        if !hal.versions.is_empty() {
            return Err(ManifestError::UnexpectedVersion {
                hal: hal.name.clone(),
            });
        }
        for iface in &hal.interfaces {
            for instance in &iface.instances {
                let fq = FqName::aidl(&hal.name, &iface.name, Some(instance));
                out.push(ManifestInstance::new(fq, transport_arch, hal.format));
            }
        }
        for entry in &hal.fqnames {
            let full = format!("{}.{}", hal.name, entry);
            let fq: FqName = full.parse().map_err(|source| ManifestError::InvalidFqName {
                hal: hal.name.clone(),
                source,
            })?;
            if !fq.is_aidl() || fq.package() != hal.name || !fq.has_instance() {
                return Err(ManifestError::IncompleteFqName {
                    hal: hal.name.clone(),
                    fqname: entry.clone(),
                });
            }
            out.push(ManifestInstance::new(fq, transport_arch, hal.format));
        }
        return Ok(out);
    }

    for version in &hal.versions {
        for iface in &hal.interfaces {
            for instance in &iface.instances {
                let fq = FqName::hidl(&hal.name, *version, &iface.name, Some(instance));
                out.push(ManifestInstance::new(fq, transport_arch, hal.format));
            }
        }
    }

    for entry in &hal.fqnames {
        let parsed = FqName::parse_relative(entry).map_err(|source| ManifestError::InvalidFqName {
            hal: hal.name.clone(),
            source,
        })?;
        if !parsed.package().is_empty() && parsed.package() != hal.name {
            return Err(ManifestError::PackageMismatch {
                hal: hal.name.clone(),
                fqname: entry.clone(),
            });
        }
        if parsed.interface().is_none() || !parsed.has_instance() {
            return Err(ManifestError::IncompleteFqName {
                hal: hal.name.clone(),
                fqname: entry.clone(),
            });
        }
        let fq = parsed.with_package(&hal.name);
        out.push(ManifestInstance::new(fq, transport_arch, hal.format));
    }

    if out.is_empty() {
        tracing::debug!("HAL `{}` declares no interface instances", hal.name);
    }

    Ok(out)
}
