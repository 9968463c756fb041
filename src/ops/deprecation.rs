//! Deprecation check: are HALs from older framework levels still served?
//!
//! Every HAL instance required by a matrix older than the device's target
//! level is looked up among the served instances. A served instance is
//! deprecated when the target level's matrix no longer lists it under the
//! same major version, or lists it at a newer minor version than the one
//! served.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::core::fqname::FqName;
use crate::core::manifest::{Level, Manifest};
use crate::core::matrix::{CompatibilityMatrix, MatrixInstance};
use crate::core::version::HalVersion;

/// Answers which instances of an interface are served at a version or later.
pub trait InstanceLister {
    /// `(instance, served version)` for every served instance of
    /// `package@version::interface` whose version is a same-major minor at
    /// least `version`.
    fn list_instances(&self, package: &str, version: HalVersion, interface: &str) -> Vec<(String, HalVersion)>;
}

impl InstanceLister for Manifest {
    fn list_instances(&self, package: &str, version: HalVersion, interface: &str) -> Vec<(String, HalVersion)> {
        Manifest::list_instances(self, package, version, interface)
    }
}

/// A fixed list of served instances.
#[derive(Debug, Clone, Default)]
pub struct ServedInstances(pub Vec<FqName>);

impl InstanceLister for ServedInstances {
    fn list_instances(&self, package: &str, version: HalVersion, interface: &str) -> Vec<(String, HalVersion)> {
        self.0
            .iter()
            .filter(|fq| fq.package() == package && fq.interface() == Some(interface))
            .filter_map(|fq| {
                let served = fq.version()?;
                let instance = fq.instance()?;
                served
                    .minor_at_least(&version)
                    .then(|| (instance.to_string(), served))
            })
            .collect()
    }
}

/// Inheritance of a HIDL interface, e.g. `a.b@2.0::IFoo` extending `a.b@1.0::IFoo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HidlInterfaceMetadata {
    /// `package@M.m::Interface`
    pub name: String,
    /// Interfaces `name` extends, same format.
    #[serde(default)]
    pub inherited: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeprecationStatus {
    NoDeprecatedHals,
    Deprecated,
}

/// A served instance that should no longer be served.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Deprecation {
    pub instance: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeprecationReport {
    pub target_level: Level,
    pub status: DeprecationStatus,
    pub deprecated: Vec<Deprecation>,
}

impl DeprecationReport {
    pub fn is_ok(&self) -> bool {
        self.status == DeprecationStatus::NoDeprecatedHals
    }

    /// All violations, one per line.
    pub fn message(&self) -> String {
        self.deprecated
            .iter()
            .map(|d| format!("{}: {}", d.instance, d.reason))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Interfaces that directly extend `name`.
fn children<'a>(metadata: &'a [HidlInterfaceMetadata], name: &str) -> Vec<&'a str> {
    metadata
        .iter()
        .filter(|m| m.inherited.iter().any(|i| i == name))
        .map(|m| m.name.as_str())
        .collect()
}

/// Whether some child of `parent` serving `instance` is required by `target`.
fn served_child_required(
    target: &CompatibilityMatrix,
    lister: &dyn InstanceLister,
    metadata: &[HidlInterfaceMetadata],
    parent: &str,
    instance: &str,
) -> bool {
    children(metadata, parent).into_iter().any(|child| {
        let Ok(child) = FqName::parse_relative(child) else {
            tracing::warn!("ignoring malformed interface metadata `{}`", child);
            return false;
        };
        let (Some(version), Some(interface)) = (child.version(), child.interface()) else {
            return false;
        };

        let mut required = false;
        target.for_each_instance_of_package(child.package(), |mi| {
            required = mi.interface == interface
                && mi.range.is_some_and(|r| r.contains(&version))
                && mi.match_instance(instance);
            !required
        });

        required
            && lister
                .list_instances(child.package(), version, interface)
                .iter()
                .any(|(served, _)| served == instance)
    })
}

/// Check one old requirement; returns the deprecated served instances.
fn deprecated_instances(
    old: &MatrixInstance,
    target: &CompatibilityMatrix,
    target_level: Level,
    lister: &dyn InstanceLister,
    metadata: &[HidlInterfaceMetadata],
) -> Vec<Deprecation> {
    let Some(range) = old.range else {
        return Vec::new();
    };
    let package = old.package.as_str();
    let interface = old.interface.as_str();
    let mut found = Vec::new();

    for (instance, served) in lister.list_instances(package, range.min_ver(), interface) {
        if !old.match_instance(&instance) {
            continue;
        }
        let fq = FqName::hidl(package, served, interface, Some(&instance));

        let mut target_min = None;
        target.for_each_instance_of_package(package, |mi| {
            if mi.major() == Some(served.major) && mi.interface == interface && mi.match_instance(&instance) {
                target_min = mi.range.map(|r| r.min_ver());
            }
            target_min.is_none()
        });

        match target_min {
            None => {
                let parent = fq.interface_name().to_string();
                if served_child_required(target, lister, metadata, &parent, &instance) {
                    tracing::debug!("{} is kept alive by a required child interface", fq);
                    continue;
                }
                found.push(Deprecation {
                    instance: fq.to_string(),
                    reason: format!(
                        "not in the compatibility matrix at level {}; it should not be served",
                        target_level
                    ),
                });
            }
            Some(min) => {
                let served_at_target = lister
                    .list_instances(package, min, interface)
                    .iter()
                    .any(|(served, _)| *served == instance);
                if !served_at_target {
                    found.push(Deprecation {
                        instance: fq.to_string(),
                        reason: format!(
                            "level {} requires at least {}@{}::{}/{}",
                            target_level, package, min, interface, instance
                        ),
                    });
                }
            }
        }
    }

    found
}

/// Check that no HAL deprecated at `device_level` is still served.
///
/// `matrices` are the framework matrices of every level; the one at
/// `device_level` must be among them.
pub fn check_deprecation(
    matrices: &[CompatibilityMatrix],
    device_level: Level,
    lister: &dyn InstanceLister,
    hidl_metadata: &[HidlInterfaceMetadata],
) -> Result<DeprecationReport> {
    let Some(target) = matrices.iter().find(|m| m.level() == Some(device_level)) else {
        bail!(
            "no framework compatibility matrix at level {} (the device's target level)",
            device_level
        );
    };

    let mut deprecated = Vec::new();
    for old in matrices
        .iter()
        .filter(|m| m.level().is_some_and(|l| l < device_level))
    {
        old.for_each_hidl_instance(|mi| {
            deprecated.extend(deprecated_instances(mi, target, device_level, lister, hidl_metadata));
            true
        });
    }

    deprecated.sort_by(|a, b| a.instance.cmp(&b.instance));
    deprecated.dedup_by(|a, b| a.instance == b.instance);
    for d in &deprecated {
        tracing::warn!("deprecated HAL served: {} ({})", d.instance, d.reason);
    }

    let status = if deprecated.is_empty() {
        DeprecationStatus::NoDeprecatedHals
    } else {
        DeprecationStatus::Deprecated
    };
    Ok(DeprecationReport {
        target_level: device_level,
        status,
        deprecated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixtures;

    fn matrices() -> Vec<CompatibilityMatrix> {
        vec![
            CompatibilityMatrix::from_toml(fixtures::DEPRECATION_MATRIX_1, "compatibility_matrix.1.toml").unwrap(),
            CompatibilityMatrix::from_toml(fixtures::DEPRECATION_MATRIX_2, "compatibility_matrix.2.toml").unwrap(),
        ]
    }

    fn served(names: &[&str]) -> ServedInstances {
        ServedInstances(names.iter().map(|n| n.parse().unwrap()).collect())
    }

    fn check(names: &[&str], metadata: &[HidlInterfaceMetadata]) -> DeprecationReport {
        check_deprecation(&matrices(), Level(2), &served(names), metadata).unwrap()
    }

    fn major_metadata() -> Vec<HidlInterfaceMetadata> {
        vec![HidlInterfaceMetadata {
            name: "android.hardware.major@2.0::IMajor".into(),
            inherited: vec!["android.hardware.major@1.0::IMajor".into()],
        }]
    }

    #[test]
    fn test_no_deprecated_hals() {
        let report = check(
            &[
                "android.hardware.minor@1.1::IMinor/default",
                "android.hardware.major@2.0::IMajor/default",
            ],
            &[],
        );
        assert!(report.is_ok(), "{}", report.message());
    }

    #[test]
    fn test_removed_hal_is_deprecated() {
        let report = check(
            &[
                "android.hardware.removed@1.0::IRemoved/default",
                "android.hardware.minor@1.1::IMinor/default",
                "android.hardware.major@2.0::IMajor/default",
            ],
            &[],
        );
        assert_eq!(report.status, DeprecationStatus::Deprecated);
        assert_eq!(report.deprecated.len(), 1);
        assert_eq!(
            report.deprecated[0].instance,
            "android.hardware.removed@1.0::IRemoved/default"
        );
    }

    #[test]
    fn test_old_minor_is_deprecated() {
        let report = check(
            &[
                "android.hardware.minor@1.0::IMinor/default",
                "android.hardware.major@2.0::IMajor/default",
            ],
            &[],
        );
        assert!(!report.is_ok());
        assert!(report.message().contains("android.hardware.minor@1.0::IMinor/default"));
        assert!(report.message().contains("requires at least"));
    }

    #[test]
    fn test_dropped_instance_is_deprecated() {
        let report = check(
            &[
                "android.hardware.minor@1.0::IMinor/legacy",
                "android.hardware.minor@1.1::IMinor/default",
                "android.hardware.major@2.0::IMajor/default",
            ],
            &[],
        );
        assert!(!report.is_ok());

        let report = check(
            &[
                "android.hardware.minor@1.1::IMinor/default",
                "android.hardware.minor@1.1::IMinor/legacy",
                "android.hardware.major@2.0::IMajor/default",
            ],
            &[],
        );
        assert_eq!(report.deprecated.len(), 1);
        assert_eq!(
            report.deprecated[0].instance,
            "android.hardware.minor@1.1::IMinor/legacy"
        );
    }

    #[test]
    fn test_old_major_is_deprecated() {
        let both = check(
            &[
                "android.hardware.minor@1.1::IMinor/default",
                "android.hardware.major@1.0::IMajor/default",
                "android.hardware.major@2.0::IMajor/default",
            ],
            &[],
        );
        assert!(!both.is_ok());

        let only_old = check(
            &[
                "android.hardware.minor@1.1::IMinor/default",
                "android.hardware.major@1.0::IMajor/default",
            ],
            &[],
        );
        assert!(!only_old.is_ok());
    }

    #[test]
    fn test_served_child_keeps_parent() {
        let names = [
            "android.hardware.major@1.0::IMajor/default",
            "android.hardware.major@2.0::IMajor/default",
        ];
        assert!(!check(&names, &[]).is_ok());
        assert!(check(&names, &major_metadata()).is_ok());
    }

    #[test]
    fn test_unserved_child_does_not_keep_parent() {
        let names = ["android.hardware.major@1.0::IMajor/default"];
        assert!(!check(&names, &major_metadata()).is_ok());
    }

    #[test]
    fn test_missing_target_matrix_is_an_error() {
        let err = check_deprecation(&matrices(), Level(3), &served(&[]), &[]).unwrap_err();
        assert!(err.to_string().contains("level 3"));
    }

    #[test]
    fn test_manifest_as_lister() {
        let manifest = Manifest::from_toml(
            &fixtures::device_manifest("IFoo", "1.2", false),
            "manifest.toml",
        )
        .unwrap();
        let listed = InstanceLister::list_instances(
            &manifest,
            "android.hardware.foo",
            HalVersion::new(1, 1),
            "IFoo",
        );
        assert_eq!(listed, vec![("default".to_string(), HalVersion::new(1, 2))]);
    }
}
