//! Manifest-versus-matrix compatibility.

use serde::Serialize;

use crate::core::manifest::Manifest;
use crate::core::matrix::{CompatibilityMatrix, MatrixHal, MatrixInstance};
use crate::core::version::VersionRange;

/// Result of checking a manifest against a matrix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompatibilityReport {
    /// Required HALs the manifest does not serve, with the instances that are missing.
    pub missing: Vec<String>,
    /// Declared instances no matrix entry asks for.
    pub unused: Vec<String>,
}

impl CompatibilityReport {
    pub fn is_compatible(&self) -> bool {
        self.missing.is_empty()
    }
}

fn is_served(manifest: &Manifest, requirement: &MatrixInstance) -> bool {
    manifest
        .instances()
        .any(|e| e.format() == requirement.format && requirement.is_satisfied_by(e.fq_name()))
}

/// Requirements of `hal` under `range` that `manifest` does not serve.
fn unmet_for_range(
    manifest: &Manifest,
    hal: &MatrixHal,
    range: Option<VersionRange>,
) -> Vec<MatrixInstance> {
    hal.matrix_instances()
        .into_iter()
        .filter(|mi| mi.range == range)
        .filter(|mi| !is_served(manifest, mi))
        .collect()
}

/// Check every mandatory HAL of `matrix` against `manifest`.
///
/// A HAL is served when, for at least one of its version ranges, every listed
/// instance is present at a version the range accepts. A regex instance is
/// met by any one matching instance.
pub fn check_compatibility(manifest: &Manifest, matrix: &CompatibilityMatrix) -> CompatibilityReport {
    let mut report = CompatibilityReport::default();

    for hal in matrix.hals().iter().filter(|h| !h.optional) {
        let ranges: Vec<Option<VersionRange>> = if hal.versions.is_empty() {
            vec![None]
        } else {
            hal.versions.iter().copied().map(Some).collect()
        };

        let mut best: Option<Vec<MatrixInstance>> = None;
        for range in ranges {
            let unmet = unmet_for_range(manifest, hal, range);
            if unmet.is_empty() {
                best = None;
                break;
            }
            if best.as_ref().map_or(true, |b| unmet.len() < b.len()) {
                best = Some(unmet);
            }
        }

        if let Some(unmet) = best {
            for mi in unmet {
                tracing::debug!("matrix requirement `{}` is not served", mi);
                report.missing.push(mi.to_string());
            }
        }
    }

    if manifest.target_level().is_some() {
        let requirements = matrix.matrix_instances();
        for e in manifest.instances() {
            if !requirements.iter().any(|mi| mi.is_satisfied_by(e.fq_name())) {
                report.unused.push(e.description());
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    const MATRIX: &str = r#"
type = "framework"
level = 2

[[hal]]
name = "android.hardware.foo"
versions = ["1.0-1", "2.0"]

[[hal.interface]]
name = "IFoo"
instances = ["default"]

[[hal]]
name = "android.hardware.bar"
versions = ["1.0"]
optional = true

[[hal.interface]]
name = "IBar"
instances = ["default"]

[[hal]]
format = "aidl"
name = "android.hardware.power"

[[hal.interface]]
name = "IPower"
regex-instances = ["default|fast"]
"#;

    fn manifest(body: &str) -> Manifest {
        Manifest::from_toml(&format!("type = \"device\"\n{}", body), "manifest.toml").unwrap()
    }

    fn matrix() -> CompatibilityMatrix {
        CompatibilityMatrix::from_toml(MATRIX, "matrix.toml").unwrap()
    }

    const POWER: &str = r#"
[[hal]]
format = "aidl"
name = "android.hardware.power"
fqnames = ["IPower/default"]
"#;

    #[test]
    fn test_compatible_with_either_major() {
        let m = manifest(&format!(
            r#"
[[hal]]
name = "android.hardware.foo"
transport = "hwbinder"
fqnames = ["@2.0::IFoo/default"]
{}"#,
            POWER
        ));
        let report = check_compatibility(&m, &matrix());
        assert!(report.is_compatible(), "{:?}", report);
    }

    #[test]
    fn test_higher_minor_satisfies_range() {
        let m = manifest(&format!(
            r#"
[[hal]]
name = "android.hardware.foo"
transport = "hwbinder"
fqnames = ["@1.4::IFoo/default"]
{}"#,
            POWER
        ));
        assert!(check_compatibility(&m, &matrix()).is_compatible());
    }

    #[test]
    fn test_missing_required_hal() {
        let m = manifest(POWER);
        let report = check_compatibility(&m, &matrix());
        assert!(!report.is_compatible());
        assert_eq!(report.missing.len(), 1);
        assert!(report.missing[0].starts_with("android.hardware.foo@"));
    }

    #[test]
    fn test_unused_reported_with_target_level() {
        let m = Manifest::from_toml(
            &format!(
                r#"
type = "device"
target-level = 2

[[hal]]
name = "android.hardware.foo"
transport = "hwbinder"
fqnames = ["@1.0::IFoo/default", "@1.0::IFoo/extra"]
{}"#,
                POWER
            ),
            "manifest.toml",
        )
        .unwrap();
        let report = check_compatibility(&m, &matrix());
        assert!(report.is_compatible());
        assert_eq!(report.unused, vec!["android.hardware.foo@1.0::IFoo/extra".to_string()]);
    }
}
