//! Compatibility matrices.
//!
//! A matrix lists the HALs one side requires from the other. Framework
//! matrices are versioned by FCM level and combined for a device's target
//! level before checks run.
//!
//! ```toml
//! type = "framework"
//! level = 3
//!
//! [[hal]]
//! name = "android.hardware.foo"
//! versions = ["1.0-2"]
//! optional = false
//!
//! [[hal.interface]]
//! name = "IFoo"
//! instances = ["default"]
//! regex-instances = ["vendor[0-9]+"]
//! ```

use std::fmt;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::fqname::FqName;
use crate::core::manifest::{Level, ManifestType};
use crate::core::transport::HalFormat;
use crate::core::version::VersionRange;
use crate::util::diagnostic::ManifestSyntaxError;

#[derive(Debug, Error)]
pub enum MatrixError {
    #[error("HAL `{hal}`: invalid regex instance `{pattern}`")]
    InvalidRegex {
        hal: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("HIDL HAL `{0}` in a matrix must list at least one version range")]
    MissingVersions(String),

    #[error("no compatibility matrix at level {0}")]
    NoMatrixAtLevel(Level),
}

/// How a matrix names the instances it requires.
#[derive(Debug, Clone)]
pub enum InstancePattern {
    Exact(String),
    /// Anchored: must match the whole instance name.
    Regex { pattern: String, regex: Regex },
}

impl InstancePattern {
    pub fn regex(hal: &str, pattern: &str) -> Result<Self, MatrixError> {
        let regex = Regex::new(&format!("^(?:{})$", pattern)).map_err(|source| {
            MatrixError::InvalidRegex {
                hal: hal.to_string(),
                pattern: pattern.to_string(),
                source,
            }
        })?;
        Ok(InstancePattern::Regex {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, instance: &str) -> bool {
        match self {
            InstancePattern::Exact(name) => name == instance,
            InstancePattern::Regex { regex, .. } => regex.is_match(instance),
        }
    }

    pub fn is_regex(&self) -> bool {
        matches!(self, InstancePattern::Regex { .. })
    }

    pub fn as_str(&self) -> &str {
        match self {
            InstancePattern::Exact(name) => name,
            InstancePattern::Regex { pattern, .. } => pattern,
        }
    }
}

impl PartialEq for InstancePattern {
    fn eq(&self, other: &Self) -> bool {
        self.is_regex() == other.is_regex() && self.as_str() == other.as_str()
    }
}

impl Eq for InstancePattern {}

impl fmt::Display for InstancePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstancePattern::Exact(name) => write!(f, "{}", name),
            InstancePattern::Regex { pattern, .. } => write!(f, "/{}/", pattern),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixInterface {
    pub name: String,
    pub instances: Vec<InstancePattern>,
}

/// One `[[hal]]` requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixHal {
    pub format: HalFormat,
    pub name: String,
    /// Empty for AIDL HALs.
    pub versions: Vec<VersionRange>,
    pub optional: bool,
    pub interfaces: Vec<MatrixInterface>,
}

impl MatrixHal {
    /// Flatten into one [`MatrixInstance`] per `(range, interface, instance)`.
    pub fn matrix_instances(&self) -> Vec<MatrixInstance> {
        let ranges: Vec<Option<VersionRange>> = if self.versions.is_empty() {
            vec![None]
        } else {
            self.versions.iter().copied().map(Some).collect()
        };

        let mut out = Vec::new();
        for range in ranges {
            for iface in &self.interfaces {
                for pattern in &iface.instances {
                    out.push(MatrixInstance {
                        format: self.format,
                        package: self.name.clone(),
                        range,
                        interface: iface.name.clone(),
                        instance: pattern.clone(),
                        optional: self.optional,
                    });
                }
            }
        }
        out
    }

    fn has_instance(&self, interface: &str, pattern: &InstancePattern) -> bool {
        self.interfaces
            .iter()
            .any(|i| i.name == interface && i.instances.contains(pattern))
    }
}

/// A single required `(package, range, interface, instance)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixInstance {
    pub format: HalFormat,
    pub package: String,
    /// `None` for AIDL.
    pub range: Option<VersionRange>,
    pub interface: String,
    pub instance: InstancePattern,
    pub optional: bool,
}

impl MatrixInstance {
    pub fn match_instance(&self, name: &str) -> bool {
        self.instance.matches(name)
    }

    /// Whether a served `fq_name` satisfies this requirement.
    pub fn is_satisfied_by(&self, fq_name: &FqName) -> bool {
        if fq_name.package() != self.package || fq_name.interface() != Some(self.interface.as_str()) {
            return false;
        }
        if !fq_name.instance().is_some_and(|i| self.match_instance(i)) {
            return false;
        }
        match (self.range, fq_name.version()) {
            (Some(range), Some(version)) => range.supported_by(&version),
            (None, None) => self.format == HalFormat::Aidl,
            _ => false,
        }
    }

    pub fn major(&self) -> Option<u32> {
        self.range.map(|r| r.major)
    }
}

impl fmt::Display for MatrixInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.range {
            Some(range) => write!(
                f,
                "{}@{}::{}/{}",
                self.package, range, self.interface, self.instance
            ),
            None => write!(f, "{}.{}/{}", self.package, self.interface, self.instance),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompatibilityMatrix {
    kind: ManifestType,
    level: Option<Level>,
    hals: Vec<MatrixHal>,
}

impl CompatibilityMatrix {
    pub fn new(kind: ManifestType, level: Option<Level>) -> Self {
        CompatibilityMatrix {
            kind,
            level,
            hals: Vec::new(),
        }
    }

    pub fn with_hal(mut self, hal: MatrixHal) -> Self {
        self.hals.push(hal);
        self
    }

    pub fn kind(&self) -> ManifestType {
        self.kind
    }

    pub fn level(&self) -> Option<Level> {
        self.level
    }

    pub fn hals(&self) -> &[MatrixHal] {
        &self.hals
    }

    /// Visit every HIDL requirement; stops early when `f` returns false.
    ///
    /// Returns false if iteration was stopped.
    pub fn for_each_hidl_instance(&self, mut f: impl FnMut(&MatrixInstance) -> bool) -> bool {
        for hal in self.hals.iter().filter(|h| h.format == HalFormat::Hidl) {
            for instance in hal.matrix_instances() {
                if !f(&instance) {
                    return false;
                }
            }
        }
        true
    }

    /// Visit every requirement of `package`; stops early when `f` returns false.
    pub fn for_each_instance_of_package(
        &self,
        package: &str,
        mut f: impl FnMut(&MatrixInstance) -> bool,
    ) -> bool {
        for hal in self.hals.iter().filter(|h| h.name == package) {
            for instance in hal.matrix_instances() {
                if !f(&instance) {
                    return false;
                }
            }
        }
        true
    }

    /// All requirements, flattened.
    pub fn matrix_instances(&self) -> Vec<MatrixInstance> {
        self.hals.iter().flat_map(|h| h.matrix_instances()).collect()
    }

    /// Combine the framework matrices relevant to a device at `target`.
    ///
    /// Matrices below `target` are dropped. HALs of the matrix at `target`
    /// keep their `optional` flag; anything only required by a later level,
    /// or by a matrix without a level, becomes optional.
    pub fn combine(target: Level, matrices: &[CompatibilityMatrix]) -> Result<Self, MatrixError> {
        let base = matrices
            .iter()
            .find(|m| m.level == Some(target))
            .ok_or(MatrixError::NoMatrixAtLevel(target))?;

        let mut combined = CompatibilityMatrix {
            kind: base.kind,
            level: Some(target),
            hals: base.hals.clone(),
        };

        let mut later: Vec<&CompatibilityMatrix> = matrices
            .iter()
            .filter(|m| m.level.is_some_and(|l| l > target))
            .collect();
        later.sort_by_key(|m| m.level);
        later.extend(matrices.iter().filter(|m| m.level.is_none()));

        for matrix in later {
            tracing::debug!(
                "combining matrix at level {} as optional",
                matrix.level.map_or_else(|| "unspecified".to_string(), |l| l.to_string())
            );
            for hal in &matrix.hals {
                combined.add_as_optional(hal);
            }
        }

        Ok(combined)
    }

    fn add_as_optional(&mut self, hal: &MatrixHal) {
        let ranges: Vec<Option<VersionRange>> = if hal.versions.is_empty() {
            vec![None]
        } else {
            hal.versions.iter().copied().map(Some).collect()
        };

        for range in ranges {
            let existing = self.hals.iter_mut().find(|e| {
                e.format == hal.format
                    && e.name == hal.name
                    && match range {
                        Some(r) => e.versions.iter().any(|v| v.major == r.major),
                        None => e.versions.is_empty(),
                    }
            });

            let Some(existing) = existing else {
                self.hals.push(MatrixHal {
                    format: hal.format,
                    name: hal.name.clone(),
                    versions: range.into_iter().collect(),
                    optional: true,
                    interfaces: hal.interfaces.clone(),
                });
                continue;
            };

            if let Some(r) = range {
                for v in existing.versions.iter_mut().filter(|v| v.major == r.major) {
                    v.max_minor = v.max_minor.max(r.max_minor);
                }
            }

            let mut missing = Vec::new();
            for iface in &hal.interfaces {
                let instances: Vec<InstancePattern> = iface
                    .instances
                    .iter()
                    .filter(|p| !existing.has_instance(&iface.name, p))
                    .cloned()
                    .collect();
                if !instances.is_empty() {
                    missing.push(MatrixInterface {
                        name: iface.name.clone(),
                        instances,
                    });
                }
            }
            if !missing.is_empty() {
                self.hals.push(MatrixHal {
                    format: hal.format,
                    name: hal.name.clone(),
                    versions: range.into_iter().collect(),
                    optional: true,
                    interfaces: missing,
                });
            }
        }
    }

    pub fn from_toml(content: &str, origin: &str) -> Result<Self> {
        let raw: RawMatrix = toml::from_str(content)
            .map_err(|e| ManifestSyntaxError::from_toml(origin, content, &e))?;
        Self::from_raw(raw).with_context(|| format!("invalid compatibility matrix {}", origin))
    }

    fn from_raw(raw: RawMatrix) -> Result<Self, MatrixError> {
        let mut hals = Vec::with_capacity(raw.hals.len());
        for hal in raw.hals {
            if hal.format == HalFormat::Hidl && hal.versions.is_empty() {
                return Err(MatrixError::MissingVersions(hal.name));
            }
            let mut interfaces = Vec::new();
            for iface in hal.interfaces {
                let mut instances: Vec<InstancePattern> = iface
                    .instances
                    .into_iter()
                    .map(InstancePattern::Exact)
                    .collect();
                for pattern in &iface.regex_instances {
                    instances.push(InstancePattern::regex(&hal.name, pattern)?);
                }
                interfaces.push(MatrixInterface {
                    name: iface.name,
                    instances,
                });
            }
            hals.push(MatrixHal {
                format: hal.format,
                name: hal.name,
                versions: hal.versions,
                optional: hal.optional,
                interfaces,
            });
        }

        Ok(CompatibilityMatrix {
            kind: raw.kind,
            level: raw.level,
            hals,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RawMatrix {
    #[serde(rename = "type", default = "framework")]
    kind: ManifestType,

    #[serde(default)]
    level: Option<Level>,

    #[serde(rename = "hal", default)]
    hals: Vec<RawMatrixHal>,
}

fn framework() -> ManifestType {
    ManifestType::Framework
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawMatrixHal {
    #[serde(default)]
    format: HalFormat,

    name: String,

    #[serde(default)]
    versions: Vec<VersionRange>,

    #[serde(default)]
    optional: bool,

    #[serde(rename = "interface", default)]
    interfaces: Vec<RawMatrixInterface>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawMatrixInterface {
    name: String,

    #[serde(default)]
    instances: Vec<String>,

    #[serde(default)]
    regex_instances: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::version::HalVersion;

    fn matrix(level: u32, body: &str) -> CompatibilityMatrix {
        let content = format!("type = \"framework\"\nlevel = {}\n{}", level, body);
        CompatibilityMatrix::from_toml(&content, "matrix.toml").unwrap()
    }

    const FOO_1: &str = r#"
[[hal]]
name = "android.hardware.foo"
versions = ["1.0-1"]

[[hal.interface]]
name = "IFoo"
instances = ["default"]
regex-instances = ["vendor[0-9]+"]
"#;

    #[test]
    fn test_parse_and_flatten() {
        let m = matrix(1, FOO_1);
        assert_eq!(m.level(), Some(Level(1)));
        let instances = m.matrix_instances();
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].to_string(), "android.hardware.foo@1.0-1::IFoo/default");
        assert!(instances[1].instance.is_regex());
    }

    #[test]
    fn test_regex_matches_whole_name() {
        let m = matrix(1, FOO_1);
        let regex = &m.matrix_instances()[1];
        assert!(regex.match_instance("vendor7"));
        assert!(!regex.match_instance("vendor7x"));
        assert!(!regex.match_instance("xvendor7"));
    }

    #[test]
    fn test_is_satisfied_by() {
        let m = matrix(1, FOO_1);
        let req = &m.matrix_instances()[0];
        let served = |v: &str| FqName::parse(&format!("android.hardware.foo@{}::IFoo/default", v)).unwrap();
        assert!(req.is_satisfied_by(&served("1.0")));
        assert!(req.is_satisfied_by(&served("1.5")));
        assert!(!req.is_satisfied_by(&served("2.0")));
        assert!(!req.is_satisfied_by(&FqName::hidl(
            "android.hardware.foo",
            HalVersion::new(1, 0),
            "IFoo",
            Some("other")
        )));
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let content = r#"
[[hal]]
name = "android.hardware.foo"
versions = ["1.0"]

[[hal.interface]]
name = "IFoo"
regex-instances = ["(unclosed"]
"#;
        let err = CompatibilityMatrix::from_toml(content, "bad.toml").unwrap_err();
        assert!(format!("{:#}", err).contains("invalid regex instance"));
    }

    #[test]
    fn test_combine_marks_later_levels_optional() {
        let m1 = matrix(1, FOO_1);
        let m2 = matrix(
            2,
            r#"
[[hal]]
name = "android.hardware.foo"
versions = ["1.0-2", "2.0"]

[[hal.interface]]
name = "IFoo"
instances = ["default"]

[[hal]]
name = "android.hardware.bar"
versions = ["1.0"]

[[hal.interface]]
name = "IBar"
instances = ["default"]
"#,
        );
        let m0 = matrix(0, FOO_1);

        let combined = CompatibilityMatrix::combine(Level(1), &[m0, m2, m1]).unwrap();
        assert_eq!(combined.level(), Some(Level(1)));

        let foo = &combined.hals()[0];
        assert!(!foo.optional);
        assert_eq!(foo.versions, vec![VersionRange::new(1, 0, 2)]);

        let foo2 = combined
            .hals()
            .iter()
            .find(|h| h.versions == vec![VersionRange::new(2, 0, 0)])
            .unwrap();
        assert!(foo2.optional);

        let bar = combined
            .hals()
            .iter()
            .find(|h| h.name == "android.hardware.bar")
            .unwrap();
        assert!(bar.optional);
    }

    #[test]
    fn test_combine_needs_target_level() {
        let m1 = matrix(1, FOO_1);
        let err = CompatibilityMatrix::combine(Level(5), &[m1]).unwrap_err();
        assert!(matches!(err, MatrixError::NoMatrixAtLevel(Level(5))));
    }

    #[test]
    fn test_for_each_stops_early() {
        let m = matrix(1, FOO_1);
        let mut seen = 0;
        let completed = m.for_each_hidl_instance(|_| {
            seen += 1;
            false
        });
        assert!(!completed);
        assert_eq!(seen, 1);
    }
}
