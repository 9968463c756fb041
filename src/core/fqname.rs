//! Fully-qualified HAL interface names.
//!
//! HIDL names look like `android.hardware.vibrator@1.0::IVibrator/default`.
//! AIDL names carry no version: `android.hardware.vibrator.IVibrator/default`.
//! Any trailing part may be omitted (`android.hardware.vibrator@1.0` names a
//! package version, `android.hardware.vibrator` a package).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::core::version::HalVersion;

/// Why a string is not a valid [`FqName`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FqNameError {
    #[error("missing package in `{0}`")]
    MissingPackage(String),

    #[error("invalid package `{package}` in `{input}`")]
    InvalidPackage { input: String, package: String },

    #[error("missing or malformed version in `{0}`")]
    InvalidVersion(String),

    #[error("invalid interface name in `{0}`")]
    InvalidInterface(String),

    #[error("empty instance name in `{0}`")]
    EmptyInstance(String),

    #[error("an instance needs an interface in `{0}`")]
    InstanceWithoutInterface(String),

    #[error("`::` requires a version in `{0}`")]
    MissingVersion(String),
}

/// A parsed `package@major.minor::Interface/instance` name.
///
/// Immutable once parsed. The package is empty only for names produced by
/// [`FqName::parse_relative`], which are completed with [`FqName::with_package`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FqName {
    package: String,
    version: Option<HalVersion>,
    interface: Option<String>,
    instance: Option<String>,
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_valid_package(s: &str) -> bool {
    !s.is_empty() && s.split('.').all(is_identifier)
}

/// AIDL interface names follow the `IFoo` convention.
fn looks_like_interface(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some('I'), Some(c)) if c.is_ascii_uppercase()
    ) && is_identifier(s)
}

impl FqName {
    /// Build a HIDL name from parts.
    pub fn hidl(
        package: impl Into<String>,
        version: HalVersion,
        interface: impl Into<String>,
        instance: Option<&str>,
    ) -> Self {
        FqName {
            package: package.into(),
            version: Some(version),
            interface: Some(interface.into()),
            instance: instance.map(str::to_string),
        }
    }

    /// Build an AIDL name from parts.
    pub fn aidl(
        package: impl Into<String>,
        interface: impl Into<String>,
        instance: Option<&str>,
    ) -> Self {
        FqName {
            package: package.into(),
            version: None,
            interface: Some(interface.into()),
            instance: instance.map(str::to_string),
        }
    }

    /// Parse a name, returning `None` when it is malformed.
    pub fn parse(s: &str) -> Option<FqName> {
        s.parse().ok()
    }

    /// Parse a name that may omit the package (`@1.0::IFoo/default`).
    pub fn parse_relative(s: &str) -> Result<FqName, FqNameError> {
        Self::parse_inner(s, true)
    }

    fn parse_inner(input: &str, allow_empty_package: bool) -> Result<FqName, FqNameError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(FqNameError::MissingPackage(input.to_string()));
        }

        if let Some((package, rest)) = trimmed.split_once('@') {
            if package.is_empty() && !allow_empty_package {
                return Err(FqNameError::MissingPackage(input.to_string()));
            }
            if !package.is_empty() && !is_valid_package(package) {
                return Err(FqNameError::InvalidPackage {
                    input: input.to_string(),
                    package: package.to_string(),
                });
            }

            let (version_str, tail) = match rest.split_once("::") {
                Some((v, t)) => (v, Some(t)),
                None => (rest, None),
            };
            let version: HalVersion = version_str
                .parse()
                .map_err(|_| FqNameError::InvalidVersion(input.to_string()))?;

            let (interface, instance) = match tail {
                None => (None, None),
                Some(t) => {
                    let (iface, inst) = split_instance(t, input)?;
                    if !is_identifier(iface) {
                        return Err(FqNameError::InvalidInterface(input.to_string()));
                    }
                    (Some(iface.to_string()), inst)
                }
            };

            return Ok(FqName {
                package: package.to_string(),
                version: Some(version),
                interface,
                instance,
            });
        }

        if trimmed.contains("::") {
            return Err(FqNameError::MissingVersion(input.to_string()));
        }

        let (name, instance) = split_instance(trimmed, input)?;
        match name.rsplit_once('.') {
            Some((package, iface)) if looks_like_interface(iface) => {
                if !is_valid_package(package) {
                    return Err(FqNameError::InvalidPackage {
                        input: input.to_string(),
                        package: package.to_string(),
                    });
                }
                Ok(FqName {
                    package: package.to_string(),
                    version: None,
                    interface: Some(iface.to_string()),
                    instance,
                })
            }
            _ => {
                if instance.is_some() {
                    return Err(FqNameError::InstanceWithoutInterface(input.to_string()));
                }
                if !is_valid_package(name) {
                    return Err(FqNameError::InvalidPackage {
                        input: input.to_string(),
                        package: name.to_string(),
                    });
                }
                Ok(FqName {
                    package: name.to_string(),
                    version: None,
                    interface: None,
                    instance: None,
                })
            }
        }
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn version(&self) -> Option<HalVersion> {
        self.version
    }

    /// Same as [`FqName::version`]; kept for callers used to `getVersion()`.
    pub fn get_version(&self) -> Option<HalVersion> {
        self.version
    }

    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    pub fn instance(&self) -> Option<&str> {
        self.instance.as_deref()
    }

    pub fn has_version(&self) -> bool {
        self.version.is_some()
    }

    pub fn has_instance(&self) -> bool {
        self.instance.is_some()
    }

    /// An AIDL name has an interface but no version.
    pub fn is_aidl(&self) -> bool {
        self.version.is_none() && self.interface.is_some()
    }

    /// Package and interface are known, and HIDL names carry a version.
    pub fn is_fully_qualified(&self) -> bool {
        !self.package.is_empty() && self.interface.is_some()
    }

    /// `package@major.minor`, or just the package for AIDL names.
    pub fn package_and_version(&self) -> String {
        match self.version {
            Some(v) => format!("{}@{}", self.package, v),
            None => self.package.clone(),
        }
    }

    /// The name without its instance (`package@1.0::IFoo`).
    pub fn interface_name(&self) -> FqName {
        FqName {
            instance: None,
            ..self.clone()
        }
    }

    pub fn with_instance(&self, instance: impl Into<String>) -> FqName {
        FqName {
            instance: Some(instance.into()),
            ..self.clone()
        }
    }

    pub fn with_package(&self, package: impl Into<String>) -> FqName {
        FqName {
            package: package.into(),
            ..self.clone()
        }
    }

    pub fn with_version(&self, version: HalVersion) -> FqName {
        FqName {
            version: Some(version),
            ..self.clone()
        }
    }
}

fn split_instance<'a>(
    s: &'a str,
    input: &str,
) -> Result<(&'a str, Option<String>), FqNameError> {
    match s.split_once('/') {
        None => Ok((s, None)),
        Some((_, inst)) if inst.is_empty() || inst.chars().any(char::is_whitespace) => {
            Err(FqNameError::EmptyInstance(input.to_string()))
        }
        Some((name, inst)) => Ok((name, Some(inst.to_string()))),
    }
}

impl FromStr for FqName {
    type Err = FqNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FqName::parse_inner(s, false)
    }
}

impl fmt::Display for FqName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.package)?;
        if let Some(version) = self.version {
            write!(f, "@{}", version)?;
        }
        if let Some(ref interface) = self.interface {
            if self.version.is_some() {
                write!(f, "::{}", interface)?;
            } else {
                write!(f, ".{}", interface)?;
            }
        }
        if let Some(ref instance) = self.instance {
            write!(f, "/{}", instance)?;
        }
        Ok(())
    }
}

impl Serialize for FqName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FqName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_hidl_name() {
        let fq = FqName::parse("android.hardware.vibrator@1.0::IVibrator/default").unwrap();
        assert_eq!(fq.package(), "android.hardware.vibrator");
        assert_eq!(fq.version(), Some(HalVersion::new(1, 0)));
        assert_eq!(fq.interface(), Some("IVibrator"));
        assert_eq!(fq.instance(), Some("default"));
        assert!(fq.has_version());
        assert!(fq.is_fully_qualified());
        assert!(!fq.is_aidl());
    }

    #[test]
    fn test_canonical_round_trip() {
        for s in [
            "android.hardware.vibrator@1.0::IVibrator/default",
            "android.hardware.camera@3.5::ICamera/legacy/0",
            "android.hardware.foo@2.1::IFoo",
            "android.hardware.foo@2.1",
            "android.hardware.foo",
            "android.hardware.power.IPower/default",
            "android.hardware.power.IPower",
        ] {
            assert_eq!(FqName::parse(s).unwrap().to_string(), s);
        }
    }

    #[test]
    fn test_parse_aidl_name() {
        let fq = FqName::parse("android.hardware.power.IPower/default").unwrap();
        assert_eq!(fq.package(), "android.hardware.power");
        assert_eq!(fq.interface(), Some("IPower"));
        assert_eq!(fq.instance(), Some("default"));
        assert!(fq.is_aidl());
        assert!(fq.is_fully_qualified());
        assert!(!fq.has_version());
    }

    #[test]
    fn test_parse_package_only() {
        let fq = FqName::parse("android.hardware.foo").unwrap();
        assert_eq!(fq.interface(), None);
        assert!(!fq.is_fully_qualified());
    }

    #[test]
    fn test_malformed_names_fail_without_panicking() {
        for s in [
            "",
            "@1.0::IFoo/default",
            "android.hardware.foo@",
            "android.hardware.foo@1",
            "android.hardware.foo@a.b::IFoo",
            "android.hardware.foo@1.0::",
            "android.hardware.foo@1.0::IFoo/",
            "android.hardware.foo::IFoo/default",
            "android..hardware@1.0",
            "android.hardware.foo/default",
            "1android.hardware@1.0",
        ] {
            assert!(FqName::parse(s).is_none(), "`{}` should not parse", s);
        }
    }

    #[test]
    fn test_parse_error_kinds() {
        assert!(matches!(
            "foo@x.0".parse::<FqName>(),
            Err(FqNameError::InvalidVersion(_))
        ));
        assert!(matches!(
            "foo::IFoo".parse::<FqName>(),
            Err(FqNameError::MissingVersion(_))
        ));
        assert!(matches!(
            "@1.0::IFoo".parse::<FqName>(),
            Err(FqNameError::MissingPackage(_))
        ));
    }

    #[test]
    fn test_parse_relative() {
        let fq = FqName::parse_relative("@1.1::IFoo/default").unwrap();
        assert_eq!(fq.package(), "");
        assert!(!fq.is_fully_qualified());

        let full = fq.with_package("android.hardware.foo");
        assert_eq!(full.to_string(), "android.hardware.foo@1.1::IFoo/default");
        assert!(full.is_fully_qualified());
    }

    #[test]
    fn test_derived_names() {
        let fq = FqName::parse("android.hardware.foo@1.0::IFoo/default").unwrap();
        assert_eq!(fq.package_and_version(), "android.hardware.foo@1.0");
        assert_eq!(fq.interface_name().to_string(), "android.hardware.foo@1.0::IFoo");
        assert_eq!(
            fq.with_instance("other").to_string(),
            "android.hardware.foo@1.0::IFoo/other"
        );
    }
}
