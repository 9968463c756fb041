//! HAL version numbers.
//!
//! HAL interfaces are versioned `major.minor`. A minor bump is a backwards
//! compatible extension; a major bump is a new, independent interface.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Error returned when a version or version range fails to parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionParseError {
    #[error("empty version")]
    Empty,

    #[error("version `{0}` must have the form MAJOR.MINOR")]
    Malformed(String),

    #[error("version component `{0}` is not a number")]
    NotANumber(String),

    #[error("version range `{0}` has a maximum minor below its minimum")]
    InvertedRange(String),
}

/// A `major.minor` HAL version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HalVersion {
    pub major: u32,
    pub minor: u32,
}

impl HalVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        HalVersion { major, minor }
    }

    /// Whether `self` can stand in for `requested`: same major, minor at least as high.
    pub fn minor_at_least(&self, requested: &HalVersion) -> bool {
        self.major == requested.major && self.minor >= requested.minor
    }
}

impl fmt::Display for HalVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

fn parse_component(s: &str) -> Result<u32, VersionParseError> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(VersionParseError::NotANumber(s.to_string()));
    }
    s.parse()
        .map_err(|_| VersionParseError::NotANumber(s.to_string()))
}

impl FromStr for HalVersion {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(VersionParseError::Empty);
        }
        let (major, minor) = s
            .split_once('.')
            .ok_or_else(|| VersionParseError::Malformed(s.to_string()))?;
        Ok(HalVersion {
            major: parse_component(major)?,
            minor: parse_component(minor)?,
        })
    }
}

impl Serialize for HalVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for HalVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A contiguous range of minor versions within one major: `1.0-2`.
///
/// `1.3` is the range containing only `1.3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionRange {
    pub major: u32,
    pub min_minor: u32,
    pub max_minor: u32,
}

impl VersionRange {
    pub const fn new(major: u32, min_minor: u32, max_minor: u32) -> Self {
        VersionRange {
            major,
            min_minor,
            max_minor,
        }
    }

    pub const fn exact(version: HalVersion) -> Self {
        VersionRange::new(version.major, version.minor, version.minor)
    }

    pub fn min_ver(&self) -> HalVersion {
        HalVersion::new(self.major, self.min_minor)
    }

    pub fn max_ver(&self) -> HalVersion {
        HalVersion::new(self.major, self.max_minor)
    }

    pub fn is_single_version(&self) -> bool {
        self.min_minor == self.max_minor
    }

    /// Whether `version` falls inside the range.
    pub fn contains(&self, version: &HalVersion) -> bool {
        self.major == version.major
            && self.min_minor <= version.minor
            && version.minor <= self.max_minor
    }

    /// Whether a HAL served at `version` satisfies this requirement.
    ///
    /// A served minor above the range still satisfies it, because minor
    /// versions extend their predecessors.
    pub fn supported_by(&self, version: &HalVersion) -> bool {
        self.major == version.major && version.minor >= self.min_minor
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_single_version() {
            write!(f, "{}.{}", self.major, self.min_minor)
        } else {
            write!(f, "{}.{}-{}", self.major, self.min_minor, self.max_minor)
        }
    }
}

impl FromStr for VersionRange {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('-') {
            None => Ok(VersionRange::exact(s.parse()?)),
            Some((base, max)) => {
                let min: HalVersion = base.parse()?;
                let max_minor = parse_component(max)?;
                if max_minor < min.minor {
                    return Err(VersionParseError::InvertedRange(s.to_string()));
                }
                Ok(VersionRange::new(min.major, min.minor, max_minor))
            }
        }
    }
}

impl Serialize for VersionRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionRange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version() {
        assert_eq!("1.0".parse::<HalVersion>().unwrap(), HalVersion::new(1, 0));
        assert_eq!("12.34".parse::<HalVersion>().unwrap(), HalVersion::new(12, 34));
        assert!("1".parse::<HalVersion>().is_err());
        assert!("1.x".parse::<HalVersion>().is_err());
        assert!("".parse::<HalVersion>().is_err());
        assert!("1.-1".parse::<HalVersion>().is_err());
        assert!(".1".parse::<HalVersion>().is_err());
    }

    #[test]
    fn test_minor_at_least() {
        let v11 = HalVersion::new(1, 1);
        assert!(v11.minor_at_least(&HalVersion::new(1, 0)));
        assert!(v11.minor_at_least(&HalVersion::new(1, 1)));
        assert!(!v11.minor_at_least(&HalVersion::new(1, 2)));
        assert!(!v11.minor_at_least(&HalVersion::new(2, 0)));
    }

    #[test]
    fn test_parse_range() {
        let range: VersionRange = "1.0-2".parse().unwrap();
        assert_eq!(range, VersionRange::new(1, 0, 2));
        assert_eq!(range.to_string(), "1.0-2");
        assert!(range.contains(&HalVersion::new(1, 1)));
        assert!(!range.contains(&HalVersion::new(1, 3)));
        assert!(range.supported_by(&HalVersion::new(1, 3)));

        let single: VersionRange = "2.0".parse().unwrap();
        assert!(single.is_single_version());
        assert_eq!(single.to_string(), "2.0");

        assert!("1.3-1".parse::<VersionRange>().is_err());
    }
}
