//! Transport, architecture and format of a declared HAL.

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// How callers reach a HAL implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Transport {
    /// Declared absent. Lookups return this when nothing matches.
    #[default]
    Empty,
    /// Cross-process, through hwservicemanager.
    Hwbinder,
    /// Same-process: the implementation library is loaded into the caller.
    Passthrough,
    /// Cross-process, through servicemanager.
    Aidl,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Empty => "",
            Transport::Hwbinder => "hwbinder",
            Transport::Passthrough => "passthrough",
            Transport::Aidl => "aidl",
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Transport::Empty)
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for unknown transport, arch or format strings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} `{value}`")]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for Transport {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "empty" => Ok(Transport::Empty),
            "hwbinder" => Ok(Transport::Hwbinder),
            "passthrough" => Ok(Transport::Passthrough),
            "aidl" => Ok(Transport::Aidl),
            _ => Err(UnknownValue {
                kind: "transport",
                value: s.to_string(),
            }),
        }
    }
}

bitflags! {
    /// Bitness a passthrough implementation is built for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
    pub struct Arch: u8 {
        const B32 = 0b01;
        const B64 = 0b10;
    }
}

impl Arch {
    pub fn contains_bitness(&self, bitness: Bitness) -> bool {
        self.contains(bitness.as_arch())
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match (self.contains(Arch::B32), self.contains(Arch::B64)) {
            (true, true) => "32+64",
            (true, false) => "32",
            (false, true) => "64",
            (false, false) => "",
        };
        f.write_str(s)
    }
}

impl FromStr for Arch {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Ok(Arch::empty()),
            "32" => Ok(Arch::B32),
            "64" => Ok(Arch::B64),
            "32+64" | "64+32" => Ok(Arch::B32 | Arch::B64),
            _ => Err(UnknownValue {
                kind: "arch",
                value: s.to_string(),
            }),
        }
    }
}

/// Pointer width of a process or library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bitness {
    #[serde(rename = "32")]
    B32,
    #[serde(rename = "64")]
    B64,
}

impl Bitness {
    /// Bitness of the running process.
    pub fn host() -> Self {
        if cfg!(target_pointer_width = "64") {
            Bitness::B64
        } else {
            Bitness::B32
        }
    }

    pub fn as_arch(&self) -> Arch {
        match self {
            Bitness::B32 => Arch::B32,
            Bitness::B64 => Arch::B64,
        }
    }

    pub fn other(&self) -> Bitness {
        match self {
            Bitness::B32 => Bitness::B64,
            Bitness::B64 => Bitness::B32,
        }
    }
}

impl fmt::Display for Bitness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bitness::B32 => write!(f, "32"),
            Bitness::B64 => write!(f, "64"),
        }
    }
}

/// Declared transport plus, for passthrough HALs, the bitness it is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TransportArch {
    pub transport: Transport,
    pub arch: Arch,
}

impl TransportArch {
    pub const EMPTY: TransportArch = TransportArch {
        transport: Transport::Empty,
        arch: Arch::empty(),
    };

    pub fn new(transport: Transport, arch: Arch) -> Self {
        TransportArch { transport, arch }
    }

    /// Passthrough needs an arch; every other active transport must not have one.
    pub fn is_valid(&self) -> bool {
        match self.transport {
            Transport::Empty => false,
            Transport::Passthrough => !self.arch.is_empty(),
            Transport::Hwbinder | Transport::Aidl => self.arch.is_empty(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.transport.is_empty()
    }
}

impl fmt::Display for TransportArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.arch.is_empty() {
            write!(f, "{}", self.transport)
        } else {
            write!(f, "{} ({}-bit)", self.transport, self.arch)
        }
    }
}

/// Interface definition language a HAL is described in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum HalFormat {
    #[default]
    Hidl,
    Aidl,
    Native,
}

impl HalFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            HalFormat::Hidl => "hidl",
            HalFormat::Aidl => "aidl",
            HalFormat::Native => "native",
        }
    }
}

impl fmt::Display for HalFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HalFormat {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hidl" => Ok(HalFormat::Hidl),
            "aidl" => Ok(HalFormat::Aidl),
            "native" => Ok(HalFormat::Native),
            _ => Err(UnknownValue {
                kind: "format",
                value: s.to_string(),
            }),
        }
    }
}

macro_rules! string_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

string_serde!(Transport);
string_serde!(Arch);
string_serde!(HalFormat);
