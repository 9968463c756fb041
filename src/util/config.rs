//! Configuration file support.
//!
//! Two locations are read:
//! - Global: `<config dir>/halbind/config.toml` - user-wide defaults
//! - Project: `.halbind/config.toml` - per-checkout overrides
//!
//! Project config takes precedence over global config, field by field.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::manifest::VersionPolicy;
use crate::core::transport::Bitness;

/// halbind configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory standing in for the device's `/`.
    pub root: Option<PathBuf>,

    /// System properties, e.g. `ro.boot.product.hardware.sku`.
    pub properties: BTreeMap<String, String>,

    pub caller: CallerConfig,

    pub passthrough: PassthroughConfig,

    pub bridge: BridgeConfig,

    pub versioning: VersioningConfig,
}

/// The process performing lookups.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CallerConfig {
    /// Defaults to the bitness of this process.
    pub bitness: Option<Bitness>,
}

/// Where passthrough implementation libraries live, per bitness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassthroughConfig {
    pub lib32: Vec<PathBuf>,
    pub lib64: Vec<PathBuf>,
}

impl Default for PassthroughConfig {
    fn default() -> Self {
        let dirs = |lib: &str| {
            ["odm", "vendor", "system"]
                .iter()
                .map(|partition| PathBuf::from(format!("/{}/{}/hw", partition, lib)))
                .collect()
        };
        PassthroughConfig {
            lib32: dirs("lib"),
            lib64: dirs("lib64"),
        }
    }
}

impl PassthroughConfig {
    /// Search directories for libraries of the given bitness, in priority order.
    pub fn search_dirs(&self, bitness: Bitness) -> &[PathBuf] {
        match bitness {
            Bitness::B32 => &self.lib32,
            Bitness::B64 => &self.lib64,
        }
    }
}

/// Native bridge settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Bridge library name; `"0"` disables the bridge.
    pub library: Option<String>,

    /// Guest instruction set, e.g. `arm` or `arm64`.
    pub isa: Option<String>,

    /// Application data directory; `code_cache` is created beneath it.
    pub app_data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct VersioningConfig {
    /// Whether a higher declared minor serves lower minor requests. Defaults to true.
    pub minor_forward_compatible: Option<bool>,
}

impl Config {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Load configuration with fallback to defaults if the file doesn't exist.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            Self::load(path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {}: {}", path.display(), e);
                Self::default()
            })
        } else {
            Self::default()
        }
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(&mut self, other: Config) {
        if other.root.is_some() {
            self.root = other.root;
        }
        self.properties.extend(other.properties);

        if other.caller.bitness.is_some() {
            self.caller.bitness = other.caller.bitness;
        }

        // Search paths are replaced wholesale when they differ from the defaults.
        if other.passthrough != PassthroughConfig::default() {
            self.passthrough = other.passthrough;
        }

        if other.bridge.library.is_some() {
            self.bridge.library = other.bridge.library;
        }
        if other.bridge.isa.is_some() {
            self.bridge.isa = other.bridge.isa;
        }
        if other.bridge.app_data_dir.is_some() {
            self.bridge.app_data_dir = other.bridge.app_data_dir;
        }

        if other.versioning.minor_forward_compatible.is_some() {
            self.versioning.minor_forward_compatible = other.versioning.minor_forward_compatible;
        }
    }

    pub fn version_policy(&self) -> VersionPolicy {
        VersionPolicy {
            minor_forward_compatible: self.versioning.minor_forward_compatible.unwrap_or(true),
        }
    }

    pub fn caller_bitness(&self) -> Bitness {
        self.caller.bitness.unwrap_or_else(Bitness::host)
    }
}

/// Load merged configuration from global and project locations.
///
/// Order of precedence (highest to lowest):
/// 1. Project config (.halbind/config.toml)
/// 2. Global config (<config dir>/halbind/config.toml)
/// 3. Defaults
pub fn load_config(global_path: &Path, project_path: &Path) -> Config {
    let mut config = Config::default();

    if global_path.exists() {
        config.merge(Config::load_or_default(global_path));
    }

    if project_path.exists() {
        config.merge(Config::load_or_default(project_path));
    }

    config
}

/// The global halbind config directory.
pub fn global_config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.config_dir().join("halbind"))
}

pub fn global_config_path() -> Option<PathBuf> {
    global_config_dir().map(|dir| dir.join("config.toml"))
}

pub fn project_config_path(project_root: &Path) -> PathBuf {
    project_root.join(".halbind").join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(config.root.is_none());
        assert!(config.version_policy().minor_forward_compatible);
        assert_eq!(config.caller_bitness(), Bitness::host());
        assert_eq!(
            config.passthrough.search_dirs(Bitness::B64)[0],
            PathBuf::from("/odm/lib64/hw")
        );
    }

    #[test]
    fn test_config_load() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("config.toml");

        std::fs::write(
            &config_path,
            r#"
root = "/tmp/device"

[properties]
"ro.boot.product.hardware.sku" = "sku_a"

[caller]
bitness = "32"

[bridge]
library = "libndk_translation.so"
isa = "arm"

[versioning]
minor-forward-compatible = false
"#,
        )
        .unwrap();

        let config = Config::load(&config_path).unwrap();
        assert_eq!(config.root, Some(PathBuf::from("/tmp/device")));
        assert_eq!(
            config.properties.get("ro.boot.product.hardware.sku").map(String::as_str),
            Some("sku_a")
        );
        assert_eq!(config.caller_bitness(), Bitness::B32);
        assert_eq!(config.bridge.isa.as_deref(), Some("arm"));
        assert!(!config.version_policy().minor_forward_compatible);
    }

    #[test]
    fn test_load_config_precedence() {
        let tmp = TempDir::new().unwrap();
        let global_path = tmp.path().join("global.toml");
        let project_path = tmp.path().join("project.toml");

        std::fs::write(
            &global_path,
            r#"
root = "/global/root"

[bridge]
library = "libglobal.so"
isa = "arm"
"#,
        )
        .unwrap();

        std::fs::write(
            &project_path,
            r#"
[bridge]
library = "libproject.so"
"#,
        )
        .unwrap();

        let config = load_config(&global_path, &project_path);
        assert_eq!(config.root, Some(PathBuf::from("/global/root")));
        assert_eq!(config.bridge.library.as_deref(), Some("libproject.so"));
        assert_eq!(config.bridge.isa.as_deref(), Some("arm"));
    }

    #[test]
    fn test_broken_config_falls_back_to_default() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "root = [").unwrap();
        let config = Config::load_or_default(&path);
        assert!(config.root.is_none());
    }
}
