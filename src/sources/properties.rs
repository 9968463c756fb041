//! System property access.

use std::collections::BTreeMap;

/// Product SKU, selects `manifest_<sku>.toml` on the ODM partition.
pub const SKU_PROPERTY: &str = "ro.boot.product.hardware.sku";

pub trait PropertyFetcher: Send + Sync {
    fn get_property(&self, name: &str) -> Option<String>;

    /// The property, or `default` when unset or empty.
    fn get_property_or(&self, name: &str, default: &str) -> String {
        self.get_property(name)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default.to_string())
    }
}

/// Properties from a fixed table, normally the `[properties]` config section.
#[derive(Debug, Clone, Default)]
pub struct StaticProperties {
    values: BTreeMap<String, String>,
}

impl StaticProperties {
    pub fn new(values: BTreeMap<String, String>) -> Self {
        StaticProperties { values }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }
}

impl PropertyFetcher for StaticProperties {
    fn get_property(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }
}
