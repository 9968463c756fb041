//! High-level operations.
//!
//! This module contains the operations behind the CLI commands.

pub mod check;
pub mod deprecation;
pub mod lookup;

pub use check::{check_device_compatibility, check_device_deprecation, load_hidl_metadata};
pub use deprecation::{
    check_deprecation, Deprecation, DeprecationReport, DeprecationStatus, HidlInterfaceMetadata,
    InstanceLister, ServedInstances,
};
pub use lookup::{list_instances, lookup, InstanceEntry, LookupReport, ManifestSelector};
