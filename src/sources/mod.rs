//! Manifest sources.
//!
//! Sources read the partitions of a device image (vendor, odm, system,
//! product) and assemble the device manifest, the framework manifest and the
//! framework compatibility matrices.

pub mod fs;
pub mod manifests;
pub mod properties;

pub use fs::{FileSystem, RealFileSystem};
pub use manifests::{
    fetch_device_manifest, fetch_framework_manifest, fetch_framework_matrices, fetch_odm_manifest,
};
pub use properties::{PropertyFetcher, StaticProperties, SKU_PROPERTY};
