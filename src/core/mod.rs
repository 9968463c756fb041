//! Core data structures.
//!
//! - Versions and fully-qualified interface names
//! - Manifest entries, manifests and compatibility matrices
//! - The manifest-versus-matrix check

pub mod compatibility;
pub mod fqname;
pub mod manifest;
pub mod manifest_instance;
pub mod matrix;
pub mod transport;
pub mod version;

pub use compatibility::{check_compatibility, CompatibilityReport};
pub use fqname::{FqName, FqNameError};
pub use manifest::{Level, Manifest, ManifestError, ManifestType, VersionPolicy};
pub use manifest_instance::ManifestInstance;
pub use matrix::{CompatibilityMatrix, MatrixHal, MatrixInstance};
pub use transport::{Arch, Bitness, HalFormat, Transport, TransportArch};
pub use version::{HalVersion, VersionRange};
