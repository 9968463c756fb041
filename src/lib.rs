//! halbind - versioned HAL interface lookup and binding
//!
//! This crate provides the library behind the `halbind` tool: parsing of
//! fully-qualified HAL names, device and framework manifests, transport
//! resolution with minor-version forward compatibility, the cross-ABI
//! native bridge and the static TLS handoff it relies on.

pub mod bridge;
pub mod core;
pub mod ops;
pub mod resolver;
pub mod sources;
pub mod util;

/// Test utilities and mocks for halbind unit tests.
///
/// This module is only available when compiling with `--cfg test` or
/// running tests. It provides in-memory device images, a fake dynamic
/// loader and a fake native bridge.
#[cfg(test)]
pub mod test_support;

pub use core::{
    fqname::FqName, manifest::Manifest, manifest_instance::ManifestInstance,
    matrix::CompatibilityMatrix, transport::Transport, version::HalVersion,
};

pub use resolver::TransportResolver;
pub use util::context::VintfContext;
