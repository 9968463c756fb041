//! Device compatibility and deprecation checks over a [`VintfContext`].

use std::path::Path;

use anyhow::{Context, Result};

use crate::core::compatibility::{check_compatibility, CompatibilityReport};
use crate::core::matrix::CompatibilityMatrix;
use crate::ops::deprecation::{check_deprecation, DeprecationReport, HidlInterfaceMetadata};
use crate::util::context::VintfContext;

/// Check the device manifest against the framework matrices combined at
/// the device's target level.
pub fn check_device_compatibility(ctx: &VintfContext) -> Result<CompatibilityReport> {
    let manifest = ctx.device_manifest()?;
    let level = ctx.device_level()?;
    let matrices = ctx.framework_matrices()?;

    let combined = CompatibilityMatrix::combine(level, &matrices)
        .with_context(|| format!("cannot combine framework matrices for level {}", level))?;

    let report = check_compatibility(&manifest, &combined);
    tracing::debug!(
        "compatibility at level {}: {} missing, {} unused",
        level,
        report.missing.len(),
        report.unused.len()
    );
    Ok(report)
}

/// Run the deprecation check with the device manifest as the set of served instances.
pub fn check_device_deprecation(
    ctx: &VintfContext,
    hidl_metadata: &[HidlInterfaceMetadata],
) -> Result<DeprecationReport> {
    let manifest = ctx.device_manifest()?;
    let level = ctx.device_level()?;
    let matrices = ctx.framework_matrices()?;
    check_deprecation(&matrices, level, manifest.as_ref(), hidl_metadata)
}

/// Read interface inheritance metadata from a JSON file.
pub fn load_hidl_metadata(path: &Path) -> Result<Vec<HidlInterfaceMetadata>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read HIDL metadata: {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse HIDL metadata: {}", path.display()))
}
