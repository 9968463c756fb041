//! Assembling manifests and matrices from the partitions of a device image.

use anyhow::{bail, Context, Result};

use crate::core::manifest::{Manifest, ManifestType};
use crate::core::matrix::CompatibilityMatrix;
use crate::sources::fs::FileSystem;
use crate::sources::properties::{PropertyFetcher, SKU_PROPERTY};

pub const VENDOR_VINTF_DIR: &str = "/vendor/etc/vintf/";
pub const VENDOR_MANIFEST: &str = "/vendor/etc/vintf/manifest.toml";
pub const VENDOR_FRAGMENTS_DIR: &str = "/vendor/etc/vintf/manifest/";
pub const LEGACY_VENDOR_MANIFEST: &str = "/vendor/manifest.toml";

pub const ODM_VINTF_DIR: &str = "/odm/etc/vintf/";
pub const ODM_FRAGMENTS_DIR: &str = "/odm/etc/vintf/manifest/";
pub const ODM_LEGACY_DIR: &str = "/odm/etc/";

pub const SYSTEM_VINTF_DIR: &str = "/system/etc/vintf/";
pub const SYSTEM_MANIFEST: &str = "/system/etc/vintf/manifest.toml";
pub const SYSTEM_FRAGMENTS_DIR: &str = "/system/etc/vintf/manifest/";
pub const SYSTEM_MATRIX_PATTERN: &str = "compatibility_matrix.*.toml";

pub const PRODUCT_MATRIX: &str = "/product/etc/vintf/compatibility_matrix.toml";

/// Parse `path` if it exists.
fn fetch_manifest(
    fs: &dyn FileSystem,
    path: &str,
    expected: ManifestType,
) -> Result<Option<Manifest>> {
    let Some(content) = fs.fetch(path)? else {
        return Ok(None);
    };
    let manifest = Manifest::from_toml(&content, path)?;
    if manifest.kind() != expected {
        bail!(
            "{} declares a {} manifest, expected {}",
            path,
            manifest.kind(),
            expected
        );
    }
    tracing::debug!("loaded {} ({} instances)", path, manifest.len());
    Ok(Some(manifest))
}

/// Merge every `*.toml` fragment of `dir` into `manifest`, in name order.
fn add_fragments(
    fs: &dyn FileSystem,
    dir: &str,
    manifest: &mut Manifest,
) -> Result<()> {
    for name in fs.glob(dir, "*.toml")? {
        let path = format!("{}{}", dir, name);
        if let Some(fragment) = fetch_manifest(fs, &path, manifest.kind())? {
            manifest
                .add_all(&fragment)
                .with_context(|| format!("cannot merge fragment {}", path))?;
        }
    }
    Ok(())
}

/// The ODM manifest, preferring the SKU-specific file when the SKU is set.
///
/// Only the first file found is read.
pub fn fetch_odm_manifest(
    fs: &dyn FileSystem,
    props: &dyn PropertyFetcher,
) -> Result<Option<Manifest>> {
    let sku = props.get_property(SKU_PROPERTY).filter(|s| !s.is_empty());

    let mut candidates = Vec::new();
    for dir in [ODM_VINTF_DIR, ODM_LEGACY_DIR] {
        if let Some(ref sku) = sku {
            candidates.push(format!("{}manifest_{}.toml", dir, sku));
        }
        candidates.push(format!("{}manifest.toml", dir));
    }

    for path in candidates {
        if let Some(manifest) = fetch_manifest(fs, &path, ManifestType::Device)? {
            tracing::info!("using ODM manifest {}", path);
            return Ok(Some(manifest));
        }
    }
    Ok(None)
}

/// Build the device manifest.
///
/// Priority:
/// 1. vendor manifest + vendor fragments, with the ODM manifest and ODM
///    fragments merged on top (ODM `override` entries replace vendor ones)
/// 2. ODM manifest + ODM fragments
/// 3. legacy `/vendor/manifest.toml`
pub fn fetch_device_manifest(
    fs: &dyn FileSystem,
    props: &dyn PropertyFetcher,
) -> Result<Manifest> {
    let odm = fetch_odm_manifest(fs, props)?;

    if let Some(mut vendor) = fetch_manifest(fs, VENDOR_MANIFEST, ManifestType::Device)? {
        add_fragments(fs, VENDOR_FRAGMENTS_DIR, &mut vendor)?;
        if let Some(odm) = odm {
            vendor
                .add_all(&odm)
                .context("cannot merge ODM manifest into vendor manifest")?;
        }
        add_fragments(fs, ODM_FRAGMENTS_DIR, &mut vendor)?;
        return Ok(vendor);
    }

    if let Some(mut odm) = odm {
        add_fragments(fs, ODM_FRAGMENTS_DIR, &mut odm)?;
        return Ok(odm);
    }

    if let Some(legacy) = fetch_manifest(fs, LEGACY_VENDOR_MANIFEST, ManifestType::Device)? {
        tracing::info!("using legacy device manifest {}", LEGACY_VENDOR_MANIFEST);
        return Ok(legacy);
    }

    bail!("no device manifest found under /vendor or /odm")
}

/// Build the framework manifest from `/system/etc/vintf`.
pub fn fetch_framework_manifest(fs: &dyn FileSystem) -> Result<Manifest> {
    let mut manifest = fetch_manifest(fs, SYSTEM_MANIFEST, ManifestType::Framework)?
        .with_context(|| format!("no framework manifest at {}", SYSTEM_MANIFEST))?;
    add_fragments(fs, SYSTEM_FRAGMENTS_DIR, &mut manifest)?;
    Ok(manifest)
}

/// Every framework compatibility matrix, ordered by file name, then the product matrix.
pub fn fetch_framework_matrices(fs: &dyn FileSystem) -> Result<Vec<CompatibilityMatrix>> {
    let mut paths: Vec<String> = fs
        .glob(SYSTEM_VINTF_DIR, SYSTEM_MATRIX_PATTERN)?
        .into_iter()
        .map(|name| format!("{}{}", SYSTEM_VINTF_DIR, name))
        .collect();
    paths.push(PRODUCT_MATRIX.to_string());

    let mut matrices = Vec::new();
    for path in paths {
        let Some(content) = fs.fetch(&path)? else {
            continue;
        };
        let matrix = CompatibilityMatrix::from_toml(&content, &path)?;
        tracing::debug!("loaded matrix {} (level {:?})", path, matrix.level());
        matrices.push(matrix);
    }

    if matrices.is_empty() {
        bail!("no framework compatibility matrices under {}", SYSTEM_VINTF_DIR);
    }
    Ok(matrices)
}
