//! Manifest lookups: how a name is served and which instances exist.

use std::sync::Arc;

use anyhow::{bail, Result};
use serde::Serialize;

use crate::core::fqname::FqName;
use crate::core::manifest::Manifest;
use crate::core::transport::Transport;
use crate::resolver::{BindingStrategy, DlopenLoader, LocalServiceManager};
use crate::util::context::VintfContext;

/// Which manifest a lookup reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ManifestSelector {
    #[default]
    Device,
    Framework,
}

impl ManifestSelector {
    pub fn framework(framework: bool) -> Self {
        if framework {
            ManifestSelector::Framework
        } else {
            ManifestSelector::Device
        }
    }

    fn load(self, ctx: &VintfContext) -> Result<Arc<Manifest>> {
        match self {
            ManifestSelector::Device => ctx.device_manifest(),
            ManifestSelector::Framework => ctx.framework_manifest(),
        }
    }
}

/// How a fully-qualified instance name is served.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LookupReport {
    pub requested: String,
    /// Declared transport; empty when nothing serves the name.
    pub transport: String,
    /// Declared bitness of a passthrough HAL, e.g. `32+64`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    /// The manifest entry that answered, which may be a later minor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub declared: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<BindingStrategy>,
}

impl LookupReport {
    pub fn is_declared(&self) -> bool {
        self.declared.is_some()
    }
}

/// Look up `fq_name` (`package@M.m::IFoo/instance`) in the selected manifest.
pub fn lookup(ctx: &VintfContext, fq_name: &FqName, selector: ManifestSelector) -> Result<LookupReport> {
    if !fq_name.is_fully_qualified() || !fq_name.has_instance() {
        bail!("`{}` is not a fully-qualified instance name", fq_name);
    }

    let manifest = selector.load(ctx)?;
    let resolver = ctx.resolver_for(
        manifest,
        Arc::new(DlopenLoader),
        Arc::new(LocalServiceManager::new()),
    )?;

    let transport = resolver.transport_of(fq_name);
    let resolution = resolver.resolve(fq_name);
    let declared = resolver
        .manifest()
        .find_instance(fq_name, &ctx.version_policy())
        .map(|i| i.description());

    Ok(LookupReport {
        requested: fq_name.to_string(),
        transport: transport.transport.as_str().to_string(),
        arch: (!transport.arch.is_empty()).then(|| transport.arch.to_string()),
        declared,
        strategy: resolution.map(|r| r.strategy),
    })
}

/// One served instance of an interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceEntry {
    pub instance: String,
    pub version: String,
    pub transport: String,
}

/// Instances of `package@M.m::Interface` served at that version or a later minor.
pub fn list_instances(
    ctx: &VintfContext,
    interface: &FqName,
    selector: ManifestSelector,
) -> Result<Vec<InstanceEntry>> {
    let (Some(version), Some(iface)) = (interface.version(), interface.interface()) else {
        bail!("`{}` is not of the form package@M.m::Interface", interface);
    };
    if interface.has_instance() {
        bail!("`{}` names an instance; drop the `/instance` suffix", interface);
    }

    let manifest = selector.load(ctx)?;
    let mut entries: Vec<InstanceEntry> = manifest
        .list_instances(interface.package(), version, iface)
        .into_iter()
        .map(|(instance, declared)| {
            let transport = manifest.get_hidl_transport(interface.package(), declared, iface, &instance);
            InstanceEntry {
                instance,
                version: declared.to_string(),
                transport: match transport {
                    Transport::Empty => "empty".to_string(),
                    t => t.to_string(),
                },
            }
        })
        .collect();
    entries.sort_by(|a, b| a.instance.cmp(&b.instance).then(a.version.cmp(&b.version)));
    Ok(entries)
}
