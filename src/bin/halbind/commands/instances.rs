//! `halbind instances` command

use anyhow::{Context, Result};

use crate::cli::InstancesArgs;
use crate::commands::print_json;
use halbind::ops::{list_instances, ManifestSelector};
use halbind::{FqName, VintfContext};

pub fn execute(args: InstancesArgs, ctx: &VintfContext) -> Result<()> {
    let interface: FqName = args
        .interface
        .parse()
        .with_context(|| format!("`{}` is not a valid interface name", args.interface))?;

    let entries = list_instances(ctx, &interface, ManifestSelector::framework(args.framework))?;

    if args.json {
        return print_json(&entries);
    }

    if entries.is_empty() {
        println!("no instances of {}", interface);
        return Ok(());
    }

    for entry in &entries {
        println!("{}\t@{}\t{}", entry.instance, entry.version, entry.transport);
    }

    Ok(())
}
