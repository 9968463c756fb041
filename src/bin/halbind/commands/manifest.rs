//! `halbind manifest` command

use anyhow::Result;

use crate::cli::ManifestArgs;
use halbind::VintfContext;

pub fn execute(args: ManifestArgs, ctx: &VintfContext) -> Result<()> {
    let manifest = if args.framework {
        ctx.framework_manifest()?
    } else {
        ctx.device_manifest()?
    };

    print!("{}", manifest.to_toml()?);
    Ok(())
}
