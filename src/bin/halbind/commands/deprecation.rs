//! `halbind deprecation` command

use anyhow::{bail, Result};

use crate::cli::DeprecationArgs;
use crate::commands::print_json;
use halbind::ops::{check_device_deprecation, load_hidl_metadata};
use halbind::VintfContext;

pub fn execute(args: DeprecationArgs, ctx: &VintfContext) -> Result<()> {
    let metadata = match &args.hidl_metadata {
        Some(path) => load_hidl_metadata(path)?,
        None => Vec::new(),
    };

    let report = check_device_deprecation(ctx, &metadata)?;

    if args.json {
        print_json(&report)?;
    } else if report.is_ok() {
        println!("no deprecated HALs served at level {}", report.target_level);
    } else {
        for d in &report.deprecated {
            println!("{}", d.instance);
            println!("  {}", d.reason);
        }
    }

    if !report.is_ok() {
        bail!(
            "{} deprecated HAL instance(s) still served",
            report.deprecated.len()
        );
    }
    Ok(())
}
