//! `halbind check` command

use anyhow::{bail, Result};

use crate::cli::CheckArgs;
use crate::commands::print_json;
use halbind::ops::check_device_compatibility;
use halbind::util::diagnostic::{emit, suggestions, MissingHalError};
use halbind::VintfContext;

pub fn execute(args: CheckArgs, ctx: &VintfContext, color: bool) -> Result<()> {
    let report = check_device_compatibility(ctx)?;

    if args.json {
        print_json(&report)?;
    } else {
        for hal in &report.missing {
            let err = MissingHalError {
                hal: hal.clone(),
                suggestion: Some(suggestions::NOT_DECLARED.to_string()),
            };
            emit(&err, color);
        }
        for unused in &report.unused {
            tracing::info!("not required by any matrix: {}", unused);
        }
        if report.is_compatible() {
            println!("device manifest is compatible");
        }
    }

    if !report.is_compatible() {
        bail!("{} required HAL(s) missing", report.missing.len());
    }
    Ok(())
}
