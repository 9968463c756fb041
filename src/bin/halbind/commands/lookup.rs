//! `halbind lookup` command

use anyhow::{Context, Result};

use crate::cli::LookupArgs;
use crate::commands::print_json;
use halbind::ops::{lookup, ManifestSelector};
use halbind::resolver::{BindError, BindingStrategy, NotFound};
use halbind::util::diagnostic::emit;
use halbind::{FqName, VintfContext};

pub fn execute(args: LookupArgs, ctx: &VintfContext, color: bool) -> Result<()> {
    let fq: FqName = args
        .fqname
        .parse()
        .with_context(|| format!("`{}` is not a valid HAL name", args.fqname))?;

    let report = lookup(ctx, &fq, ManifestSelector::framework(args.framework))?;

    if args.json {
        return print_json(&report);
    }

    let Some(declared) = &report.declared else {
        let err = BindError::ServiceNotFound {
            name: report.requested.clone(),
            reason: NotFound::NotDeclared,
        };
        emit(&err.to_diagnostic(), color);
        anyhow::bail!("`{}` is not declared", report.requested);
    };

    println!("{}", report.requested);
    println!("  declared:  {}", declared);
    match &report.arch {
        Some(arch) => println!("  transport: {} ({}-bit)", report.transport, arch),
        None => println!("  transport: {}", report.transport),
    }

    match &report.strategy {
        Some(BindingStrategy::Binder { service }) => {
            println!("  binding:   service `{}`", service);
        }
        Some(BindingStrategy::Passthrough { libraries, symbol }) => {
            println!("  binding:   in-process, `{}` from the first of:", symbol);
            for lib in libraries {
                println!("    {}", lib.display());
            }
        }
        Some(BindingStrategy::CrossAbi {
            libraries,
            symbol,
            guest,
        }) => {
            println!(
                "  binding:   native bridge ({}-bit guest), `{}` from the first of:",
                guest, symbol
            );
            for lib in libraries {
                println!("    {}", lib.display());
            }
        }
        None => println!("  binding:   unavailable for this process"),
    }

    Ok(())
}
