//! `halbind bridge` command

use anyhow::{bail, Result};
use serde::Serialize;

use crate::cli::BridgeArgs;
use crate::commands::print_json;
use halbind::bridge::{BridgeVersion, Capability};

#[derive(Serialize)]
struct CapabilityRow {
    name: &'static str,
    introduced_in: BridgeVersion,
    available: bool,
}

#[derive(Serialize)]
struct BridgeReport {
    version: BridgeVersion,
    runtime: BridgeVersion,
    compatible: bool,
    capabilities: Vec<CapabilityRow>,
}

pub fn execute(args: BridgeArgs) -> Result<()> {
    if args.version == 0 {
        bail!("bridge callbacks version must be at least 1");
    }
    let version = BridgeVersion(args.version);
    let runtime = args.runtime.map(BridgeVersion).unwrap_or(BridgeVersion::SUPPORTED_MAX);
    let available = version.capabilities();

    let report = BridgeReport {
        version,
        runtime,
        compatible: version.serves(runtime),
        capabilities: Capability::ALL
            .iter()
            .map(|c| CapabilityRow {
                name: c.name(),
                introduced_in: c.introduced_in(),
                available: available.contains(c),
            })
            .collect(),
    };

    if args.json {
        return print_json(&report);
    }

    println!("native bridge {}", report.version);
    for row in &report.capabilities {
        let mark = if row.available { "yes" } else { "no" };
        let since = row.introduced_in.to_string();
        println!("  {:<24} {:<4} {}", row.name, since, mark);
    }
    println!();
    if report.compatible {
        println!("compatible with runtime {}", report.runtime);
    } else {
        println!("not compatible with runtime {}", report.runtime);
    }

    Ok(())
}
