//! `halbind parse` command

use anyhow::{Context, Result};
use serde::Serialize;

use crate::cli::ParseArgs;
use crate::commands::print_json;
use halbind::FqName;

#[derive(Serialize)]
struct Parsed<'a> {
    name: String,
    package: &'a str,
    version: Option<String>,
    interface: Option<&'a str>,
    instance: Option<&'a str>,
    format: &'static str,
    fully_qualified: bool,
}

pub fn execute(args: ParseArgs) -> Result<()> {
    let fq: FqName = args
        .fqname
        .parse()
        .with_context(|| format!("`{}` is not a valid HAL name", args.fqname))?;

    let parsed = Parsed {
        name: fq.to_string(),
        package: fq.package(),
        version: fq.version().map(|v| v.to_string()),
        interface: fq.interface(),
        instance: fq.instance(),
        format: if fq.is_aidl() { "aidl" } else { "hidl" },
        fully_qualified: fq.is_fully_qualified() && fq.has_instance(),
    };

    if args.json {
        return print_json(&parsed);
    }

    println!("{}", parsed.name);
    println!("  package:   {}", parsed.package);
    if let Some(version) = &parsed.version {
        println!("  version:   {}", version);
    }
    if let Some(interface) = parsed.interface {
        println!("  interface: {}", interface);
    }
    if let Some(instance) = parsed.instance {
        println!("  instance:  {}", instance);
    }
    println!("  format:    {}", parsed.format);

    Ok(())
}
