//! CLI definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

/// halbind - look up and bind versioned HAL interfaces
#[derive(Parser)]
#[command(name = "halbind")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Directory standing in for the device's `/`
    #[arg(long, global = true, env = "HALBIND_ROOT")]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Parse and print a fully-qualified HAL name
    Parse(ParseArgs),

    /// Show how a HAL instance is served
    Lookup(LookupArgs),

    /// List the instances of an interface
    Instances(InstancesArgs),

    /// Print the assembled manifest
    Manifest(ManifestArgs),

    /// Check the device manifest against the framework matrices
    Check(CheckArgs),

    /// Report HALs the device's target level deprecates
    Deprecation(DeprecationArgs),

    /// Show the native bridge capabilities of a callbacks version
    Bridge(BridgeArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Args)]
pub struct ParseArgs {
    /// Name to parse, e.g. `android.hardware.foo@1.0::IFoo/default`
    pub fqname: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct LookupArgs {
    /// Instance to look up, e.g. `android.hardware.foo@1.0::IFoo/default`
    pub fqname: String,

    /// Look in the framework manifest instead of the device manifest
    #[arg(long)]
    pub framework: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct InstancesArgs {
    /// Interface, e.g. `android.hardware.foo@1.0::IFoo`
    pub interface: String,

    /// Look in the framework manifest instead of the device manifest
    #[arg(long)]
    pub framework: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct ManifestArgs {
    /// Print the framework manifest instead of the device manifest
    #[arg(long)]
    pub framework: bool,
}

#[derive(Args)]
pub struct CheckArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct DeprecationArgs {
    /// JSON file describing HIDL interface inheritance
    #[arg(long)]
    pub hidl_metadata: Option<PathBuf>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct BridgeArgs {
    /// Callbacks version implemented by the bridge
    pub version: u32,

    /// Runtime version to check compatibility with
    #[arg(long)]
    pub runtime: Option<u32>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: Shell,
}
