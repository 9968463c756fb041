//! halbind CLI - versioned HAL interface lookup

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use halbind::util::diagnostic::{emit, ManifestSyntaxError};

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() {
    if let Err(e) = run() {
        if let Some(syntax) = e.downcast_ref::<ManifestSyntaxError>() {
            emit(syntax, false);
        }
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    // Parse CLI
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("halbind=debug")
    } else {
        EnvFilter::new("halbind=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_ansi(!cli.no_color)
        .with_writer(std::io::stderr)
        .init();

    let color = !cli.no_color;

    // Execute command
    match cli.command {
        Commands::Parse(args) => commands::parse::execute(args),
        Commands::Lookup(args) => {
            commands::lookup::execute(args, &commands::load_context(cli.root)?, color)
        }
        Commands::Instances(args) => {
            commands::instances::execute(args, &commands::load_context(cli.root)?)
        }
        Commands::Manifest(args) => {
            commands::manifest::execute(args, &commands::load_context(cli.root)?)
        }
        Commands::Check(args) => {
            commands::check::execute(args, &commands::load_context(cli.root)?, color)
        }
        Commands::Deprecation(args) => {
            commands::deprecation::execute(args, &commands::load_context(cli.root)?)
        }
        Commands::Bridge(args) => commands::bridge::execute(args),
        Commands::Completions(args) => commands::completions::execute(args),
    }
}
