//! Command implementations

pub mod bridge;
pub mod check;
pub mod completions;
pub mod deprecation;
pub mod instances;
pub mod lookup;
pub mod manifest;
pub mod parse;

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;

use halbind::util::config::{global_config_path, load_config, project_config_path};
use halbind::VintfContext;

/// Build the context from the merged config; `--root` overrides the config's `root`.
pub fn load_context(root: Option<PathBuf>) -> Result<VintfContext> {
    let cwd = std::env::current_dir().context("failed to get current directory")?;
    let global = global_config_path().unwrap_or_default();
    let mut config = load_config(&global, &project_config_path(&cwd));

    if let Some(root) = root {
        config.root = Some(root);
    }
    if let Some(root) = &config.root {
        tracing::debug!("device root: {}", root.display());
    }

    Ok(VintfContext::from_config(config))
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
