//! `tessera inspect`: show what a unit declares.

use std::path::Path;

use anyhow::{Context, Result};
use tessera_config::RuntimeConfig;
use tessera_runtime::{ExecutionContext, PackagedUnit};

use crate::theme::Theme;

/// Instantiate `path` in a throwaway context and print its name, digest,
/// exports and manifest. Nothing is deployed.
pub(crate) fn run_inspect(config: &RuntimeConfig, path: &Path) -> Result<()> {
    let unit = PackagedUnit::resolve(path)?;
    let context = ExecutionContext::load(&unit, &config.sandbox)?;

    println!("{}", Theme::header(unit.name()));
    println!("  path:    {}", unit.path().display());
    println!("  digest:  {}", Theme::dimmed(&context.digest()));
    println!("  exports:");
    for export in context.exports() {
        println!("    {export}");
    }

    let manifest =
        toml::to_string_pretty(context.manifest()).context("failed to render manifest")?;
    println!("{}", Theme::separator());
    if manifest.trim().is_empty() {
        println!("{}", Theme::dimmed("(no manifest declared)"));
    } else {
        print!("{manifest}");
    }
    Ok(())
}
