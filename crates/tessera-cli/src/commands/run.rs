//! `tessera run`: bring up every unit in a directory until Ctrl+C.

use std::path::Path;

use anyhow::{Context, Result};
use tessera_config::RuntimeConfig;
use tessera_runtime::RuntimeOrchestrator;
use tracing::info;

use crate::theme::{Theme, print_components};

/// Load, deploy and start every unit in `dir`, then wait for Ctrl+C and
/// shut down.
///
/// Components that fail to deploy or start are reported and left behind;
/// the rest keep running.
pub(crate) async fn run_units(config: &RuntimeConfig, dir: &Path) -> Result<()> {
    let runtime = RuntimeOrchestrator::from_config(config);
    runtime.start()?;

    let ids = runtime
        .load_all(dir)
        .with_context(|| format!("failed to scan {}", dir.display()))?;
    if ids.is_empty() {
        println!(
            "{}",
            Theme::warning(&format!("no units found in {}", dir.display()))
        );
    }

    for id in ids {
        match runtime.deploy_by_id(id).and_then(|deployed| runtime.start_by_id(deployed)) {
            Ok(()) => println!("{}", Theme::success(&format!("component {id} started"))),
            Err(e) => println!("{}", Theme::error(&format!("component {id}: {e}"))),
        }
    }

    println!("{}", Theme::separator());
    print_components(&runtime.list_components()?);
    println!("{}", Theme::info("press Ctrl+C to stop"));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("Interrupt received, shutting down");

    runtime.shutdown()?;
    println!("{}", Theme::success("runtime shut down"));
    Ok(())
}
