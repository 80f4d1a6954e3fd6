//! `tessera restore`: recreate components from a snapshot.

use std::path::Path;

use anyhow::Result;
use tessera_config::RuntimeConfig;
use tessera_runtime::RuntimeOrchestrator;

use crate::commands::console::console_loop;
use crate::theme::{Theme, print_components};

/// Apply `snapshot`, list the result and open the console.
pub(crate) fn run_restore(config: &RuntimeConfig, snapshot: &Path) -> Result<()> {
    let runtime = RuntimeOrchestrator::from_config(config);
    runtime.start()?;

    let count = runtime.load_config(snapshot)?;
    println!(
        "{}",
        Theme::success(&format!(
            "recreated {count} components from {}",
            snapshot.display()
        ))
    );
    print_components(&runtime.list_components()?);

    console_loop(&runtime)
}
