#![cfg_attr(all(windows, not(debug_assertions)), windows_subsystem = "windows")]

//! Loads the catalog (first argument, or `config.yaml` beside the working
//! directory) and opens the embedding shell.

use std::path::PathBuf;

use anyhow::{Context, Result};
use log::info;

use window_embedder::{config, constants, init_logging, ConfigLoader};

fn main() -> Result<()> {
    init_logging();
    let path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(constants::DEFAULT_CONFIG_FILE));
    let items = ConfigLoader::load(&path)
        .with_context(|| format!("loading catalog {}", path.display()))?;
    info!(
        "[Main] {} application(s) in {}",
        config::applications(&items).len(),
        path.display()
    );
    run(&items)
}

#[cfg(windows)]
fn run(items: &[window_embedder::CatalogItem]) -> Result<()> {
    window_embedder::host_window::run(items)
}

#[cfg(not(windows))]
fn run(items: &[window_embedder::CatalogItem]) -> Result<()> {
    for spec in config::applications(items) {
        info!("[Main] {} -> {}", spec.name, spec.path.display());
    }
    log::error!("[Main] Embedding windows needs a Win32 desktop; nothing to show here");
    Ok(())
}
