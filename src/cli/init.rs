//! CLI `init` command: create the agent home and a starter config.

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::MidoConfig;

/// Write `config` to `config_path` unless a file is already there, then
/// create the memory log, state history and index.
pub fn init(config: &MidoConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("Config already exists at {}", config_path.display());
    } else {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let text = toml::to_string_pretty(config).context("failed to serialize config")?;
        std::fs::write(config_path, text)
            .with_context(|| format!("failed to write {}", config_path.display()))?;
        println!("Wrote config to {}", config_path.display());
    }

    let memory = super::open_memory(config)?;
    let state = super::open_state(config)?;

    println!();
    println!("Agent:           {}", config.identity.name);
    println!("Home:            {}", config.home_dir().display());
    println!("Memory log:      {} ({} entries)", memory.log().path().display(), memory.log().len());
    println!("State history:   {} ({} snapshots)", state.path().display(), state.len());
    println!("Vector index:    {}", config.index_path().display());
    println!("Embedding model: {}", memory.index().model_id());
    Ok(())
}
