//! CLI `doctor` command: check the agent's stores and print a health report.

use anyhow::{Context, Result};

use crate::config::MidoConfig;
use crate::db;
use crate::embedding;
use crate::memory::log::LogStore;

pub fn doctor(config: &MidoConfig) -> Result<()> {
    let home = config.home_dir();
    if !home.exists() {
        println!("Agent home: not found at {}", home.display());
        println!("Run `mido init` to create it.");
        return Ok(());
    }

    println!("MIDO Health Report ({})", config.identity.name);
    println!("==================");
    println!();

    // Opening replays the whole log, which surfaces mid-file corruption.
    let log_path = config.memory_log_path();
    match LogStore::open(&log_path, false) {
        Ok(log) => {
            println!("Memory log:        {}", log_path.display());
            println!("  Entries:         {}", log.len());
            println!("  Size:            {}", super::format_bytes(log.size_bytes()));
            println!("  Status:          OK");
        }
        Err(e) => {
            println!("Memory log:        {}", log_path.display());
            println!("  Status:          FAILED ({e})");
        }
    }
    println!();

    match super::read_state(config) {
        Ok(state) => {
            println!("State history:     {}", state.path().display());
            println!("  Snapshots:       {}", state.len());
            println!("  Focus:           {}", state.current().focus);
            println!("  Status:          OK");
        }
        Err(e) => {
            println!("State history:     {}", config.state_path().display());
            println!("  Status:          FAILED ({e:#})");
        }
    }
    println!();

    let index_path = config.index_path();
    if !index_path.exists() {
        println!("Vector index:      not found (created on next start)");
        return Ok(());
    }
    let conn = db::open_database(&index_path).context("failed to open index (may be corrupt)")?;
    let report = db::check_database_health(&conn).context("failed to run health check")?;

    println!("Vector index:      {}", index_path.display());
    println!("  Schema version:  {}", report.schema_version);
    println!("  sqlite-vec:      {}", report.sqlite_vec_version);
    println!("  Indexed:         {}", report.indexed_count);
    println!();
    println!("Embedding model:");
    println!("  Stored:          {}", report.embedding_model.as_deref().unwrap_or("(not set)"));
    match embedding::create_provider(&config.embedding) {
        Ok(provider) => {
            println!("  Configured:      {} ({} dims)", provider.model_id(), provider.dimensions());
            let matches = report.embedding_model.as_deref() == Some(provider.model_id())
                && report.embedding_dimensions == Some(provider.dimensions());
            if report.embedding_model.is_some() && !matches {
                println!("  WARNING: model mismatch. The index is rebuilt on next open, or run `mido reindex --full`.");
            } else {
                println!("  Status:          OK (match)");
            }
        }
        Err(e) => println!("  Configured:      unavailable ({e:#})"),
    }
    println!();

    if report.integrity_ok {
        println!("Integrity check:   PASSED");
    } else {
        println!("Integrity check:   FAILED ({})", report.integrity_details);
        println!();
        println!("The index is derived from the memory log. To recover:");
        println!("  rm {} && mido reindex", index_path.display());
    }

    Ok(())
}
