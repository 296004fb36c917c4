//! CLI `reindex` command: repair or rebuild the vector index from the log.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::MidoConfig;

/// Reconcile the index with the log, or with `full` re-embed everything.
pub fn reindex(config: &MidoConfig, full: bool) -> Result<()> {
    // Opening already reconciles.
    let mut memory = super::open_memory(config)?;

    if !full {
        let report = memory.reconcile()?;
        println!("Index reconciled with {}.", memory.log().path().display());
        println!("  Indexed:    {}", memory.index().len()?);
        println!("  Pending:    {}", report.pending);
        println!("  Unusable:   {}", report.unembeddable);
        if report.pending > 0 {
            println!("  Some entries could not be embedded. Check the embedding provider and rerun.");
        }
        return Ok(());
    }

    let total = memory.log().len();
    println!("Re-embedding {total} memories with model '{}'...", memory.index().model_id());

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {bar:40.cyan/blue} {pos}/{len} ({eta})")
            .context("invalid progress template")?
            .progress_chars("##-"),
    );
    let report = memory.rebuild_index(&mut |done: usize, total: usize| {
        pb.set_length(total as u64);
        pb.set_position(done as u64);
    })?;
    pb.finish_and_clear();

    println!(
        "Rebuilt index: {} indexed, {} failed, {} unusable, {} pruned entries skipped.",
        report.indexed, report.failed, report.unembeddable, report.pruned
    );
    Ok(())
}
