//! CLI maintenance commands: `consolidate` and `prune`.

use anyhow::Result;
use chrono::Duration;
use std::sync::Arc;
use tokio::runtime::Handle;

use crate::config::MidoConfig;
use crate::llm::{AnthropicClient, LlmSynthesizer};
use crate::memory::consolidation::{ConsolidationWindow, DigestSynthesizer, Synthesizer};

/// Run one consolidation pass.
///
/// Looks back `hours` (default: the configured window), or over the whole
/// log with `all`. `handle` drives the LLM synthesizer when configured;
/// call this from a blocking thread.
pub fn consolidate(config: &MidoConfig, hours: Option<u64>, all: bool, handle: Handle) -> Result<()> {
    let mut memory = super::open_memory(config)?;

    let window = if all {
        ConsolidationWindow::all()
    } else {
        let hours = hours.unwrap_or(config.consolidation.window_hours);
        ConsolidationWindow::trailing(Duration::hours(hours as i64))
    };

    let synthesizer: Box<dyn Synthesizer> = match config.consolidation.synthesizer.as_str() {
        "llm" => Box::new(LlmSynthesizer::new(Arc::new(AnthropicClient::new(&config.llm)?), handle)),
        _ => Box::new(DigestSynthesizer),
    };

    let candidates = memory.consolidation_candidates(&window)?;
    println!(
        "Consolidating {} to {}: {} eligible memories.",
        window.start.format("%Y-%m-%d %H:%M"),
        window.end.format("%Y-%m-%d %H:%M"),
        candidates.len()
    );

    match memory.consolidate(&window, synthesizer.as_ref())? {
        Some(summary) => {
            println!(
                "  Created reflection #{} (importance {:.2}) from {} memories.",
                summary.id,
                summary.importance,
                summary.consolidated_from().len()
            );
            println!("  {}", super::preview(&summary.content, 200));
        }
        None => println!(
            "  Nothing to consolidate (need at least {}).",
            memory.settings().consolidation.min_entries
        ),
    }
    Ok(())
}

/// Hide low-importance, stale, rarely used memories from retrieval.
///
/// With `dry_run`, list what would be pruned and change nothing.
pub fn prune(config: &MidoConfig, dry_run: bool) -> Result<()> {
    let mut memory = super::open_memory(config)?;
    let policy = config.prune_policy();

    if dry_run {
        let candidates = memory.prune_candidates(&policy)?;
        if candidates.is_empty() {
            println!("No memories would be pruned.");
            return Ok(());
        }
        println!("Would prune {} memories:", candidates.len());
        for c in &candidates {
            println!(
                "  #{} [{}] importance {:.2}, accessed {}x, formed {}: {}",
                c.entry.id,
                c.entry.memory_type,
                c.entry.importance,
                c.access_count,
                c.entry.timestamp.format("%Y-%m-%d"),
                super::preview(&c.entry.content, 60),
            );
        }
        return Ok(());
    }

    let pruned = memory.prune(&policy)?;
    if pruned > 0 {
        println!("Pruned {pruned} memories. They remain in the log but no longer appear in retrieval.");
    } else {
        println!("No memories to prune.");
    }
    Ok(())
}
