use anyhow::Result;

use crate::config::MidoConfig;
use crate::memory::{MemoryType, RetrievalMode, SearchFilter};

/// Run a retrieval from the terminal, the same way the loop does.
pub fn search(
    config: &MidoConfig,
    query: &str,
    k: Option<usize>,
    memory_type: Option<MemoryType>,
    min_importance: Option<f64>,
) -> Result<()> {
    let mut memory = super::open_memory(config)?;
    let state = super::read_state(config)?;

    let mut filter = SearchFilter::default();
    if let Some(t) = memory_type {
        filter = filter.with_type(t);
    }
    if let Some(min) = min_importance {
        filter = filter.min_importance(min);
    }

    let k = k.unwrap_or(config.retrieval.default_k);
    let recall = memory.retrieve_relevant(query, state.current(), k, &filter)?;

    if recall.entries.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    let mode = match recall.mode {
        RetrievalMode::Semantic => "semantic",
        RetrievalMode::Recency => "recency (index unavailable)",
    };
    println!("Found {} result(s) by {mode}\n", recall.entries.len());

    for (i, entry) in recall.entries.iter().enumerate() {
        println!(
            "  {}. [{}] #{} (importance: {:.2}{})",
            i + 1,
            entry.memory_type,
            entry.id,
            entry.importance,
            if entry.consolidated { ", consolidated" } else { "" },
        );
        println!("     {}", super::preview(&entry.content, 120));
        println!();
    }

    Ok(())
}
