//! CLI `inspect` and `history` commands.

use anyhow::Result;
use chrono::{TimeZone, Utc};

use crate::config::MidoConfig;

/// Display full details for one memory.
pub fn inspect(config: &MidoConfig, id: u64) -> Result<()> {
    let memory = super::open_memory(config)?;
    let m = memory.read_by_id(id)?;
    let access = memory.index().access_stats()?.remove(&id).unwrap_or_default();

    println!("Memory: #{}", m.id);
    println!("{}", "=".repeat(50));
    println!("  Type:           {}", m.memory_type);
    println!("  Importance:     {:.2}", m.importance);
    println!("  Formed:         {}", m.timestamp.to_rfc3339());
    println!("  Consolidated:   {}", m.consolidated);
    println!("  Pruned:         {}", m.pruned);
    println!("  Indexed:        {}", memory.index().contains(id)?);
    println!("  Access count:   {}", access.count);
    if let Some(at) = access.last_accessed.and_then(|us| Utc.timestamp_micros(us).single()) {
        println!("  Last accessed:  {}", at.to_rfc3339());
    }
    let sources = m.consolidated_from();
    if !sources.is_empty() {
        let ids: Vec<String> = sources.iter().map(|i| format!("#{i}")).collect();
        println!("  Summarizes:     {}", ids.join(", "));
    }
    if !m.metadata.is_empty() {
        println!("  Metadata:       {}", serde_json::to_string_pretty(&m.metadata)?);
    }
    println!();
    println!("Content:");
    for line in m.content.lines() {
        println!("  {line}");
    }

    Ok(())
}

/// Print the last `limit` state snapshots, oldest first.
pub fn history(config: &MidoConfig, limit: usize) -> Result<()> {
    let state = super::read_state(config)?;
    let history = state.history()?;

    if history.is_empty() {
        println!("No state history yet. Current (initial) state:");
        let s = state.current();
        println!("  focus: {} | feeling: {} | energy: {}", s.focus, s.emotional_state, s.energy);
        return Ok(());
    }

    let skip = history.len().saturating_sub(limit);
    println!("State history ({} of {} snapshots)\n", history.len() - skip, history.len());
    for s in &history[skip..] {
        println!("  {}", s.timestamp.to_rfc3339());
        println!("    focus: {} | feeling: {} | energy: {}", s.focus, s.emotional_state, s.energy);
        if let Some(action) = &s.last_action {
            println!("    last action: {}", super::preview(action, 100));
        }
    }
    Ok(())
}
