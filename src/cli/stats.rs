use anyhow::Result;

use crate::config::MidoConfig;
use crate::memory::MemoryType;

/// Display memory statistics in the terminal.
pub fn stats(config: &MidoConfig, json: bool) -> Result<()> {
    let memory = super::open_memory(config)?;
    let stats = memory.stats()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Memory Statistics ({})", config.identity.name);
    println!("{}", "=".repeat(40));
    println!("  Total memories:      {}", stats.total);
    println!("  Active:              {}", stats.active);
    println!("  Consolidated:        {}", stats.consolidated);
    println!("  Summaries:           {}", stats.summaries);
    println!("  Pruned:              {}", stats.pruned);
    println!();

    println!("By Type:");
    for t in MemoryType::ALL {
        let count = stats.by_type.get(t.as_str()).copied().unwrap_or(0);
        println!("  {:<14} {}", t, count);
    }
    println!();

    println!("Index:");
    println!("  Indexed:             {}", stats.indexed);
    println!("  Pending embedding:   {}", stats.pending_index);
    println!("  Embedding model:     {}", stats.embedding_model);
    println!();

    println!("Log size:              {}", super::format_bytes(stats.log_bytes));
    println!("Index size:            {}", super::format_bytes(stats.index_bytes));
    if let Some(ref oldest) = stats.oldest {
        println!("Oldest memory:         {oldest}");
    }
    if let Some(ref newest) = stats.newest {
        println!("Newest memory:         {newest}");
    }
    if let Some(ref at) = stats.last_consolidation {
        println!("Last consolidation:    {at}");
    }

    Ok(())
}
