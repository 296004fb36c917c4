pub mod doctor;
pub mod init;
pub mod inspect;
pub mod maintenance;
pub mod reindex;
pub mod run;
pub mod search;
pub mod stats;

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::config::MidoConfig;
use crate::embedding::{self, EmbeddingProvider};
use crate::memory::MemoryManager;
use crate::state::{StateSnapshot, StateTracker};

/// Open the agent's memory with the configured embedding provider.
///
/// Blocking: the providers may use a blocking HTTP client, so call this off
/// the async runtime.
pub fn open_memory(config: &MidoConfig) -> Result<MemoryManager> {
    let provider: Arc<dyn EmbeddingProvider> = Arc::from(
        embedding::create_provider(&config.embedding)
            .context("failed to create embedding provider")?,
    );
    MemoryManager::open(config, provider).context("failed to open memory")
}

pub fn open_state(config: &MidoConfig) -> Result<StateTracker> {
    StateTracker::open(
        config.state_path(),
        StateSnapshot::initial(&config.initial_state),
        config.storage.sync_writes,
    )
    .context("failed to open state history")
}

pub fn read_state(config: &MidoConfig) -> Result<StateTracker> {
    StateTracker::open_read_only(config.state_path(), StateSnapshot::initial(&config.initial_state))
        .context("failed to open state history")
}

fn preview(content: &str, max_chars: usize) -> String {
    let flat = content.replace('\n', " ");
    match flat.char_indices().nth(max_chars) {
        Some((i, _)) => format!("{}...", &flat[..i]),
        None => flat,
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
