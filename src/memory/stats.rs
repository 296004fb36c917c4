use std::collections::BTreeMap;

use serde::Serialize;

use super::MemoryManager;
use crate::error::Result;

/// Counts and sizes across the log and the index.
#[derive(Debug, Serialize)]
pub struct MemoryStats {
    /// Entries in the log, pruned ones included.
    pub total: u64,
    /// Entries still eligible for retrieval.
    pub active: u64,
    pub by_type: BTreeMap<String, u64>,
    pub consolidated: u64,
    pub summaries: u64,
    pub pruned: u64,
    pub indexed: u64,
    pub pending_index: u64,
    pub log_bytes: u64,
    pub index_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest: Option<String>,
    pub embedding_model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_consolidation: Option<String>,
}

/// Compute stats in one pass over the log plus a few index queries.
pub fn memory_stats(manager: &MemoryManager) -> Result<MemoryStats> {
    let mut stats = MemoryStats {
        total: 0,
        active: 0,
        by_type: BTreeMap::new(),
        consolidated: 0,
        summaries: 0,
        pruned: 0,
        indexed: manager.index().len()? as u64,
        pending_index: manager.pending().len() as u64,
        log_bytes: manager.log().size_bytes(),
        index_bytes: manager.index().size_bytes()?,
        oldest: None,
        newest: None,
        embedding_model: manager.index().model_id().to_string(),
        last_consolidation: manager.last_consolidation().map(|t| t.to_rfc3339()),
    };

    let mut oldest = None;
    let mut newest = None;
    for entry in manager.read_all()? {
        let entry = entry?;
        stats.total += 1;
        if entry.pruned {
            stats.pruned += 1;
            continue;
        }
        stats.active += 1;
        *stats.by_type.entry(entry.memory_type.to_string()).or_default() += 1;
        if entry.consolidated {
            stats.consolidated += 1;
        }
        if entry.is_summary() {
            stats.summaries += 1;
        }
        oldest = Some(oldest.map_or(entry.timestamp, |t: chrono::DateTime<chrono::Utc>| t.min(entry.timestamp)));
        newest = Some(newest.map_or(entry.timestamp, |t: chrono::DateTime<chrono::Utc>| t.max(entry.timestamp)));
    }
    stats.oldest = oldest.map(|t| t.to_rfc3339());
    stats.newest = newest.map(|t| t.to_rfc3339());
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::embedding::hashing::HashingEmbedder;
    use crate::embedding::EmbeddingProvider;
    use crate::memory::importance::RecencyWeighted;
    use crate::memory::index::VectorIndex;
    use crate::memory::log::LogStore;
    use crate::memory::{MemorySettings, MemoryType, Metadata};

    #[test]
    fn counts_by_type_and_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = Arc::new(HashingEmbedder::new(64));
        let log = LogStore::open(dir.path().join("memory.jsonl"), false).unwrap();
        let index = VectorIndex::open_in_memory(embedder.model_id(), 64).unwrap();
        let mut manager = MemoryManager::new(
            log,
            index,
            embedder,
            Arc::new(RecencyWeighted::default()),
            MemorySettings::default(),
        )
        .unwrap();

        manager
            .form_memory(MemoryType::Episodic, "walked to the market", Metadata::new())
            .unwrap();
        manager
            .form_memory(MemoryType::Semantic, "markets open at nine", Metadata::new())
            .unwrap();
        manager
            .form_memory(MemoryType::Semantic, "bread is sold by weight", Metadata::new())
            .unwrap();

        let stats = memory_stats(&manager).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.active, 3);
        assert_eq!(stats.by_type["semantic"], 2);
        assert_eq!(stats.by_type["episodic"], 1);
        assert_eq!(stats.indexed, 3);
        assert_eq!(stats.pending_index, 0);
        assert!(stats.log_bytes > 0);
        assert!(stats.oldest.is_some());
        assert!(stats.last_consolidation.is_none());
    }
}
