//! Memory manager: the only writer of the memory log and the vector index.
//!
//! Writes go to the log first and the index second. The log is
//! authoritative, so an index write that fails only leaves the entry
//! pending; it is picked up by the next [`MemoryManager::reconcile`] or
//! retrieval. Reads go through the index when it can answer and fall back
//! to recency over the log when it cannot.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::MidoConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::memory::check_embedding;
use crate::memory::consolidation::{ConsolidationPolicy, ConsolidationWindow, PrunePolicy, Synthesizer};
use crate::memory::importance::{ImportancePolicy, ImportanceSignal, RecencyWeighted};
use crate::memory::index::{IndexAttributes, IndexRow, VectorIndex};
use crate::memory::log::{EntryDraft, LogCheckpoint, LogReader, LogStore};
use crate::memory::stats::{memory_stats, MemoryStats};
use crate::memory::types::{
    MemoryContent, MemoryEntry, MemoryType, Metadata, SearchFilter, CONSOLIDATED_FROM,
};
use crate::state::StateSnapshot;

const EMBED_BATCH_SIZE: usize = 32;

#[derive(Debug, Clone, Default)]
pub struct MemorySettings {
    pub consolidation: ConsolidationPolicy,
    pub pruning: PrunePolicy,
}

impl MemorySettings {
    pub fn from_config(config: &MidoConfig) -> Self {
        Self {
            consolidation: config.consolidation_policy(),
            pruning: config.prune_policy(),
        }
    }
}

/// How a retrieval was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalMode {
    /// Ranked by embedding similarity.
    Semantic,
    /// Most recent entries from the log; the index was empty or the query
    /// could not be embedded.
    Recency,
}

#[derive(Debug, Clone)]
pub struct Recall {
    pub entries: Vec<MemoryEntry>,
    pub mode: RetrievalMode,
}

/// A memory validated, scored and (if possible) embedded, not yet written.
#[derive(Debug, Clone)]
pub struct PreparedMemory {
    draft: EntryDraft,
    embedding: Option<Vec<f32>>,
    embed_error: Option<String>,
}

impl PreparedMemory {
    pub fn is_embedded(&self) -> bool {
        self.embedding.is_some()
    }
}

/// Entries written to the log by [`MemoryManager::commit`].
#[derive(Debug)]
pub struct Committed {
    pub entries: Vec<MemoryEntry>,
    checkpoint: LogCheckpoint,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Index rows whose id is missing from the log or pruned.
    pub removed: usize,
    /// Index rows whose importance or consolidated flag drifted from the log.
    pub refreshed: usize,
    /// Log entries newly embedded and indexed.
    pub indexed: usize,
    /// Log entries still waiting for an embedding.
    pub pending: usize,
    /// Log entries whose content produced an unusable vector.
    pub unembeddable: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildReport {
    pub indexed: usize,
    pub failed: usize,
    pub unembeddable: usize,
    pub pruned: usize,
}

struct EmbeddedRows {
    rows: Vec<IndexRow>,
    /// The provider returned nothing; retry later.
    failed: Vec<u64>,
    /// The provider returned a vector the index refuses.
    rejected: Vec<u64>,
}

#[derive(Debug, Clone)]
pub struct PruneCandidate {
    pub entry: MemoryEntry,
    pub access_count: u32,
}

pub struct MemoryManager {
    log: LogStore,
    index: VectorIndex,
    embedder: Arc<dyn EmbeddingProvider>,
    importance: Arc<dyn ImportancePolicy>,
    settings: MemorySettings,
    pending: BTreeSet<u64>,
    /// Entries the provider embeds to a vector the index refuses (e.g. no
    /// alphanumeric content). Not retried until the next reconcile.
    unembeddable: BTreeSet<u64>,
}

impl MemoryManager {
    /// Assemble a manager and bring the index in line with the log.
    pub fn new(
        log: LogStore,
        index: VectorIndex,
        embedder: Arc<dyn EmbeddingProvider>,
        importance: Arc<dyn ImportancePolicy>,
        settings: MemorySettings,
    ) -> Result<Self> {
        if index.dimensions() != embedder.dimensions() {
            return Err(Error::Validation(format!(
                "index expects {} dimensions, embedder produces {}",
                index.dimensions(),
                embedder.dimensions()
            )));
        }
        let mut manager = Self {
            log,
            index,
            embedder,
            importance,
            settings,
            pending: BTreeSet::new(),
            unembeddable: BTreeSet::new(),
        };
        let report = manager.reconcile()?;
        info!(
            entries = manager.log.len(),
            removed = report.removed,
            refreshed = report.refreshed,
            indexed = report.indexed,
            pending = report.pending,
            unembeddable = report.unembeddable,
            "memory manager ready"
        );
        Ok(manager)
    }

    /// Open the log and index under the agent home named by `config`.
    pub fn open(config: &MidoConfig, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let log = LogStore::open(config.memory_log_path(), config.storage.sync_writes)?;
        let index = VectorIndex::open(config.index_path(), embedder.model_id(), embedder.dimensions())?;
        Self::new(
            log,
            index,
            embedder,
            Arc::new(RecencyWeighted::new(config.importance.clone())),
            MemorySettings::from_config(config),
        )
    }

    // ── Forming ──────────────────────────────────────────────────────

    /// Embed, score, append and index a new entry.
    ///
    /// If embedding fails the entry is still appended, left out of the index,
    /// and [`Error::Embedding`] is returned carrying its id.
    pub fn form_memory(
        &mut self,
        memory_type: MemoryType,
        content: &str,
        metadata: Metadata,
    ) -> Result<MemoryEntry> {
        self.form(MemoryContent {
            memory_type,
            content: content.to_string(),
            metadata,
            importance: None,
        })
    }

    /// [`form_memory`](Self::form_memory) taking a [`MemoryContent`], which
    /// may carry an explicit importance.
    pub fn form(&mut self, content: MemoryContent) -> Result<MemoryEntry> {
        let prepared = self.prepare(content)?;
        let embed_error = prepared.embed_error.clone();
        let committed = self.commit(vec![prepared])?;
        self.index_committed(&committed.entries);
        let entry = committed
            .entries
            .into_iter()
            .next()
            .ok_or_else(|| Error::Internal("commit produced no entry".into()))?;
        match embed_error {
            Some(reason) => Err(Error::Embedding {
                id: Some(entry.id),
                reason,
            }),
            None => Ok(entry),
        }
    }

    /// Validate, score and embed `content` without writing anything.
    ///
    /// Embedding failure is not an error here; the prepared memory simply
    /// has no vector. The `consolidated_from` metadata key is reserved for
    /// summaries and rejected.
    pub fn prepare(&self, content: MemoryContent) -> Result<PreparedMemory> {
        if content.metadata.contains_key(CONSOLIDATED_FROM) {
            return Err(Error::Validation(format!(
                "metadata key '{CONSOLIDATED_FROM}' is reserved for consolidation summaries"
            )));
        }
        self.prepare_draft(content)
    }

    fn prepare_draft(&self, content: MemoryContent) -> Result<PreparedMemory> {
        if content.content.trim().is_empty() {
            return Err(Error::Validation("memory content is empty".into()));
        }
        let importance = self.importance.initial(&ImportanceSignal {
            memory_type: content.memory_type,
            content: &content.content,
            metadata: &content.metadata,
            explicit: content.importance,
        });
        let (embedding, embed_error) = match self.embed(&content.content) {
            Ok(v) => (Some(v), None),
            Err(e) => {
                warn!(memory_type = %content.memory_type, error = %e, "embedding failed, entry will be indexed later");
                (None, Some(e.to_string()))
            }
        };
        Ok(PreparedMemory {
            draft: EntryDraft {
                timestamp: Utc::now(),
                memory_type: content.memory_type,
                content: content.content,
                importance,
                metadata: content.metadata,
            },
            embedding,
            embed_error,
        })
    }

    /// Append prepared memories to the log in one durable write.
    ///
    /// Nothing is indexed yet; call [`index_committed`](Self::index_committed)
    /// once the rest of the step has committed, or [`rollback`](Self::rollback)
    /// if it did not.
    pub fn commit(&mut self, prepared: Vec<PreparedMemory>) -> Result<Committed> {
        let checkpoint = self.log.checkpoint();
        let mut batch = self.log.batch();
        let mut embeddings = Vec::with_capacity(prepared.len());
        for p in prepared {
            batch.push_entry(p.draft);
            embeddings.push(p.embedding);
        }
        let mut entries = self.log.commit(batch)?;
        for (entry, embedding) in entries.iter_mut().zip(embeddings) {
            entry.embedding = embedding;
        }
        debug!(count = entries.len(), "memories committed to log");
        Ok(Committed { entries, checkpoint })
    }

    /// Index committed entries. Failures leave the entry pending rather than
    /// failing the caller. Returns how many were indexed.
    pub fn index_committed(&mut self, entries: &[MemoryEntry]) -> usize {
        let mut indexed = 0;
        for entry in entries {
            match &entry.embedding {
                Some(v) => match self.index.upsert(entry.id, v, &IndexAttributes::from(entry)) {
                    Ok(()) => indexed += 1,
                    Err(e) => {
                        warn!(id = entry.id, error = %e, "index upsert failed, entry left pending");
                        self.pending.insert(entry.id);
                    }
                },
                None => {
                    self.pending.insert(entry.id);
                }
            }
        }
        indexed
    }

    /// Undo a commit whose sibling write failed.
    pub fn rollback(&mut self, committed: Committed) -> Result<()> {
        for entry in &committed.entries {
            self.pending.remove(&entry.id);
            self.unembeddable.remove(&entry.id);
        }
        self.log.rollback(committed.checkpoint)
    }

    // ── Retrieval ────────────────────────────────────────────────────

    /// Up to `k` entries relevant to `query`, best first.
    ///
    /// A blank query uses the state's focus instead. Falls back to the `k`
    /// most recent matching entries when the index is empty or cannot be
    /// used; pruned entries never appear.
    pub fn retrieve_relevant(
        &mut self,
        query: &str,
        state: &StateSnapshot,
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Recall> {
        if k == 0 {
            return Ok(Recall {
                entries: Vec::new(),
                mode: RetrievalMode::Semantic,
            });
        }
        let text = if query.trim().is_empty() {
            state.focus.as_str()
        } else {
            query
        };

        if !self.pending.is_empty() {
            self.flush_pending();
        }

        match self.semantic_search(text, k, filter) {
            Ok(Some(entries)) => {
                return Ok(Recall {
                    entries,
                    mode: RetrievalMode::Semantic,
                })
            }
            Ok(None) => debug!("index is empty, using recency retrieval"),
            Err(e @ (Error::Embedding { .. } | Error::Index(_) | Error::Validation(_))) => {
                warn!(error = %e, "semantic retrieval unavailable, using recency retrieval");
            }
            Err(e) => return Err(e),
        }

        Ok(Recall {
            entries: self.log.recent(k, filter)?,
            mode: RetrievalMode::Recency,
        })
    }

    fn semantic_search(
        &self,
        text: &str,
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Option<Vec<MemoryEntry>>> {
        if self.index.is_empty()? {
            return Ok(None);
        }
        let query = self.embed(text)?;
        let hits = self.index.search(&query, k, filter)?;

        let mut entries = Vec::with_capacity(hits.len());
        for hit in hits {
            match self.log.read_by_id(hit.id) {
                Ok(mut entry) if !entry.pruned => {
                    entry.embedding = self.index.embedding(hit.id)?;
                    entries.push(entry);
                }
                Ok(_) => warn!(id = hit.id, "pruned entry still indexed"),
                Err(Error::NotFound(id)) => warn!(id, "index references an id missing from the log"),
                Err(e) => return Err(e),
            }
        }

        let ids: Vec<u64> = entries.iter().map(|e| e.id).collect();
        if let Err(e) = self.index.record_access(&ids) {
            warn!(error = %e, "failed to record access");
        }
        Ok(Some(entries))
    }

    /// Try to index entries that were written without an embedding. Stops
    /// at the first provider error. Returns how many were indexed.
    pub fn flush_pending(&mut self) -> usize {
        let mut indexed = 0;
        let ids: Vec<u64> = self.pending.iter().copied().collect();
        for id in ids {
            let entry = match self.log.read_by_id(id) {
                Ok(e) if !e.pruned => e,
                Ok(_) | Err(Error::NotFound(_)) => {
                    self.pending.remove(&id);
                    continue;
                }
                Err(e) => {
                    warn!(id, error = %e, "failed to read pending entry");
                    break;
                }
            };
            let vector = match self.embedder.embed(&entry.content) {
                Ok(v) => v,
                Err(e) => {
                    debug!(id, error = %e, "embedding still unavailable");
                    break;
                }
            };
            if let Err(e) = check_embedding(&vector, self.index.dimensions()) {
                warn!(id, error = %e, "entry cannot be embedded, no longer retrying");
                self.pending.remove(&id);
                self.unembeddable.insert(id);
                continue;
            }
            match self.index.upsert(id, &vector, &IndexAttributes::from(&entry)) {
                Ok(()) => {
                    self.pending.remove(&id);
                    indexed += 1;
                }
                Err(e) => {
                    warn!(id, error = %e, "index upsert failed");
                    break;
                }
            }
        }
        if indexed > 0 {
            info!(indexed, remaining = self.pending.len(), "indexed pending memories");
        }
        indexed
    }

    // ── Consolidation ────────────────────────────────────────────────

    /// Entries a consolidation pass over `window` would fold.
    pub fn consolidation_candidates(&self, window: &ConsolidationWindow) -> Result<Vec<MemoryEntry>> {
        let entries = self.log.entries()?;
        Ok(self
            .settings
            .consolidation
            .select(entries, window, self.importance.as_ref(), Utc::now()))
    }

    /// Fold eligible entries in `window` into one `reflection` summary.
    ///
    /// The summary's importance is the highest among its sources. The
    /// sources stay in the log, flagged consolidated with their importance
    /// scaled down. Returns `None` when too few entries are eligible. A
    /// synthesizer failure writes nothing.
    pub fn consolidate(
        &mut self,
        window: &ConsolidationWindow,
        synthesizer: &dyn Synthesizer,
    ) -> Result<Option<MemoryEntry>> {
        let candidates = self.consolidation_candidates(window)?;
        let policy = self.settings.consolidation.clone();
        if candidates.len() < policy.min_entries {
            debug!(eligible = candidates.len(), needed = policy.min_entries, "nothing to consolidate");
            return Ok(None);
        }

        let content = synthesizer.synthesize(&candidates)?;
        if content.trim().is_empty() {
            return Err(Error::collaborator("synthesizer", "returned an empty summary"));
        }

        let ids: Vec<u64> = candidates.iter().map(|e| e.id).collect();
        let importance = candidates.iter().map(|e| e.importance).fold(0.0, f64::max);
        let mut metadata = Metadata::new();
        metadata.insert(CONSOLIDATED_FROM.into(), json!(ids));
        metadata.insert("memory_count".into(), json!(ids.len()));
        metadata.insert("window_start".into(), json!(window.start.to_rfc3339()));
        metadata.insert("window_end".into(), json!(window.end.to_rfc3339()));

        let prepared = self.prepare_draft(MemoryContent {
            memory_type: MemoryType::Reflection,
            content,
            metadata,
            importance: Some(importance),
        })?;

        let mut batch = self.log.batch();
        let summary_id = batch.push_entry(prepared.draft);
        batch.push_consolidated(ids.clone(), summary_id, policy.importance_factor);
        let mut created = self.log.commit(batch)?;
        let mut summary = created
            .pop()
            .ok_or_else(|| Error::Internal("consolidation produced no summary".into()))?;
        summary.embedding = prepared.embedding;
        self.index_committed(std::slice::from_ref(&summary));

        let updates: Vec<(u64, f64, bool)> = candidates
            .iter()
            .map(|e| (e.id, (e.importance * policy.importance_factor).clamp(0.0, 1.0), true))
            .collect();
        if let Err(e) = self.index.set_attributes(&updates) {
            warn!(error = %e, "failed to flag consolidated entries in index");
        }

        info!(summary_id, sources = ids.len(), "consolidated memories");
        Ok(Some(summary))
    }

    /// When the last consolidation pass committed.
    pub fn last_consolidation(&self) -> Option<DateTime<Utc>> {
        self.log.last_consolidation()
    }

    // ── Pruning ──────────────────────────────────────────────────────

    /// Entries `policy` would hide, without changing anything.
    pub fn prune_candidates(&self, policy: &PrunePolicy) -> Result<Vec<PruneCandidate>> {
        let access = self.index.access_stats()?;
        let now = Utc::now();
        let mut out = Vec::new();
        for entry in self.log.read_all()? {
            let entry = entry?;
            let access_count = access.get(&entry.id).map(|a| a.count).unwrap_or(0);
            if policy.should_prune(&entry, access_count, self.importance.as_ref(), now) {
                out.push(PruneCandidate { entry, access_count });
            }
        }
        Ok(out)
    }

    /// Hide entries from retrieval. The log keeps them; a `pruned` record
    /// is appended first, then their index rows are removed. Returns how
    /// many entries were pruned.
    pub fn prune(&mut self, policy: &PrunePolicy) -> Result<usize> {
        let ids: Vec<u64> = self
            .prune_candidates(policy)?
            .into_iter()
            .map(|c| c.entry.id)
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }

        let mut batch = self.log.batch();
        batch.push_pruned(ids.clone());
        self.log.commit(batch)?;

        for id in &ids {
            self.pending.remove(id);
        }
        match self.index.remove_many(&ids) {
            Ok(removed) => info!(pruned = ids.len(), removed_from_index = removed, "pruned memories"),
            Err(e) => warn!(error = %e, "pruned in log but index removal failed, reconcile will finish it"),
        }
        Ok(ids.len())
    }

    // ── Index maintenance ────────────────────────────────────────────

    /// Bring the index in line with the log: drop rows the log does not
    /// back, refresh drifted attributes, and embed entries that are missing.
    pub fn reconcile(&mut self) -> Result<ReconcileReport> {
        let entries = self.log.entries()?;
        let live: HashMap<u64, &MemoryEntry> = entries
            .iter()
            .filter(|e| !e.pruned)
            .map(|e| (e.id, e))
            .collect();
        let stored = self.index.attributes()?;

        let orphans: Vec<u64> = stored
            .keys()
            .filter(|id| !live.contains_key(id))
            .copied()
            .collect();
        let removed = self.index.remove_many(&orphans)?;

        let drift: Vec<(u64, f64, bool)> = stored
            .iter()
            .filter_map(|(id, (importance, consolidated))| {
                let e = live.get(id)?;
                let drifted =
                    (e.importance - importance).abs() > 1e-9 || e.consolidated != *consolidated;
                drifted.then_some((*id, e.importance, e.consolidated))
            })
            .collect();
        self.index.set_attributes(&drift)?;

        let mut missing: Vec<&MemoryEntry> = live
            .values()
            .filter(|e| !stored.contains_key(&e.id))
            .copied()
            .collect();
        missing.sort_by_key(|e| e.id);

        let embedded = self.embed_rows(&missing, &mut |_: usize, _: usize| {});
        for row in &embedded.rows {
            self.index.upsert(row.id, &row.embedding, &row.attributes)?;
        }
        self.pending = embedded.failed.into_iter().collect();
        self.unembeddable = embedded.rejected.into_iter().collect();

        Ok(ReconcileReport {
            removed,
            refreshed: drift.len(),
            indexed: embedded.rows.len(),
            pending: self.pending.len(),
            unembeddable: self.unembeddable.len(),
        })
    }

    /// Re-embed every non-pruned entry and replace the index wholesale.
    ///
    /// `progress(done, total)` is called after each batch.
    pub fn rebuild_index(&mut self, progress: &mut dyn FnMut(usize, usize)) -> Result<RebuildReport> {
        let entries = self.log.entries()?;
        let live: Vec<&MemoryEntry> = entries.iter().filter(|e| !e.pruned).collect();
        let embedded = self.embed_rows(&live, progress);
        self.index.replace_all(&embedded.rows)?;
        self.pending = embedded.failed.iter().copied().collect();
        self.unembeddable = embedded.rejected.iter().copied().collect();
        Ok(RebuildReport {
            indexed: embedded.rows.len(),
            failed: embedded.failed.len(),
            unembeddable: embedded.rejected.len(),
            pruned: entries.len() - live.len(),
        })
    }

    /// Embed entries in batches. A failed batch is retried one entry at a
    /// time; if every entry of that batch fails the provider is treated as
    /// down and the remainder is reported failed without further calls.
    fn embed_rows(
        &self,
        entries: &[&MemoryEntry],
        progress: &mut dyn FnMut(usize, usize),
    ) -> EmbeddedRows {
        let total = entries.len();
        let dims = self.index.dimensions();
        let mut out = EmbeddedRows {
            rows: Vec::with_capacity(total),
            failed: Vec::new(),
            rejected: Vec::new(),
        };
        let mut done = 0;

        for (n, chunk) in entries.chunks(EMBED_BATCH_SIZE).enumerate() {
            let texts: Vec<&str> = chunk.iter().map(|e| e.content.as_str()).collect();
            let vectors: Vec<Option<Vec<f32>>> = match self.embedder.embed_batch(&texts) {
                Ok(vs) if vs.len() == chunk.len() => vs.into_iter().map(Some).collect(),
                Ok(_) | Err(_) => chunk
                    .iter()
                    .map(|e| self.embedder.embed(&e.content).ok())
                    .collect(),
            };

            if vectors.iter().all(Option::is_none) {
                warn!(batch = n, "embedding provider unavailable, leaving entries pending");
                out.failed.extend(entries[n * EMBED_BATCH_SIZE..].iter().map(|e| e.id));
                break;
            }

            for (entry, vector) in chunk.iter().zip(vectors) {
                match vector {
                    Some(embedding) if check_embedding(&embedding, dims).is_ok() => {
                        out.rows.push(IndexRow {
                            id: entry.id,
                            embedding,
                            attributes: IndexAttributes::from(*entry),
                        })
                    }
                    Some(_) => out.rejected.push(entry.id),
                    None => out.failed.push(entry.id),
                }
            }
            done += chunk.len();
            progress(done, total);
        }
        out
    }

    // ── Accessors ────────────────────────────────────────────────────

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let v = self
            .embedder
            .embed(text)
            .map_err(|e| Error::embedding(format!("{e:#}")))?;
        check_embedding(&v, self.index.dimensions())?;
        Ok(v)
    }

    /// Stream every log entry in append order.
    pub fn read_all(&self) -> Result<LogReader> {
        self.log.read_all()
    }

    pub fn read_by_id(&self, id: u64) -> Result<MemoryEntry> {
        self.log.read_by_id(id)
    }

    pub fn log(&self) -> &LogStore {
        &self.log
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn settings(&self) -> &MemorySettings {
        &self.settings
    }

    pub fn importance_policy(&self) -> &dyn ImportancePolicy {
        self.importance.as_ref()
    }

    pub fn stats(&self) -> Result<MemoryStats> {
        memory_stats(self)
    }

    /// Ids appended without a vector in the index.
    pub fn pending(&self) -> &BTreeSet<u64> {
        &self.pending
    }

    /// Ids whose content embeds to a vector the index refuses.
    pub fn unembeddable(&self) -> &BTreeSet<u64> {
        &self.unembeddable
    }
}
