//! Structured log store: the durable, append-only source of truth.
//!
//! Every line of `memory.jsonl` is one [`LogRecord`]. Entries are never
//! rewritten. Consolidation and pruning append flag records that readers
//! overlay on the entries they name, so history stays auditable.
//!
//! The store is single-writer. Readers created by [`LogStore::read_all`]
//! open their own file handle and stop at the length committed when they
//! were created, so they never observe a half-written record.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::jsonl;
use crate::memory::types::{MemoryEntry, MemoryType, Metadata, SearchFilter};

/// One line of the memory log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LogRecord {
    Entry(EntryRecord),
    /// `ids` were folded into `summary_id`; their importance is scaled by
    /// `importance_factor`.
    Consolidated {
        ids: Vec<u64>,
        summary_id: u64,
        importance_factor: f64,
        at: DateTime<Utc>,
    },
    /// `ids` are excluded from retrieval from now on.
    Pruned { ids: Vec<u64>, at: DateTime<Utc> },
}

/// The immutable part of an entry, as written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub content: String,
    pub importance: f64,
    #[serde(default)]
    pub metadata: Metadata,
}

/// An entry waiting for an id.
#[derive(Debug, Clone)]
pub struct EntryDraft {
    pub timestamp: DateTime<Utc>,
    pub memory_type: MemoryType,
    pub content: String,
    pub importance: f64,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Flags {
    consolidated: bool,
    pruned: bool,
    importance_factor: f64,
}

impl Default for Flags {
    fn default() -> Self {
        Self {
            consolidated: false,
            pruned: false,
            importance_factor: 1.0,
        }
    }
}

impl EntryRecord {
    fn into_entry(self, flags: Option<&Flags>) -> MemoryEntry {
        let flags = flags.copied().unwrap_or_default();
        MemoryEntry {
            id: self.id,
            timestamp: self.timestamp,
            memory_type: self.memory_type,
            content: self.content,
            embedding: None,
            importance: (self.importance * flags.importance_factor).clamp(0.0, 1.0),
            metadata: self.metadata,
            consolidated: flags.consolidated,
            pruned: flags.pruned,
        }
    }
}

/// Records staged for a single durable write.
///
/// Ids are handed out from the store's next id when the batch is created;
/// committing a batch after something else was appended fails.
#[derive(Debug)]
pub struct LogBatch {
    base_id: u64,
    next_id: u64,
    records: Vec<LogRecord>,
}

impl LogBatch {
    /// Stage an entry and return the id it will have once committed.
    pub fn push_entry(&mut self, draft: EntryDraft) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.records.push(LogRecord::Entry(EntryRecord {
            id,
            timestamp: draft.timestamp,
            memory_type: draft.memory_type,
            content: draft.content,
            importance: draft.importance.clamp(0.0, 1.0),
            metadata: draft.metadata,
        }));
        id
    }

    pub fn push_consolidated(&mut self, ids: Vec<u64>, summary_id: u64, importance_factor: f64) {
        self.records.push(LogRecord::Consolidated {
            ids,
            summary_id,
            importance_factor,
            at: Utc::now(),
        });
    }

    pub fn push_pruned(&mut self, ids: Vec<u64>) {
        self.records.push(LogRecord::Pruned { ids, at: Utc::now() });
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Position to roll back to if a multi-store commit fails after the log write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogCheckpoint {
    len: u64,
}

pub struct LogStore {
    path: PathBuf,
    file: File,
    len: u64,
    next_id: u64,
    offsets: BTreeMap<u64, u64>,
    flags: HashMap<u64, Flags>,
    last_consolidation: Option<DateTime<Utc>>,
    sync_writes: bool,
}

impl LogStore {
    /// Open (or create) the log at `path`, replaying it to rebuild the id
    /// map and flag overlay. A torn final record is truncated.
    pub fn open(path: impl AsRef<Path>, sync_writes: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = jsonl::open_append(&path)?;
        let mut store = Self {
            path,
            file,
            len: 0,
            next_id: 1,
            offsets: BTreeMap::new(),
            flags: HashMap::new(),
            last_consolidation: None,
            sync_writes,
        };
        store.replay()?;
        tracing::info!(
            path = %store.path.display(),
            entries = store.offsets.len(),
            next_id = store.next_id,
            "memory log opened"
        );
        Ok(store)
    }

    fn replay(&mut self) -> Result<()> {
        let mut offsets = BTreeMap::new();
        let mut flags: HashMap<u64, Flags> = HashMap::new();
        let mut next_id = 1u64;
        let mut last_consolidation = None;
        let path = self.path.clone();

        let len = jsonl::replay::<LogRecord, _>(&path, |offset, line, record| {
            match record {
                LogRecord::Entry(entry) => {
                    if entry.id < next_id {
                        return Err(Error::Corrupt {
                            path: path.clone(),
                            line,
                            reason: format!("id {} is not greater than {}", entry.id, next_id - 1),
                        });
                    }
                    next_id = entry.id + 1;
                    offsets.insert(entry.id, offset);
                }
                other => {
                    if let Some(at) = apply_flags(&mut flags, &other) {
                        last_consolidation = Some(at);
                    }
                }
            }
            Ok(())
        })?;

        self.len = len;
        self.next_id = next_id;
        self.offsets = offsets;
        self.flags = flags;
        self.last_consolidation = last_consolidation;
        Ok(())
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Start a batch whose entry ids continue from the current next id.
    pub fn batch(&self) -> LogBatch {
        LogBatch {
            base_id: self.next_id,
            next_id: self.next_id,
            records: Vec::new(),
        }
    }

    /// Write every record in `batch` with a single append.
    ///
    /// Either all records become visible or none do. Returns the entries the
    /// batch created, in id order.
    pub fn commit(&mut self, batch: LogBatch) -> Result<Vec<MemoryEntry>> {
        if batch.base_id != self.next_id {
            return Err(Error::Validation(format!(
                "stale log batch: staged from id {}, log is at {}",
                batch.base_id, self.next_id
            )));
        }
        if batch.records.is_empty() {
            return Ok(Vec::new());
        }

        let (buf, lens) = jsonl::encode(batch.records.iter())?;
        jsonl::append(&mut self.file, &self.path, self.len, &buf, self.sync_writes)?;

        let mut offset = self.len;
        let mut created = Vec::new();
        for (record, line_len) in batch.records.into_iter().zip(lens) {
            match record {
                LogRecord::Entry(entry) => {
                    self.offsets.insert(entry.id, offset);
                    created.push(entry);
                }
                other => {
                    if let Some(at) = apply_flags(&mut self.flags, &other) {
                        self.last_consolidation = Some(at);
                    }
                }
            }
            offset += line_len;
        }
        self.len = offset;
        self.next_id = batch.next_id;

        Ok(created
            .into_iter()
            .map(|e| {
                let flags = self.flags.get(&e.id).copied();
                e.into_entry(flags.as_ref())
            })
            .collect())
    }

    /// Append one entry. Returns it with its assigned id.
    pub fn append(&mut self, draft: EntryDraft) -> Result<MemoryEntry> {
        let mut batch = self.batch();
        batch.push_entry(draft);
        let mut created = self.commit(batch)?;
        created
            .pop()
            .ok_or_else(|| Error::Internal("append produced no entry".into()))
    }

    pub fn checkpoint(&self) -> LogCheckpoint {
        LogCheckpoint { len: self.len }
    }

    /// Truncate the log back to `checkpoint`, forgetting everything after it.
    ///
    /// Only meant for undoing a commit whose sibling write (the state
    /// history) failed in the same step.
    pub fn rollback(&mut self, checkpoint: LogCheckpoint) -> Result<()> {
        if checkpoint.len > self.len {
            return Err(Error::Validation("checkpoint is ahead of the log".into()));
        }
        if checkpoint.len == self.len {
            return Ok(());
        }
        self.file.set_len(checkpoint.len)?;
        self.file.sync_all()?;
        tracing::warn!(path = %self.path.display(), from = self.len, to = checkpoint.len, "memory log rolled back");
        self.replay()
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Stream every entry in append order.
    ///
    /// Lazy and restartable: each call opens a fresh handle bounded to the
    /// log length committed at call time.
    pub fn read_all(&self) -> Result<LogReader> {
        let file = File::open(&self.path)?;
        Ok(LogReader {
            path: self.path.clone(),
            reader: BufReader::new(file.take(self.len)),
            flags: self.flags.clone(),
            buf: Vec::new(),
            line: 0,
        })
    }

    /// Collect every entry. Convenience over [`read_all`](Self::read_all).
    pub fn entries(&self) -> Result<Vec<MemoryEntry>> {
        self.read_all()?.collect()
    }

    pub fn read_by_id(&self, id: u64) -> Result<MemoryEntry> {
        let mut file = File::open(&self.path)?;
        self.read_at(&mut file, id)
    }

    fn read_at(&self, file: &mut File, id: u64) -> Result<MemoryEntry> {
        let offset = *self.offsets.get(&id).ok_or(Error::NotFound(id))?;
        file.seek(SeekFrom::Start(offset))?;
        let mut line = Vec::new();
        BufReader::new(&mut *file).read_until(b'\n', &mut line)?;
        match serde_json::from_slice::<LogRecord>(&line)? {
            LogRecord::Entry(entry) if entry.id == id => Ok(entry.into_entry(self.flags.get(&id))),
            _ => Err(Error::Corrupt {
                path: self.path.clone(),
                line: 0,
                reason: format!("offset {offset} does not hold entry {id}"),
            }),
        }
    }

    /// The `k` most recent entries that are not pruned and pass `filter`,
    /// newest first.
    pub fn recent(&self, k: usize, filter: &SearchFilter) -> Result<Vec<MemoryEntry>> {
        let mut out = Vec::with_capacity(k);
        if k == 0 {
            return Ok(out);
        }
        let mut file = File::open(&self.path)?;
        for &id in self.offsets.keys().rev() {
            if self.flags.get(&id).is_some_and(|f| f.pruned) {
                continue;
            }
            let entry = self.read_at(&mut file, id)?;
            if filter.matches(&entry) {
                out.push(entry);
                if out.len() == k {
                    break;
                }
            }
        }
        Ok(out)
    }

    // ── Introspection ────────────────────────────────────────────────

    pub fn contains(&self, id: u64) -> bool {
        self.offsets.contains_key(&id)
    }

    pub fn is_pruned(&self, id: u64) -> bool {
        self.flags.get(&id).is_some_and(|f| f.pruned)
    }

    /// Number of entries (flag records excluded).
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Id the next appended entry will receive.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn size_bytes(&self) -> u64 {
        self.len
    }

    /// When the most recent consolidation record was written.
    pub fn last_consolidation(&self) -> Option<DateTime<Utc>> {
        self.last_consolidation
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Fold a flag record into the overlay. Returns the time of a
/// consolidation record.
fn apply_flags(flags: &mut HashMap<u64, Flags>, record: &LogRecord) -> Option<DateTime<Utc>> {
    match record {
        LogRecord::Consolidated {
            ids,
            importance_factor,
            at,
            ..
        } => {
            for id in ids {
                let f = flags.entry(*id).or_default();
                f.consolidated = true;
                f.importance_factor *= importance_factor;
            }
            Some(*at)
        }
        LogRecord::Pruned { ids, .. } => {
            for id in ids {
                flags.entry(*id).or_default().pruned = true;
            }
            None
        }
        LogRecord::Entry(_) => None,
    }
}

/// Lazy iterator over the entries of a log snapshot.
pub struct LogReader {
    path: PathBuf,
    reader: BufReader<std::io::Take<File>>,
    flags: HashMap<u64, Flags>,
    buf: Vec<u8>,
    line: usize,
}

impl Iterator for LogReader {
    type Item = Result<MemoryEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            let n = match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(n) => n,
                Err(e) => return Some(Err(e.into())),
            };
            if n == 0 || self.buf.last() != Some(&b'\n') {
                return None;
            }
            self.line += 1;
            if self.buf.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<LogRecord>(&self.buf) {
                Ok(LogRecord::Entry(entry)) => {
                    let flags = self.flags.get(&entry.id).copied();
                    return Some(Ok(entry.into_entry(flags.as_ref())));
                }
                Ok(_) => continue,
                Err(e) => {
                    return Some(Err(Error::Corrupt {
                        path: self.path.clone(),
                        line: self.line,
                        reason: e.to_string(),
                    }))
                }
            }
        }
    }
}
