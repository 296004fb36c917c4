//! Agent state: immutable snapshots and their append-only history.
//!
//! `state.jsonl` holds one [`StateSnapshot`] per line, strictly increasing
//! in timestamp. Before the first step, [`StateTracker::current`] is the
//! initial state from config.

use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::InitialStateConfig;
use crate::error::{Error, Result};
use crate::jsonl;
use crate::memory::types::Metadata;

pub const MIN_ENERGY: u8 = 1;
pub const MAX_ENERGY: u8 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub timestamp: DateTime<Utc>,
    pub focus: String,
    pub emotional_state: String,
    /// Within `MIN_ENERGY..=MAX_ENERGY`.
    pub energy: u8,
    #[serde(default)]
    pub context: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_interaction: Option<DateTime<Utc>>,
}

impl StateSnapshot {
    /// The pre-history snapshot. Its timestamp is the Unix epoch so any
    /// real first step is strictly later.
    pub fn initial(config: &InitialStateConfig) -> Self {
        Self {
            timestamp: DateTime::<Utc>::default(),
            focus: config.focus.clone(),
            emotional_state: config.emotional_state.clone(),
            energy: config.energy.clamp(MIN_ENERGY, MAX_ENERGY),
            context: Metadata::new(),
            last_action: None,
            last_interaction: None,
        }
    }

    /// A copy stamped `at`, for collaborators that only tweak a few fields.
    pub fn successor(&self, at: DateTime<Utc>) -> Self {
        Self {
            timestamp: at,
            ..self.clone()
        }
    }

    /// Schema checks that do not depend on history.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_ENERGY..=MAX_ENERGY).contains(&self.energy) {
            return Err(Error::Validation(format!(
                "energy {} outside {MIN_ENERGY}..={MAX_ENERGY}",
                self.energy
            )));
        }
        if self.focus.trim().is_empty() {
            return Err(Error::Validation("focus must not be empty".into()));
        }
        if self.emotional_state.trim().is_empty() {
            return Err(Error::Validation("emotional_state must not be empty".into()));
        }
        Ok(())
    }
}

pub struct StateTracker {
    path: PathBuf,
    /// `None` when opened read-only.
    file: Option<File>,
    len: u64,
    current: StateSnapshot,
    history_len: usize,
    sync_writes: bool,
}

impl StateTracker {
    /// Open the history at `path`. The last persisted snapshot becomes
    /// current; with no history, `initial` is.
    pub fn open(path: impl AsRef<Path>, initial: StateSnapshot, sync_writes: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = jsonl::open_append(&path)?;
        Self::load(path, Some(file), initial, sync_writes)
    }

    /// Open the history for reading only. A missing file is an empty
    /// history; [`advance`](Self::advance) always fails with [`Error::Write`].
    pub fn open_read_only(path: impl AsRef<Path>, initial: StateSnapshot) -> Result<Self> {
        Self::load(path.as_ref().to_path_buf(), None, initial, false)
    }

    fn load(
        path: PathBuf,
        file: Option<File>,
        initial: StateSnapshot,
        sync_writes: bool,
    ) -> Result<Self> {
        let mut current = initial;
        let mut history_len = 0usize;
        let mut prev: Option<DateTime<Utc>> = None;
        let len = jsonl::replay::<StateSnapshot, _>(&path, |_, line, snapshot| {
            if prev.is_some_and(|p| snapshot.timestamp <= p) {
                return Err(Error::Corrupt {
                    path: path.clone(),
                    line,
                    reason: "state timestamps are not strictly increasing".into(),
                });
            }
            prev = Some(snapshot.timestamp);
            current = snapshot;
            history_len += 1;
            Ok(())
        })?;

        tracing::info!(
            path = %path.display(),
            snapshots = history_len,
            read_only = file.is_none(),
            "state history opened"
        );
        Ok(Self {
            path,
            file,
            len,
            current,
            history_len,
            sync_writes,
        })
    }

    pub fn current(&self) -> &StateSnapshot {
        &self.current
    }

    /// Check `next` could be appended without writing anything.
    pub fn validate_next(&self, next: &StateSnapshot) -> Result<()> {
        next.validate()?;
        if next.timestamp <= self.current.timestamp {
            return Err(Error::Validation(format!(
                "state timestamp {} is not after {}",
                next.timestamp.to_rfc3339(),
                self.current.timestamp.to_rfc3339()
            )));
        }
        Ok(())
    }

    /// Append `next` to the history and make it current.
    ///
    /// On [`Error::Validation`] or [`Error::Write`] history is unchanged.
    pub fn advance(&mut self, next: StateSnapshot) -> Result<()> {
        self.validate_next(&next)?;
        let Some(file) = self.file.as_mut() else {
            return Err(Error::Write {
                path: self.path.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "state history is open read-only",
                ),
            });
        };
        let (buf, _) = jsonl::encode(std::iter::once(&next))?;
        jsonl::append(file, &self.path, self.len, &buf, self.sync_writes)?;
        self.len += buf.len() as u64;
        self.history_len += 1;
        tracing::debug!(focus = %next.focus, energy = next.energy, "state advanced");
        self.current = next;
        Ok(())
    }

    /// Every persisted snapshot, oldest first.
    pub fn history(&self) -> Result<Vec<StateSnapshot>> {
        let mut out = Vec::with_capacity(self.history_len);
        jsonl::replay::<StateSnapshot, _>(&self.path, |_, _, s| {
            out.push(s);
            Ok(())
        })?;
        Ok(out)
    }

    /// Number of persisted snapshots.
    pub fn len(&self) -> usize {
        self.history_len
    }

    pub fn is_empty(&self) -> bool {
        self.history_len == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
