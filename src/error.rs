//! Error taxonomy shared by the stores, the memory manager, and the loop.
//!
//! The variants line up with how each failure is handled: [`Error::Embedding`]
//! and [`Error::NotFound`] are recovered where they happen, everything else
//! aborts the current reflection step (see [`Error::is_fatal`]).

use std::path::PathBuf;

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An append to a durable log did not complete. The partial write has
    /// been truncated away before this is returned.
    #[error("write to {} failed: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The embedding collaborator was unavailable or produced an unusable
    /// vector. When `id` is set, the entry was still appended to the log and
    /// will be indexed once embedding succeeds.
    #[error("embedding failed{}: {reason}", id.map(|i| format!(" for memory {i}")).unwrap_or_default())]
    Embedding { id: Option<u64>, reason: String },

    #[error("memory {0} not found")]
    NotFound(u64),

    /// Monotonicity or schema violation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The action, reflection, or synthesis service failed or returned
    /// something that could not be interpreted.
    #[error("{service} collaborator failed: {reason}")]
    Collaborator { service: &'static str, reason: String },

    /// A record in the middle of a log could not be parsed. Torn tails are
    /// repaired on open and never surface as this error.
    #[error("{} is corrupt at line {line}: {reason}", path.display())]
    Corrupt {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// The state write failed after the step's memories reached the log,
    /// and removing them failed too. `ids` are left in the log without a
    /// matching snapshot.
    #[error("state write failed ({state_error}) and memories {ids:?} could not be rolled back: {rollback_error}")]
    PartialCommit {
        ids: Vec<u64>,
        state_error: Box<Error>,
        rollback_error: Box<Error>,
    },

    #[error("index error: {0}")]
    Index(#[from] rusqlite::Error),

    /// The index database could not be opened or migrated.
    #[error("failed to open index: {0:#}")]
    IndexOpen(anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Lock poisoning or a failed blocking task.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn embedding(reason: impl std::fmt::Display) -> Self {
        Self::Embedding {
            id: None,
            reason: reason.to_string(),
        }
    }

    pub fn collaborator(service: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::Collaborator {
            service,
            reason: reason.to_string(),
        }
    }

    /// Whether this error must abort the step it happened in.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Embedding { .. } | Self::NotFound(_))
    }
}
