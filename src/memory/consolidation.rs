//! Consolidation and pruning policies.
//!
//! Consolidation folds a window of stale, low-importance entries into one
//! `reflection` summary; the originals stay in the log, flagged. Pruning
//! hides entries from retrieval. Both are driven by the policies here and
//! executed by [`MemoryManager`](crate::memory::MemoryManager).

use chrono::{DateTime, Duration, Utc};

use crate::error::Result;
use crate::memory::importance::ImportancePolicy;
use crate::memory::types::MemoryEntry;

/// Half-open time range `[start, end)` a consolidation pass draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsolidationWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ConsolidationWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The window ending now and reaching `span` into the past.
    pub fn trailing(span: Duration) -> Self {
        let end = Utc::now();
        Self { start: end - span, end }
    }

    /// Everything up to now.
    pub fn all() -> Self {
        Self {
            start: DateTime::<Utc>::default(),
            end: Utc::now(),
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}

/// Which entries in a window are eligible for folding.
#[derive(Debug, Clone)]
pub struct ConsolidationPolicy {
    /// Decayed importance at or below this is eligible.
    pub max_importance: f64,
    /// Entries younger than this are left alone.
    pub min_age: Duration,
    /// Fewer eligible entries than this makes the pass a no-op.
    pub min_entries: usize,
    /// Oldest entries first, up to this many per pass.
    pub max_entries: usize,
    /// Applied to the stored importance of each folded entry.
    pub importance_factor: f64,
}

impl Default for ConsolidationPolicy {
    fn default() -> Self {
        Self {
            max_importance: 0.6,
            min_age: Duration::hours(1),
            min_entries: 2,
            max_entries: 50,
            importance_factor: 0.5,
        }
    }
}

impl ConsolidationPolicy {
    /// Pick the entries a pass over `window` would fold, oldest first.
    ///
    /// Skips pruned entries, entries already folded, and earlier summaries.
    pub fn select(
        &self,
        entries: impl IntoIterator<Item = MemoryEntry>,
        window: &ConsolidationWindow,
        importance: &dyn ImportancePolicy,
        now: DateTime<Utc>,
    ) -> Vec<MemoryEntry> {
        let mut picked: Vec<MemoryEntry> = entries
            .into_iter()
            .filter(|e| !e.pruned && !e.consolidated && !e.is_summary())
            .filter(|e| window.contains(e.timestamp))
            .filter(|e| now - e.timestamp >= self.min_age)
            .filter(|e| importance.effective(e.importance, now - e.timestamp) <= self.max_importance)
            .collect();
        picked.sort_by_key(|e| e.id);
        picked.truncate(self.max_entries);
        picked
    }
}

/// When an entry may be hidden from retrieval.
///
/// An entry is pruned only if none of the keep rules hold: decayed
/// importance at or above the threshold, younger than the retention
/// horizon, accessed at least `min_access_keep` times, a consolidation
/// summary, or folded into one.
#[derive(Debug, Clone)]
pub struct PrunePolicy {
    pub importance_threshold: f64,
    pub retention: Duration,
    pub min_access_keep: u32,
}

impl Default for PrunePolicy {
    fn default() -> Self {
        Self {
            importance_threshold: 0.5,
            retention: Duration::days(30),
            min_access_keep: 3,
        }
    }
}

impl PrunePolicy {
    pub fn should_prune(
        &self,
        entry: &MemoryEntry,
        access_count: u32,
        importance: &dyn ImportancePolicy,
        now: DateTime<Utc>,
    ) -> bool {
        if entry.pruned || entry.consolidated || entry.is_summary() {
            return false;
        }
        let age = now - entry.timestamp;
        if age < self.retention {
            return false;
        }
        if access_count >= self.min_access_keep {
            return false;
        }
        importance.effective(entry.importance, age) < self.importance_threshold
    }
}

/// Turns a set of entries into the text of their summary.
///
/// Implemented for closures so callers can pass a one-off function.
pub trait Synthesizer: Send + Sync {
    fn synthesize(&self, entries: &[MemoryEntry]) -> Result<String>;
}

impl<F> Synthesizer for F
where
    F: Fn(&[MemoryEntry]) -> Result<String> + Send + Sync,
{
    fn synthesize(&self, entries: &[MemoryEntry]) -> Result<String> {
        self(entries)
    }
}

/// Offline synthesizer: a header line followed by one bullet per entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct DigestSynthesizer;

impl Synthesizer for DigestSynthesizer {
    fn synthesize(&self, entries: &[MemoryEntry]) -> Result<String> {
        let mut out = format!("Consolidated insights from {} memories:", entries.len());
        for e in entries {
            out.push_str(&format!("\n- [{}] {}", e.memory_type, e.content));
        }
        Ok(out)
    }
}

/// Decides when the loop should run a consolidation pass.
pub trait ConsolidationSchedule: Send + Sync {
    fn is_due(&self, last_run: Option<DateTime<Utc>>, steps_since: u64, now: DateTime<Utc>) -> bool;
}

/// Due when `interval` has passed since the last run (or there has never
/// been one), or after `every_steps` steps. A zero for either disables that
/// trigger.
#[derive(Debug, Clone)]
pub struct IntervalSchedule {
    pub interval: Duration,
    pub every_steps: u64,
}

impl ConsolidationSchedule for IntervalSchedule {
    fn is_due(&self, last_run: Option<DateTime<Utc>>, steps_since: u64, now: DateTime<Utc>) -> bool {
        if self.every_steps > 0 && steps_since >= self.every_steps {
            return true;
        }
        if self.interval <= Duration::zero() {
            return false;
        }
        match last_run {
            Some(at) => now - at >= self.interval,
            None => true,
        }
    }
}
