//! Importance scoring.
//!
//! Importance lives in `[0, 1]`. A policy decides the score an entry is
//! written with and how that score decays with age when consolidation and
//! pruning compare it against their thresholds. The stored score only
//! changes through consolidation.

use chrono::Duration;

use crate::config::ImportanceConfig;
use crate::memory::types::{MemoryType, Metadata};

/// What a policy may look at when scoring a new entry.
#[derive(Debug, Clone, Copy)]
pub struct ImportanceSignal<'a> {
    pub memory_type: MemoryType,
    pub content: &'a str,
    pub metadata: &'a Metadata,
    /// Caller-supplied score. Wins over the heuristic when present.
    pub explicit: Option<f64>,
}

pub trait ImportancePolicy: Send + Sync {
    /// Score for a newly formed entry.
    fn initial(&self, signal: &ImportanceSignal<'_>) -> f64;

    /// Score of an entry with stored importance `stored` that is `age` old.
    fn effective(&self, stored: f64, _age: Duration) -> f64 {
        stored
    }
}

/// Default policy: a per-type base score plus a salience bonus, decaying
/// with a configurable half-life.
///
/// Salience is read from metadata: a numeric `salience` in `[0, 1]`, or
/// `salient: true` (which counts as 1.0).
#[derive(Debug, Clone)]
pub struct RecencyWeighted {
    config: ImportanceConfig,
}

impl RecencyWeighted {
    pub fn new(config: ImportanceConfig) -> Self {
        Self { config }
    }

    fn base(&self, memory_type: MemoryType) -> f64 {
        match memory_type {
            MemoryType::Episodic => self.config.episodic,
            MemoryType::Semantic => self.config.semantic,
            MemoryType::Procedural => self.config.procedural,
            MemoryType::Reflection => self.config.reflection,
            MemoryType::Conversation => self.config.conversation,
        }
    }
}

impl Default for RecencyWeighted {
    fn default() -> Self {
        Self::new(ImportanceConfig::default())
    }
}

/// Salience signal carried in metadata, clamped to `[0, 1]`.
pub fn salience(metadata: &Metadata) -> f64 {
    if let Some(s) = metadata.get("salience").and_then(|v| v.as_f64()) {
        return s.clamp(0.0, 1.0);
    }
    match metadata.get("salient").and_then(|v| v.as_bool()) {
        Some(true) => 1.0,
        _ => 0.0,
    }
}

impl ImportancePolicy for RecencyWeighted {
    fn initial(&self, signal: &ImportanceSignal<'_>) -> f64 {
        if let Some(explicit) = signal.explicit {
            return explicit.clamp(0.0, 1.0);
        }
        let score = self.base(signal.memory_type) + self.config.salience_weight * salience(signal.metadata);
        score.clamp(0.0, 1.0)
    }

    fn effective(&self, stored: f64, age: Duration) -> f64 {
        if self.config.half_life_hours <= 0.0 {
            return stored;
        }
        let hours = age.num_milliseconds().max(0) as f64 / 3_600_000.0;
        stored * 0.5f64.powf(hours / self.config.half_life_hours)
    }
}
