//! Core memory type definitions.
//!
//! Defines [`MemoryType`] (the five memory categories), [`MemoryEntry`] (a
//! full record as seen by readers), [`MemoryContent`] (what a collaborator
//! asks the manager to remember), and [`SearchFilter`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Open-ended contextual tags attached to an entry. Keys are unique.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Metadata key under which a consolidation summary lists its sources.
pub const CONSOLIDATED_FROM: &str = "consolidated_from";

/// The memory categories. Exhaustive and mutually exclusive per entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    /// Things that happened: inputs, actions, observations.
    Episodic,
    /// Facts and knowledge.
    Semantic,
    /// How to do things.
    Procedural,
    /// Self-assessments and consolidation summaries.
    Reflection,
    /// Saved conversations.
    Conversation,
}

impl MemoryType {
    pub const ALL: [MemoryType; 5] = [
        Self::Episodic,
        Self::Semantic,
        Self::Procedural,
        Self::Reflection,
        Self::Conversation,
    ];

    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Episodic => "episodic",
            Self::Semantic => "semantic",
            Self::Procedural => "procedural",
            Self::Reflection => "reflection",
            Self::Conversation => "conversation",
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for MemoryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "episodic" => Ok(Self::Episodic),
            "semantic" => Ok(Self::Semantic),
            "procedural" => Ok(Self::Procedural),
            "reflection" => Ok(Self::Reflection),
            "conversation" => Ok(Self::Conversation),
            _ => Err(format!("unknown memory type: {s}")),
        }
    }
}

/// A memory record as seen by readers of the log.
///
/// `importance`, `consolidated` and `pruned` reflect every flag record
/// written after the entry itself; the entry's original line is never
/// rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub content: String,
    /// Present on entries fresh from `form_memory` or hydrated from the index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Bounded to `[0, 1]`.
    pub importance: f64,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub consolidated: bool,
    /// Excluded from retrieval. The entry itself stays in the log.
    #[serde(default)]
    pub pruned: bool,
}

impl MemoryEntry {
    /// True for entries produced by consolidation.
    pub fn is_summary(&self) -> bool {
        self.metadata.contains_key(CONSOLIDATED_FROM)
    }

    /// Ids of the entries this summary was built from, if it is one.
    pub fn consolidated_from(&self) -> Vec<u64> {
        self.metadata
            .get(CONSOLIDATED_FROM)
            .and_then(|v| v.as_array())
            .map(|ids| ids.iter().filter_map(|v| v.as_u64()).collect())
            .unwrap_or_default()
    }
}

/// A memory to be formed: the reflection collaborator produces these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryContent {
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    /// Explicit importance override. `None` lets the importance policy decide.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance: Option<f64>,
}

impl MemoryContent {
    pub fn new(memory_type: MemoryType, content: impl Into<String>) -> Self {
        Self {
            memory_type,
            content: content.into(),
            metadata: Metadata::new(),
            importance: None,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = Some(importance);
        self
    }
}

/// Restricts a search before ranking.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilter {
    /// Allowed types. Empty means any.
    pub types: Vec<MemoryType>,
    /// Minimum stored importance, inclusive.
    pub min_importance: Option<f64>,
    /// Exact key/value matches against entry metadata.
    pub metadata: Metadata,
    pub exclude_consolidated: bool,
}

impl SearchFilter {
    pub fn with_type(mut self, memory_type: MemoryType) -> Self {
        self.types.push(memory_type);
        self
    }

    pub fn min_importance(mut self, importance: f64) -> Self {
        self.min_importance = Some(importance);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn exclude_consolidated(mut self) -> Self {
        self.exclude_consolidated = true;
        self
    }

    /// Apply the filter to a hydrated entry. Agrees with the SQL the index
    /// builds: metadata values must match in JSON type as well as value.
    pub fn matches(&self, entry: &MemoryEntry) -> bool {
        if !self.types.is_empty() && !self.types.contains(&entry.memory_type) {
            return false;
        }
        if let Some(min) = self.min_importance {
            if entry.importance < min {
                return false;
            }
        }
        if self.exclude_consolidated && entry.consolidated {
            return false;
        }
        self.metadata
            .iter()
            .all(|(key, value)| entry.metadata.get(key) == Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(memory_type: MemoryType, importance: f64) -> MemoryEntry {
        MemoryEntry {
            id: 1,
            timestamp: Utc::now(),
            memory_type,
            content: "the kettle whistles at noon".into(),
            embedding: None,
            importance,
            metadata: Metadata::new(),
            consolidated: false,
            pruned: false,
        }
    }

    #[test]
    fn memory_type_roundtrips_through_str() {
        for t in MemoryType::ALL {
            assert_eq!(t.as_str().parse::<MemoryType>().unwrap(), t);
        }
        assert!("entity".parse::<MemoryType>().is_err());
    }

    #[test]
    fn entry_serializes_type_field() {
        let json = serde_json::to_value(entry(MemoryType::Reflection, 0.5)).unwrap();
        assert_eq!(json["type"], "reflection");
        assert!(json.get("embedding").is_none());
    }

    #[test]
    fn filter_checks_type_importance_and_metadata() {
        let mut e = entry(MemoryType::Semantic, 0.6);
        e.metadata.insert("topic".into(), "tea".into());

        assert!(SearchFilter::default().matches(&e));
        assert!(SearchFilter::default().with_type(MemoryType::Semantic).matches(&e));
        assert!(!SearchFilter::default().with_type(MemoryType::Episodic).matches(&e));
        assert!(SearchFilter::default().min_importance(0.6).matches(&e));
        assert!(!SearchFilter::default().min_importance(0.7).matches(&e));
        assert!(SearchFilter::default().with_metadata("topic", "tea").matches(&e));
        assert!(!SearchFilter::default().with_metadata("topic", "coffee").matches(&e));

        e.metadata.insert("salient".into(), true.into());
        assert!(SearchFilter::default().with_metadata("salient", true).matches(&e));
        assert!(!SearchFilter::default().with_metadata("salient", 1).matches(&e));

        e.consolidated = true;
        assert!(!SearchFilter::default().exclude_consolidated().matches(&e));
    }

    #[test]
    fn summary_lists_its_sources() {
        let mut e = entry(MemoryType::Reflection, 0.7);
        assert!(!e.is_summary());
        e.metadata
            .insert(CONSOLIDATED_FROM.into(), serde_json::json!([3, 4, 9]));
        assert!(e.is_summary());
        assert_eq!(e.consolidated_from(), vec![3, 4, 9]);
    }
}
