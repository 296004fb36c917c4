//! What the loop exchanges with its external collaborators.
//!
//! The action generator and the reflector are the two language-model calls
//! of a step. Both receive the previous [`StateSnapshot`] explicitly; there
//! is no other carry-over between steps.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::conversation::Turn;
use crate::error::Result;
use crate::identity::MidoIdentity;
use crate::memory::{MemoryContent, MemoryEntry};
use crate::state::StateSnapshot;

/// An action chosen by the action generator. New kinds are new variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum ActionDescriptor {
    /// Write text to the console.
    Speak(String),
}

impl ActionDescriptor {
    pub fn kind(&self) -> &'static str {
        match self {
            ActionDescriptor::Speak(_) => "speak",
        }
    }

    /// Text to emit on the console, if the action has any.
    pub fn output(&self) -> Option<&str> {
        match self {
            ActionDescriptor::Speak(text) => Some(text),
        }
    }

    /// Short form stored as the state's `last_action`.
    pub fn summary(&self) -> String {
        match self {
            ActionDescriptor::Speak(text) => format!("speak: {}", truncate(text, 120)),
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((i, _)) => format!("{}...", &s[..i]),
        None => s.to_string(),
    }
}

/// What the agent sensed at the start of a step.
#[derive(Debug, Clone)]
pub struct Perception {
    /// Console input, or `None` for a heartbeat step.
    pub input: Option<String>,
    pub received_at: DateTime<Utc>,
    /// Recent conversation turns, oldest first, not including `input`.
    pub conversation: Vec<Turn>,
}

/// Reflector output: the successor state and any memories to form.
#[derive(Debug, Clone)]
pub struct Reflection {
    pub state: StateSnapshot,
    pub memories: Vec<MemoryContent>,
}

#[async_trait]
pub trait ActionGenerator: Send + Sync {
    async fn generate_action(
        &self,
        identity: &MidoIdentity,
        state: &StateSnapshot,
        perception: &Perception,
        memories: &[MemoryEntry],
    ) -> Result<ActionDescriptor>;
}

#[async_trait]
pub trait Reflector: Send + Sync {
    async fn reflect(
        &self,
        identity: &MidoIdentity,
        state: &StateSnapshot,
        perception: &Perception,
        memories: &[MemoryEntry],
        action: &ActionDescriptor,
    ) -> Result<Reflection>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_wire_shape() {
        let action = ActionDescriptor::Speak("hi there".into());
        let v = serde_json::to_value(&action).unwrap();
        assert_eq!(v, json!({"kind": "speak", "payload": "hi there"}));

        let back: ActionDescriptor = serde_json::from_value(v).unwrap();
        assert_eq!(back, action);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let r = serde_json::from_value::<ActionDescriptor>(json!({"kind": "research", "payload": "x"}));
        assert!(r.is_err());
    }

    #[test]
    fn summary_truncates_long_output() {
        let action = ActionDescriptor::Speak("é".repeat(200));
        let s = action.summary();
        assert!(s.starts_with("speak: "));
        assert!(s.ends_with("..."));
        assert_eq!(s.chars().count(), "speak: ".len() + 120 + 3);
    }
}
