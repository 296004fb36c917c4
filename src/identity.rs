//! Who the agent is. Loaded once from config and never mutated.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidoIdentity {
    pub name: String,
    pub goal: String,
    pub personality: String,
}

impl Default for MidoIdentity {
    fn default() -> Self {
        Self {
            name: "mido".into(),
            goal: "Learn about the world through conversation and remember what matters".into(),
            personality: "curious, warm, and concise".into(),
        }
    }
}

impl std::fmt::Display for MidoIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "You are {}. Your goal: {}. Your personality: {}.",
            self.name, self.goal, self.personality
        )
    }
}
