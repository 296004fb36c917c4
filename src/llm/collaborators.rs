use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::runtime::Handle;

use super::{prompts, AnthropicClient, Tool};
use crate::agent::{ActionDescriptor, ActionGenerator, Perception, Reflection, Reflector};
use crate::error::{Error, Result};
use crate::identity::MidoIdentity;
use crate::memory::consolidation::Synthesizer;
use crate::memory::{MemoryContent, MemoryEntry, MemoryType, Metadata};
use crate::state::StateSnapshot;

const ACTOR: &str = "action generator";
const REFLECTOR: &str = "reflector";
const SYNTHESIZER: &str = "synthesizer";

fn speak_tool() -> Tool {
    Tool {
        name: "speak",
        description: "Say something to the user on the console.",
        input_schema: json!({
            "type": "object",
            "properties": {
                "message": {"type": "string", "description": "What to say"}
            },
            "required": ["message"]
        }),
    }
}

fn reflect_tool() -> Tool {
    let types: Vec<&str> = MemoryType::ALL.iter().map(|t| t.as_str()).collect();
    Tool {
        name: "reflect",
        description: "Report the updated state and any memories worth forming.",
        input_schema: json!({
            "type": "object",
            "properties": {
                "state_update": {
                    "type": "object",
                    "properties": {
                        "focus": {"type": "string", "description": "What you are focused on now"},
                        "emotional_state": {"type": "string"},
                        "energy": {"type": "integer", "minimum": 1, "maximum": 100},
                        "context": {"type": "object", "description": "Free-form notes carried to the next step"}
                    },
                    "required": ["focus", "emotional_state", "energy"]
                },
                "memories": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "type": {"type": "string", "enum": types},
                            "content": {"type": "string"},
                            "importance": {"type": "number", "minimum": 0, "maximum": 1},
                            "salient": {"type": "boolean"}
                        },
                        "required": ["type", "content"]
                    }
                }
            },
            "required": ["state_update"]
        }),
    }
}

#[derive(Deserialize)]
struct SpeakInput {
    message: String,
}

#[derive(Deserialize)]
struct ReflectInput {
    state_update: StateUpdate,
    #[serde(default)]
    memories: Vec<MemoryDraft>,
}

#[derive(Deserialize)]
struct StateUpdate {
    focus: String,
    emotional_state: String,
    energy: i64,
    #[serde(default)]
    context: Option<Metadata>,
}

#[derive(Deserialize)]
struct MemoryDraft {
    #[serde(rename = "type")]
    memory_type: MemoryType,
    content: String,
    #[serde(default)]
    importance: Option<f64>,
    #[serde(default)]
    salient: bool,
}

fn parse_action(input: Value) -> Result<ActionDescriptor> {
    let speak: SpeakInput = serde_json::from_value(input)
        .map_err(|e| Error::collaborator(ACTOR, format!("malformed speak call: {e}")))?;
    Ok(ActionDescriptor::Speak(speak.message))
}

/// Turn a `reflect` tool call into the successor of `previous`, stamped `at`.
fn parse_reflection(previous: &StateSnapshot, input: Value, at: DateTime<Utc>) -> Result<Reflection> {
    let input: ReflectInput = serde_json::from_value(input)
        .map_err(|e| Error::collaborator(REFLECTOR, format!("malformed reflect call: {e}")))?;
    let update = input.state_update;

    let mut state = previous.successor(at);
    state.focus = update.focus;
    state.emotional_state = update.emotional_state;
    state.energy = u8::try_from(update.energy)
        .map_err(|_| Error::collaborator(REFLECTOR, format!("energy {} out of range", update.energy)))?;
    if let Some(context) = update.context {
        state.context = context;
    }

    let memories = input
        .memories
        .into_iter()
        .filter(|m| !m.content.trim().is_empty())
        .map(|m| {
            let mut content = MemoryContent::new(m.memory_type, m.content);
            if m.salient {
                content = content.with_metadata("salient", true);
            }
            if let Some(importance) = m.importance {
                content = content.with_importance(importance);
            }
            content
        })
        .collect();

    Ok(Reflection { state, memories })
}

/// Chooses the next action with a forced `speak` tool call.
pub struct LlmActionGenerator {
    client: Arc<AnthropicClient>,
}

impl LlmActionGenerator {
    pub fn new(client: Arc<AnthropicClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ActionGenerator for LlmActionGenerator {
    async fn generate_action(
        &self,
        identity: &MidoIdentity,
        state: &StateSnapshot,
        perception: &Perception,
        memories: &[MemoryEntry],
    ) -> Result<ActionDescriptor> {
        let input = self
            .client
            .call_tool(
                ACTOR,
                prompts::action_system(identity),
                prompts::action_user(state, perception, memories),
                speak_tool(),
            )
            .await?;
        parse_action(input)
    }
}

/// Produces the successor state and new memories with a forced `reflect`
/// tool call.
pub struct LlmReflector {
    client: Arc<AnthropicClient>,
}

impl LlmReflector {
    pub fn new(client: Arc<AnthropicClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Reflector for LlmReflector {
    async fn reflect(
        &self,
        identity: &MidoIdentity,
        state: &StateSnapshot,
        perception: &Perception,
        memories: &[MemoryEntry],
        action: &ActionDescriptor,
    ) -> Result<Reflection> {
        let input = self
            .client
            .call_tool(
                REFLECTOR,
                prompts::reflection_system(identity),
                prompts::reflection_user(state, perception, memories, action),
                reflect_tool(),
            )
            .await?;
        parse_reflection(state, input, Utc::now())
    }
}

/// Consolidation summaries written by the model.
///
/// [`Synthesizer`] is synchronous and runs on the blocking pool, so the
/// request is driven with [`Handle::block_on`]. Never call it from an async
/// task.
pub struct LlmSynthesizer {
    client: Arc<AnthropicClient>,
    handle: Handle,
}

impl LlmSynthesizer {
    pub fn new(client: Arc<AnthropicClient>, handle: Handle) -> Self {
        Self { client, handle }
    }
}

impl Synthesizer for LlmSynthesizer {
    fn synthesize(&self, entries: &[MemoryEntry]) -> Result<String> {
        self.handle.block_on(self.client.complete(
            SYNTHESIZER,
            prompts::SYNTHESIS_SYSTEM.to_string(),
            prompts::synthesis_user(entries),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InitialStateConfig;

    fn previous() -> StateSnapshot {
        StateSnapshot::initial(&InitialStateConfig::default())
    }

    #[test]
    fn speak_call_becomes_action() {
        let action = parse_action(json!({"message": "hi there"})).unwrap();
        assert_eq!(action, ActionDescriptor::Speak("hi there".into()));

        let err = parse_action(json!({"text": "hi"})).unwrap_err();
        assert!(matches!(err, Error::Collaborator { service: ACTOR, .. }));
    }

    #[test]
    fn reflect_call_becomes_reflection() {
        let at = Utc::now();
        let reflection = parse_reflection(
            &previous(),
            json!({
                "state_update": {"focus": "greeting", "emotional_state": "cheerful", "energy": 75},
                "memories": [
                    {"type": "conversation", "content": "greeted the user", "salient": true},
                    {"type": "semantic", "content": "the user likes tea", "importance": 0.9},
                    {"type": "episodic", "content": "   "}
                ]
            }),
            at,
        )
        .unwrap();

        assert_eq!(reflection.state.timestamp, at);
        assert_eq!(reflection.state.focus, "greeting");
        assert_eq!(reflection.state.energy, 75);
        assert_eq!(reflection.memories.len(), 2);
        assert_eq!(reflection.memories[0].memory_type, MemoryType::Conversation);
        assert_eq!(reflection.memories[0].metadata["salient"], json!(true));
        assert_eq!(reflection.memories[1].importance, Some(0.9));
    }

    #[test]
    fn context_is_carried_unless_replaced() {
        let mut prev = previous();
        prev.context.insert("topic".into(), json!("weather"));
        let r = parse_reflection(
            &prev,
            json!({"state_update": {"focus": "f", "emotional_state": "calm", "energy": 50}}),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(r.state.context["topic"], json!("weather"));
        assert!(r.memories.is_empty());
    }

    #[test]
    fn malformed_reflection_is_a_collaborator_error() {
        let err = parse_reflection(&previous(), json!({"memories": []}), Utc::now()).unwrap_err();
        assert!(matches!(err, Error::Collaborator { service: REFLECTOR, .. }));

        let err = parse_reflection(
            &previous(),
            json!({"state_update": {"focus": "f", "emotional_state": "calm", "energy": -3}}),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Collaborator { .. }));
    }

    #[test]
    fn reflect_schema_lists_memory_types() {
        let tool = reflect_tool();
        let types = &tool.input_schema["properties"]["memories"]["items"]["properties"]["type"]["enum"];
        assert_eq!(types.as_array().unwrap().len(), 5);
    }
}
