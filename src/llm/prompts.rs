//! Prompt text for the action, reflection and synthesis calls.

use crate::agent::conversation::render;
use crate::agent::{ActionDescriptor, Perception};
use crate::identity::MidoIdentity;
use crate::memory::MemoryEntry;
use crate::state::StateSnapshot;

pub fn action_system(identity: &MidoIdentity) -> String {
    format!(
        "{identity}\n\n\
         Based on your current state and the memories you recall, decide what to do next. \
         If the user said something, respond to it. If not, act on your current focus.\n\n\
         Use the `speak` tool to say something on the console."
    )
}

pub fn action_user(state: &StateSnapshot, perception: &Perception, memories: &[MemoryEntry]) -> String {
    format!(
        "Current state:\n{}\n\nRecalled memories:\n{}\n\nConversation so far:\n{}\n\nUser input: {}",
        render_state(state),
        render_memories(memories),
        render_conversation(perception),
        perception.input.as_deref().unwrap_or("(none)"),
    )
}

pub fn reflection_system(identity: &MidoIdentity) -> String {
    format!(
        "You are the self-reflection process of {name}. {identity}\n\n\
         Look at the interaction that just happened: your action and any user input. \
         Update your state to reflect what you now understand and what you intend next, \
         and record memories only for what is worth remembering. \
         Mark a memory salient when it should be hard to forget.\n\n\
         Use the `reflect` tool to report your reflection.",
        name = identity.name
    )
}

pub fn reflection_user(
    state: &StateSnapshot,
    perception: &Perception,
    memories: &[MemoryEntry],
    action: &ActionDescriptor,
) -> String {
    format!(
        "Previous state:\n{}\n\nRecalled memories:\n{}\n\nConversation so far:\n{}\n\nUser input: {}\n\nAction taken: {}",
        render_state(state),
        render_memories(memories),
        render_conversation(perception),
        perception.input.as_deref().unwrap_or("(none)"),
        serde_json::to_string(action).unwrap_or_else(|_| action.summary()),
    )
}

pub const SYNTHESIS_SYSTEM: &str = "You condense an agent's memories. Write a short first-person \
    summary of the insights the memories share. Keep concrete facts, names and commitments; \
    drop small talk. Reply with the summary only.";

pub fn synthesis_user(entries: &[MemoryEntry]) -> String {
    format!("Memories to consolidate:\n{}", render_memories(entries))
}

fn render_state(state: &StateSnapshot) -> String {
    let mut out = format!(
        "focus: {}\nemotional state: {}\nenergy: {}/100",
        state.focus, state.emotional_state, state.energy
    );
    if let Some(action) = &state.last_action {
        out.push_str(&format!("\nlast action: {action}"));
    }
    if !state.context.is_empty() {
        let context = serde_json::to_string(&state.context).unwrap_or_default();
        out.push_str(&format!("\ncontext: {context}"));
    }
    out
}

fn render_memories(memories: &[MemoryEntry]) -> String {
    if memories.is_empty() {
        return "(none)".into();
    }
    memories
        .iter()
        .map(|m| {
            format!(
                "- [{} | {} | importance {:.2}] {}",
                m.timestamp.format("%Y-%m-%d %H:%M"),
                m.memory_type,
                m.importance,
                m.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_conversation(perception: &Perception) -> String {
    if perception.conversation.is_empty() {
        "(none)".into()
    } else {
        render(&perception.conversation)
    }
}
