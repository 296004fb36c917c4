//! A minimal reflective agent with durable memory.
//!
//! A MIDO agent keeps an identity, an evolving state and a memory across
//! discrete reasoning steps. Each step senses input, recalls relevant
//! memories, acts through a language model, reflects on what happened, and
//! commits the new state together with any new memories.
//!
//! # Architecture
//!
//! - **Memory log**: append-only JSONL, the source of truth for every
//!   memory ever formed. Consolidation and pruning append flag records
//!   instead of rewriting history.
//! - **Vector index**: SQLite with [sqlite-vec](https://github.com/asg017/sqlite-vec)
//!   cosine distance, derived from the log and rebuildable at any time.
//! - **State history**: append-only JSONL of state snapshots with strictly
//!   increasing timestamps.
//! - **Collaborators**: embeddings (offline hashing or an OpenAI-compatible
//!   endpoint) and the Anthropic Messages API for acting, reflecting and
//!   consolidating.
//!
//! # Modules
//!
//! - [`agent`]: the reflection loop and its collaborator interfaces
//! - [`memory`]: log store, vector index, policies and the memory manager
//! - [`state`]: state snapshots and their history
//! - [`config`]: per-agent TOML configuration with environment overrides
//! - [`db`]: index database setup, schema and migrations
//! - [`embedding`]: text-to-vector providers
//! - [`llm`]: Anthropic client, prompts and LLM-backed collaborators
//! - [`cli`]: the `mido` command implementations

pub mod agent;
pub mod cli;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod identity;
mod jsonl;
pub mod llm;
pub mod memory;
pub mod state;

pub use error::{Error, Result};
