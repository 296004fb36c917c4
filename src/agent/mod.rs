//! The reflection loop.
//!
//! Each step runs `Idle → Sensing → Acting → Reflecting → Persisting → Idle`.
//! Memory and state are touched only in Sensing (read) and Persisting
//! (write). Persisting either commits the new state together with the new
//! memories or commits neither.
//!
//! The stores are synchronous, so every call into them runs on tokio's
//! blocking pool behind a mutex.

pub mod collaborators;
pub mod console;
pub mod conversation;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub use collaborators::{ActionDescriptor, ActionGenerator, Perception, Reflection, Reflector};
pub use console::{Console, StdConsole};
pub use conversation::{Conversation, Role, Turn};

use crate::config::MidoConfig;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::identity::MidoIdentity;
use crate::llm::{AnthropicClient, LlmActionGenerator, LlmReflector, LlmSynthesizer};
use crate::memory::consolidation::{
    ConsolidationSchedule, ConsolidationWindow, DigestSynthesizer, IntervalSchedule, Synthesizer,
};
use crate::memory::{MemoryContent, MemoryEntry, MemoryManager, MemoryType, RetrievalMode, SearchFilter};
use crate::state::{StateSnapshot, StateTracker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    Idle,
    Sensing,
    Acting,
    Reflecting,
    Persisting,
}

impl std::fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            LoopPhase::Idle => "idle",
            LoopPhase::Sensing => "sensing",
            LoopPhase::Acting => "acting",
            LoopPhase::Reflecting => "reflecting",
            LoopPhase::Persisting => "persisting",
        })
    }
}

/// A step that aborted. Nothing from the step was persisted, except when
/// `source` is [`Error::PartialCommit`].
#[derive(Debug, thiserror::Error)]
#[error("step failed while {phase}: {source}")]
pub struct StepError {
    pub phase: LoopPhase,
    #[source]
    pub source: Error,
}

impl StepError {
    fn at(phase: LoopPhase) -> impl FnOnce(Error) -> Self {
        move |source| Self { phase, source }
    }
}

/// What a completed step did.
#[derive(Debug, Clone)]
pub struct StepReport {
    pub step_id: String,
    pub action: ActionDescriptor,
    pub state: StateSnapshot,
    pub retrieved: usize,
    pub retrieval_mode: RetrievalMode,
    pub formed: Vec<MemoryEntry>,
    /// Summary written by a consolidation pass that ran after the step.
    pub consolidated: Option<MemoryEntry>,
}

pub struct Collaborators {
    pub actor: Arc<dyn ActionGenerator>,
    pub reflector: Arc<dyn Reflector>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub default_k: usize,
    pub conversation_window: usize,
    pub exit_words: Vec<String>,
    /// Step without input after this long idle. `None` waits forever.
    pub heartbeat: Option<Duration>,
    pub consolidation_enabled: bool,
    pub consolidation_span: chrono::Duration,
    pub consolidate_on_shutdown: bool,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self::from_config(&MidoConfig::default())
    }
}

impl AgentSettings {
    pub fn from_config(config: &MidoConfig) -> Self {
        Self {
            default_k: config.retrieval.default_k,
            conversation_window: config.agent.conversation_window,
            exit_words: config.agent.exit_words.clone(),
            heartbeat: (config.agent.heartbeat_secs > 0)
                .then(|| Duration::from_secs(config.agent.heartbeat_secs)),
            consolidation_enabled: config.consolidation.enabled,
            consolidation_span: chrono::Duration::hours(config.consolidation.window_hours as i64),
            consolidate_on_shutdown: config.consolidation.on_shutdown,
        }
    }
}

struct Stores {
    memory: MemoryManager,
    state: StateTracker,
}

pub struct Agent {
    identity: MidoIdentity,
    stores: Arc<Mutex<Stores>>,
    collaborators: Collaborators,
    schedule: Box<dyn ConsolidationSchedule>,
    settings: AgentSettings,
    conversation: Conversation,
    phase: LoopPhase,
    steps_since_consolidation: u64,
    last_consolidation_attempt: Option<DateTime<Utc>>,
}

impl Agent {
    pub fn new(
        identity: MidoIdentity,
        memory: MemoryManager,
        state: StateTracker,
        collaborators: Collaborators,
        schedule: Box<dyn ConsolidationSchedule>,
        settings: AgentSettings,
    ) -> Self {
        Self {
            identity,
            stores: Arc::new(Mutex::new(Stores { memory, state })),
            collaborators,
            schedule,
            settings,
            conversation: Conversation::default(),
            phase: LoopPhase::Idle,
            steps_since_consolidation: 0,
            last_consolidation_attempt: None,
        }
    }

    /// Open the stores named by `config` and wire up the LLM collaborators.
    pub async fn open(config: &MidoConfig) -> anyhow::Result<Self> {
        let cfg = config.clone();
        let (memory, state) = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
            let embedder: Arc<dyn EmbeddingProvider> = Arc::from(create_provider(&cfg.embedding)?);
            let memory = MemoryManager::open(&cfg, embedder)?;
            let state = StateTracker::open(
                cfg.state_path(),
                StateSnapshot::initial(&cfg.initial_state),
                cfg.storage.sync_writes,
            )?;
            Ok((memory, state))
        })
        .await??;

        let client = Arc::new(AnthropicClient::new(&config.llm)?);
        let synthesizer: Arc<dyn Synthesizer> = match config.consolidation.synthesizer.as_str() {
            "llm" => Arc::new(LlmSynthesizer::new(
                Arc::clone(&client),
                tokio::runtime::Handle::current(),
            )),
            _ => Arc::new(DigestSynthesizer),
        };
        let schedule = IntervalSchedule {
            interval: chrono::Duration::hours(config.consolidation.interval_hours as i64),
            every_steps: config.consolidation.every_steps,
        };

        Ok(Self::new(
            config.identity.clone(),
            memory,
            state,
            Collaborators {
                actor: Arc::new(LlmActionGenerator::new(Arc::clone(&client))),
                reflector: Arc::new(LlmReflector::new(client)),
                synthesizer,
            },
            Box::new(schedule),
            AgentSettings::from_config(config),
        ))
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    pub fn identity(&self) -> &MidoIdentity {
        &self.identity
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub async fn current_state(&self) -> Result<StateSnapshot> {
        self.with_stores(|s| Ok(s.state.current().clone())).await
    }

    fn enter(&mut self, phase: LoopPhase) {
        debug!(from = %self.phase, to = %phase, "loop phase");
        self.phase = phase;
    }

    /// Run one reflection step. `input` is `None` on a heartbeat.
    ///
    /// On error the phase that failed is reported and neither state nor
    /// memory changed. Console output from Acting may already have been
    /// written.
    pub async fn step(
        &mut self,
        input: Option<String>,
        console: &mut dyn Console,
    ) -> std::result::Result<StepReport, StepError> {
        let result = self.run_step(input, console).await;
        self.enter(LoopPhase::Idle);
        result
    }

    async fn run_step(
        &mut self,
        input: Option<String>,
        console: &mut dyn Console,
    ) -> std::result::Result<StepReport, StepError> {
        // Sensing
        self.enter(LoopPhase::Sensing);
        let perception = Perception {
            input,
            received_at: Utc::now(),
            conversation: self.conversation.recent(self.settings.conversation_window).to_vec(),
        };
        let query = perception.input.clone().unwrap_or_default();
        let k = self.settings.default_k;
        let (state, recall) = self
            .with_stores(move |s| {
                let state = s.state.current().clone();
                let filter = SearchFilter::default().exclude_consolidated();
                let recall = s.memory.retrieve_relevant(&query, &state, k, &filter)?;
                Ok((state, recall))
            })
            .await
            .map_err(StepError::at(LoopPhase::Sensing))?;
        debug!(retrieved = recall.entries.len(), mode = ?recall.mode, "memories retrieved");

        // Acting
        self.enter(LoopPhase::Acting);
        let action = self
            .collaborators
            .actor
            .generate_action(&self.identity, &state, &perception, &recall.entries)
            .await
            .map_err(StepError::at(LoopPhase::Acting))?;
        if let Some(text) = action.output() {
            console
                .write_output(text)
                .await
                .map_err(|e| StepError::at(LoopPhase::Acting)(e.into()))?;
        }

        // Reflecting
        self.enter(LoopPhase::Reflecting);
        let reflection = self
            .collaborators
            .reflector
            .reflect(&self.identity, &state, &perception, &recall.entries, &action)
            .await
            .map_err(StepError::at(LoopPhase::Reflecting))?;

        // Persisting
        self.enter(LoopPhase::Persisting);
        let step_id = Uuid::now_v7().to_string();
        let mut next = reflection.state;
        next.last_action = Some(action.summary());
        if perception.input.is_some() {
            next.last_interaction = Some(perception.received_at);
        }
        let memories: Vec<MemoryContent> = reflection
            .memories
            .into_iter()
            .map(|m| {
                m.with_metadata("step_id", step_id.clone())
                    .with_metadata("source_action", action.kind())
                    .with_metadata("focus", next.focus.clone())
            })
            .collect();

        let to_commit = next.clone();
        let (formed, last_consolidation) = self
            .with_stores(move |s| {
                s.state.validate_next(&to_commit)?;
                let prepared = memories
                    .into_iter()
                    .map(|m| s.memory.prepare(m))
                    .collect::<Result<Vec<_>>>()?;
                let committed = s.memory.commit(prepared)?;
                if let Err(e) = s.state.advance(to_commit) {
                    let ids: Vec<u64> = committed.entries.iter().map(|m| m.id).collect();
                    if let Err(rollback) = s.memory.rollback(committed) {
                        error!(
                            ?ids,
                            state_error = %e,
                            error = %rollback,
                            "state write failed and memories could not be rolled back"
                        );
                        return Err(Error::PartialCommit {
                            ids,
                            state_error: Box::new(e),
                            rollback_error: Box::new(rollback),
                        });
                    }
                    debug!(?ids, "memories rolled back after state write failed");
                    return Err(e);
                }
                s.memory.index_committed(&committed.entries);
                Ok((committed.entries, s.memory.last_consolidation()))
            })
            .await
            .map_err(StepError::at(LoopPhase::Persisting))?;

        if let Some(text) = &perception.input {
            self.conversation.push(Role::User, text.clone(), perception.received_at);
        }
        if let Some(text) = action.output() {
            self.conversation.push(Role::Agent, text, Utc::now());
        }
        self.steps_since_consolidation += 1;
        info!(step_id = %step_id, focus = %next.focus, formed = formed.len(), "step committed");

        let consolidated = self.maybe_consolidate(last_consolidation).await;

        Ok(StepReport {
            step_id,
            action,
            state: next,
            retrieved: recall.entries.len(),
            retrieval_mode: recall.mode,
            formed,
            consolidated,
        })
    }

    async fn maybe_consolidate(&mut self, last_logged: Option<DateTime<Utc>>) -> Option<MemoryEntry> {
        if !self.settings.consolidation_enabled {
            return None;
        }
        let last_run = last_logged.max(self.last_consolidation_attempt);
        if !self.schedule.is_due(last_run, self.steps_since_consolidation, Utc::now()) {
            return None;
        }
        self.consolidate_now().await
    }

    /// Run a consolidation pass over the configured trailing window.
    /// Failures are logged, never returned: consolidation is housekeeping.
    pub async fn consolidate_now(&mut self) -> Option<MemoryEntry> {
        self.last_consolidation_attempt = Some(Utc::now());
        self.steps_since_consolidation = 0;
        let window = ConsolidationWindow::trailing(self.settings.consolidation_span);
        let synthesizer = Arc::clone(&self.collaborators.synthesizer);
        match self
            .with_stores(move |s| s.memory.consolidate(&window, synthesizer.as_ref()))
            .await
        {
            Ok(summary) => summary,
            Err(e) => {
                warn!(error = %e, "consolidation failed");
                None
            }
        }
    }

    /// Read input and step until an exit word, end of input, or Ctrl-C,
    /// then shut down. Failed steps are reported on the console and the
    /// loop carries on from the last committed state.
    pub async fn run(&mut self, console: &mut dyn Console) -> Result<()> {
        info!(name = %self.identity.name, "agent started");
        loop {
            let tick = tokio::select! {
                read = read_with_heartbeat(console, self.settings.heartbeat) => read?,
                _ = tokio::signal::ctrl_c() => Tick::Closed,
            };
            let input = match tick {
                Tick::Closed => break,
                Tick::Heartbeat => None,
                Tick::Input(line) => {
                    let line = line.trim().to_string();
                    if line.is_empty() {
                        continue;
                    }
                    if self.settings.exit_words.iter().any(|w| w.eq_ignore_ascii_case(&line)) {
                        break;
                    }
                    Some(line)
                }
            };
            if let Err(e) = self.step(input, console).await {
                warn!(phase = %e.phase, error = %e.source, "step failed");
                console.write_output(&format!("[step failed while {}: {}]", e.phase, e.source)).await?;
            }
        }
        self.shutdown().await
    }

    /// Save the conversation as one memory and, if configured, consolidate.
    pub async fn shutdown(&mut self) -> Result<()> {
        if !self.conversation.is_empty() {
            let content = MemoryContent::new(MemoryType::Conversation, self.conversation.transcript())
                .with_metadata("message_count", self.conversation.len())
                .with_metadata("participants", json!(self.conversation.participants()));
            match self.with_stores(move |s| s.memory.form(content)).await {
                Ok(entry) => info!(id = entry.id, "conversation saved"),
                Err(Error::Embedding { id, reason }) => {
                    warn!(id = ?id, reason = %reason, "conversation saved without embedding")
                }
                Err(e) => return Err(e),
            }
            self.conversation.clear();
        }
        if self.settings.consolidation_enabled && self.settings.consolidate_on_shutdown {
            self.consolidate_now().await;
        }
        info!(name = %self.identity.name, "agent stopped");
        Ok(())
    }

    async fn with_stores<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Stores) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let stores = Arc::clone(&self.stores);
        tokio::task::spawn_blocking(move || {
            let mut guard = stores
                .lock()
                .map_err(|_| Error::Internal("store lock poisoned".into()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| Error::Internal(format!("blocking task failed: {e}")))?
    }
}

enum Tick {
    Input(String),
    Heartbeat,
    Closed,
}

async fn read_with_heartbeat(
    console: &mut dyn Console,
    heartbeat: Option<Duration>,
) -> std::io::Result<Tick> {
    let read = async {
        Ok::<_, std::io::Error>(match console.read_input().await? {
            Some(line) => Tick::Input(line),
            None => Tick::Closed,
        })
    };
    match heartbeat {
        Some(period) => tokio::time::timeout(period, read)
            .await
            .unwrap_or(Ok(Tick::Heartbeat)),
        None => read.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_display() {
        assert_eq!(LoopPhase::Reflecting.to_string(), "reflecting");
        let e = StepError {
            phase: LoopPhase::Acting,
            source: Error::collaborator("action generator", "timeout"),
        };
        assert_eq!(
            e.to_string(),
            "step failed while acting: action generator collaborator failed: timeout"
        );
    }

    #[test]
    fn settings_from_config() {
        let mut config = MidoConfig::default();
        config.agent.heartbeat_secs = 0;
        assert!(AgentSettings::from_config(&config).heartbeat.is_none());
        config.agent.heartbeat_secs = 30;
        assert_eq!(
            AgentSettings::from_config(&config).heartbeat,
            Some(Duration::from_secs(30))
        );
    }
}
