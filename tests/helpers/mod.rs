#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use mido::agent::{
    ActionDescriptor, ActionGenerator, Agent, AgentSettings, Collaborators, Console, Perception,
    Reflection, Reflector,
};
use mido::config::{ImportanceConfig, InitialStateConfig};
use mido::embedding::hashing::HashingEmbedder;
use mido::embedding::EmbeddingProvider;
use mido::identity::MidoIdentity;
use mido::memory::consolidation::{DigestSynthesizer, IntervalSchedule};
use mido::memory::importance::RecencyWeighted;
use mido::memory::index::VectorIndex;
use mido::memory::log::{EntryDraft, LogStore};
use mido::memory::{MemoryContent, MemoryEntry, MemoryManager, MemorySettings, MemoryType, Metadata};
use mido::state::{StateSnapshot, StateTracker};
use mido::Error;

pub const DIMS: usize = 64;

pub fn log_path(dir: &Path) -> std::path::PathBuf {
    dir.join("memory.jsonl")
}

pub fn index_path(dir: &Path) -> std::path::PathBuf {
    dir.join("index.db")
}

/// Manager over `dir` with an on-disk index and the given embedder.
pub fn open_manager_with(
    dir: &Path,
    embedder: Arc<dyn EmbeddingProvider>,
    settings: MemorySettings,
) -> Result<MemoryManager, Error> {
    let log = LogStore::open(log_path(dir), false)?;
    let index = VectorIndex::open(index_path(dir), embedder.model_id(), embedder.dimensions())?;
    MemoryManager::new(
        log,
        index,
        embedder,
        Arc::new(steady_importance()),
        settings,
    )
}

/// Default per-type scores with decay switched off, so thresholds compare
/// against the stored importance regardless of entry age.
pub fn steady_importance() -> RecencyWeighted {
    RecencyWeighted::new(ImportanceConfig {
        half_life_hours: 0.0,
        ..ImportanceConfig::default()
    })
}

/// Migrated in-memory index database.
pub fn test_db() -> rusqlite::Connection {
    mido::db::open_memory_database().unwrap()
}

/// Manager over `dir` with the hashing embedder and default settings.
pub fn open_manager(dir: &Path) -> MemoryManager {
    open_manager_with(dir, Arc::new(HashingEmbedder::new(DIMS)), MemorySettings::default()).unwrap()
}

/// Append entries with explicit timestamps straight to the log, bypassing
/// the manager. Used to fabricate old memories.
pub fn seed_log(dir: &Path, drafts: &[(MemoryType, &str, f64, DateTime<Utc>)]) -> Vec<MemoryEntry> {
    let mut log = LogStore::open(log_path(dir), false).unwrap();
    drafts
        .iter()
        .map(|(memory_type, content, importance, timestamp)| {
            log.append(EntryDraft {
                timestamp: *timestamp,
                memory_type: *memory_type,
                content: content.to_string(),
                importance: *importance,
                metadata: Metadata::new(),
            })
            .unwrap()
        })
        .collect()
}

pub fn days_ago(days: i64) -> DateTime<Utc> {
    Utc::now() - Duration::days(days)
}

// ── Embedders ────────────────────────────────────────────────────────

/// Always fails, like an unreachable embedding service.
pub struct FailingEmbedder;

impl EmbeddingProvider for FailingEmbedder {
    fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        anyhow::bail!("embedding service unavailable")
    }

    fn dimensions(&self) -> usize {
        DIMS
    }

    fn model_id(&self) -> &str {
        "hashing-v1-64"
    }
}

/// Hashing embedder that can be switched off and counts its calls.
pub struct SwitchableEmbedder {
    inner: HashingEmbedder,
    pub available: AtomicBool,
    pub calls: AtomicUsize,
}

impl SwitchableEmbedder {
    pub fn new() -> Self {
        Self {
            inner: HashingEmbedder::new(DIMS),
            available: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

impl EmbeddingProvider for SwitchableEmbedder {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.available.load(Ordering::SeqCst) {
            anyhow::bail!("embedding service unavailable");
        }
        self.inner.embed(text)
    }

    fn dimensions(&self) -> usize {
        DIMS
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}

// ── Loop collaborators ───────────────────────────────────────────────

/// Speaks a fixed line, or fails when `fail` is set.
pub struct ScriptedActor {
    pub line: String,
    pub fail: bool,
}

impl ScriptedActor {
    pub fn says(line: &str) -> Self {
        Self {
            line: line.into(),
            fail: false,
        }
    }
}

#[async_trait]
impl ActionGenerator for ScriptedActor {
    async fn generate_action(
        &self,
        _identity: &MidoIdentity,
        _state: &StateSnapshot,
        _perception: &Perception,
        _memories: &[MemoryEntry],
    ) -> mido::Result<ActionDescriptor> {
        if self.fail {
            return Err(Error::collaborator("action generator", "scripted failure"));
        }
        Ok(ActionDescriptor::Speak(self.line.clone()))
    }
}

type ReflectFn = dyn Fn(&StateSnapshot, &Perception) -> mido::Result<Reflection> + Send + Sync;

/// Reflects through a closure and records the previous state it was given.
pub struct ScriptedReflector {
    script: Box<ReflectFn>,
    pub seen: Mutex<Vec<StateSnapshot>>,
}

impl ScriptedReflector {
    pub fn new(
        script: impl Fn(&StateSnapshot, &Perception) -> mido::Result<Reflection> + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// New focus and one memory per step.
    pub fn focusing(focus: &'static str, memory: &'static str, memory_type: MemoryType) -> Self {
        Self::new(move |prev, _| {
            let mut state = prev.successor(Utc::now());
            state.focus = focus.into();
            Ok(Reflection {
                state,
                memories: vec![MemoryContent::new(memory_type, memory)],
            })
        })
    }

    pub fn failing() -> Self {
        Self::new(|_, _| Err(Error::collaborator("reflector", "scripted failure")))
    }
}

#[async_trait]
impl Reflector for ScriptedReflector {
    async fn reflect(
        &self,
        _identity: &MidoIdentity,
        state: &StateSnapshot,
        perception: &Perception,
        _memories: &[MemoryEntry],
        _action: &ActionDescriptor,
    ) -> mido::Result<Reflection> {
        self.seen.lock().unwrap().push(state.clone());
        (self.script)(state, perception)
    }
}

/// Console fed from a queue that records everything written to it.
#[derive(Default)]
pub struct ScriptedConsole {
    pub inputs: VecDeque<String>,
    pub outputs: Vec<String>,
}

impl ScriptedConsole {
    pub fn with_inputs(lines: &[&str]) -> Self {
        Self {
            inputs: lines.iter().map(|l| l.to_string()).collect(),
            outputs: Vec::new(),
        }
    }
}

#[async_trait]
impl Console for ScriptedConsole {
    async fn read_input(&mut self) -> std::io::Result<Option<String>> {
        Ok(self.inputs.pop_front())
    }

    async fn write_output(&mut self, text: &str) -> std::io::Result<()> {
        self.outputs.push(text.to_string());
        Ok(())
    }
}

pub fn open_state(dir: &Path) -> StateTracker {
    StateTracker::open(
        dir.join("state.jsonl"),
        StateSnapshot::initial(&InitialStateConfig::default()),
        false,
    )
    .unwrap()
}

/// Agent over `dir` with consolidation off and the given collaborators.
pub fn test_agent(
    dir: &Path,
    actor: impl ActionGenerator + 'static,
    reflector: Arc<ScriptedReflector>,
) -> Agent {
    let settings = AgentSettings {
        consolidation_enabled: false,
        ..AgentSettings::default()
    };
    Agent::new(
        MidoIdentity::default(),
        open_manager(dir),
        open_state(dir),
        Collaborators {
            actor: Arc::new(actor),
            reflector,
            synthesizer: Arc::new(DigestSynthesizer),
        },
        Box::new(IntervalSchedule {
            interval: Duration::zero(),
            every_steps: 0,
        }),
        settings,
    )
}
