//! Per-agent configuration: `~/.mido/<name>/mido.toml` plus environment overrides.

use anyhow::{ensure, Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::identity::MidoIdentity;
use crate::memory::consolidation::{ConsolidationPolicy, PrunePolicy};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct MidoConfig {
    pub identity: MidoIdentity,
    pub initial_state: InitialStateConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub retrieval: RetrievalConfig,
    pub importance: ImportanceConfig,
    pub consolidation: ConsolidationConfig,
    pub pruning: PruningConfig,
    pub agent: AgentConfig,
}

/// State the agent starts from before it has any history.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct InitialStateConfig {
    pub focus: String,
    pub emotional_state: String,
    pub energy: u8,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// Agent home directory. Empty means `~/.mido/<identity.name>`.
    pub home: String,
    /// fsync every append to the memory log and state history.
    pub sync_writes: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `hashing` (offline, deterministic) or `openai`.
    pub provider: String,
    pub model: String,
    pub dimensions: usize,
    pub base_url: String,
    pub api_key_env: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub base_url: String,
    pub api_key_env: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_k: usize,
}

/// Base importance per memory type plus the salience and decay terms.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ImportanceConfig {
    pub episodic: f64,
    pub semantic: f64,
    pub procedural: f64,
    pub reflection: f64,
    pub conversation: f64,
    pub salience_weight: f64,
    /// Hours for decayed importance to halve. Zero disables decay.
    pub half_life_hours: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ConsolidationConfig {
    pub enabled: bool,
    /// How far back a consolidation pass looks.
    pub window_hours: u64,
    /// Run at most this often. Zero disables the time trigger.
    pub interval_hours: u64,
    /// Also run every N steps. Zero disables the step trigger.
    pub every_steps: u64,
    /// Only entries whose decayed importance is at or below this are folded.
    pub max_importance: f64,
    /// Only entries at least this old are folded.
    pub min_age_minutes: u64,
    pub min_entries: usize,
    pub max_entries: usize,
    /// Multiplier applied to the importance of folded entries.
    pub importance_factor: f64,
    /// `digest` or `llm`.
    pub synthesizer: String,
    pub on_shutdown: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct PruningConfig {
    pub importance_threshold: f64,
    pub retention_days: u64,
    pub min_access_keep: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct AgentConfig {
    /// Step without input after this many idle seconds. Zero waits forever.
    pub heartbeat_secs: u64,
    /// Conversation turns shown to the collaborators.
    pub conversation_window: usize,
    pub exit_words: Vec<String>,
}

impl Default for InitialStateConfig {
    fn default() -> Self {
        Self {
            focus: "getting oriented".into(),
            emotional_state: "calm".into(),
            energy: 80,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            home: String::new(),
            sync_writes: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "hashing".into(),
            model: "hashing-v1".into(),
            dimensions: 256,
            base_url: "https://api.openai.com/v1".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            timeout_secs: 30,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".into(),
            model: "claude-3-5-sonnet-latest".into(),
            base_url: "https://api.anthropic.com".into(),
            api_key_env: "ANTHROPIC_API_KEY".into(),
            max_tokens: 1024,
            temperature: 0.7,
            timeout_secs: 60,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { default_k: 5 }
    }
}

impl Default for ImportanceConfig {
    fn default() -> Self {
        Self {
            episodic: 0.4,
            semantic: 0.6,
            procedural: 0.6,
            reflection: 0.7,
            conversation: 0.5,
            salience_weight: 0.3,
            half_life_hours: 168.0,
        }
    }
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_hours: 24,
            interval_hours: 24,
            every_steps: 0,
            max_importance: 0.6,
            min_age_minutes: 60,
            min_entries: 2,
            max_entries: 50,
            importance_factor: 0.5,
            synthesizer: "digest".into(),
            on_shutdown: true,
        }
    }
}

impl Default for PruningConfig {
    fn default() -> Self {
        Self {
            importance_threshold: 0.5,
            retention_days: 30,
            min_access_keep: 3,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: 0,
            conversation_window: 20,
            exit_words: vec!["exit".into(), "quit".into(), "bye".into()],
        }
    }
}

/// Returns `~/.mido/`
pub fn default_mido_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mido")
}

/// Returns the default config file path for an agent: `~/.mido/<agent>/mido.toml`
pub fn default_config_path(agent: &str) -> PathBuf {
    default_mido_dir().join(agent).join("mido.toml")
}

impl MidoConfig {
    /// Load the named agent's config then apply env var overrides.
    pub fn load(agent: &str) -> Result<Self> {
        let path = default_config_path(agent);
        let exists = path.exists();
        let mut config = Self::load_from(&path)?;
        if !exists {
            config.identity.name = agent.to_string();
        }
        Ok(config)
    }

    /// Load from a specific path, then apply env var overrides. A missing
    /// file yields defaults.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            MidoConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides (MIDO_HOME, MIDO_LOG_LEVEL,
    /// MIDO_EMBEDDING_PROVIDER, MIDO_LLM_MODEL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("MIDO_HOME") {
            self.storage.home = val;
        }
        if let Ok(val) = std::env::var("MIDO_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("MIDO_EMBEDDING_PROVIDER") {
            self.embedding.provider = val;
        }
        if let Ok(val) = std::env::var("MIDO_LLM_MODEL") {
            self.llm.model = val;
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.identity.name.trim().is_empty(), "identity.name must not be empty");
        ensure!(
            (1..=100).contains(&self.initial_state.energy),
            "initial_state.energy must be within 1..=100, got {}",
            self.initial_state.energy
        );
        ensure!(self.embedding.dimensions > 0, "embedding.dimensions must be positive");
        ensure!(
            (0.0..=1.0).contains(&self.pruning.importance_threshold),
            "pruning.importance_threshold must be within [0, 1]"
        );
        ensure!(
            (0.0..=1.0).contains(&self.consolidation.max_importance),
            "consolidation.max_importance must be within [0, 1]"
        );
        ensure!(
            (0.0..=1.0).contains(&self.consolidation.importance_factor),
            "consolidation.importance_factor must be within [0, 1]"
        );
        ensure!(
            self.consolidation.min_entries >= 1
                && self.consolidation.max_entries >= self.consolidation.min_entries,
            "consolidation needs 1 <= min_entries <= max_entries"
        );
        ensure!(
            matches!(self.consolidation.synthesizer.as_str(), "digest" | "llm"),
            "unknown consolidation.synthesizer: {}. Supported: digest, llm",
            self.consolidation.synthesizer
        );
        Ok(())
    }

    /// Agent home directory, expanding `~` if needed.
    pub fn home_dir(&self) -> PathBuf {
        if self.storage.home.is_empty() {
            default_mido_dir().join(&self.identity.name)
        } else {
            expand_tilde(&self.storage.home)
        }
    }

    pub fn memory_log_path(&self) -> PathBuf {
        self.home_dir().join("memory.jsonl")
    }

    pub fn state_path(&self) -> PathBuf {
        self.home_dir().join("state.jsonl")
    }

    pub fn index_path(&self) -> PathBuf {
        self.home_dir().join("index.db")
    }

    pub fn consolidation_policy(&self) -> ConsolidationPolicy {
        let c = &self.consolidation;
        ConsolidationPolicy {
            max_importance: c.max_importance,
            min_age: Duration::minutes(c.min_age_minutes as i64),
            min_entries: c.min_entries,
            max_entries: c.max_entries,
            importance_factor: c.importance_factor,
        }
    }

    pub fn prune_policy(&self) -> PrunePolicy {
        PrunePolicy {
            importance_threshold: self.pruning.importance_threshold,
            retention: Duration::days(self.pruning.retention_days as i64),
            min_access_keep: self.pruning.min_access_keep,
        }
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
