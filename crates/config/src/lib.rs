use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

// ── Generation backend ────────────────────────────────────────────────────────

/// OpenAI-compatible chat completion endpoint used for generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL without the trailing `/chat/completions`.
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    /// Bearer token.  Overridden at load time by `RECALL_API_KEY` or
    /// `GROQ_API_KEY` when either is set.
    pub api_key: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            model: "llama3-8b-8192".to_string(),
            temperature: 0.7,
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    /// Base URL for the Ollama API.  Overridden by `OLLAMA_BASE_URL`.
    pub base_url: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "all-minilm".to_string(),
            base_url: "http://localhost:11434".to_string(),
        }
    }
}

// ── Memory subsystem ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Directory holding the index file and the record table.
    pub data_dir: String,
    pub index_file: String,
    pub records_file: String,
    /// Output dimensionality of the embedding model.  Every stored and query
    /// vector must have exactly this length.
    pub embedding_dim: usize,
    /// Number of semantic matches recalled per turn.
    pub default_k: usize,
    /// Squared-L2 cut-off for recalled matches.  `None` keeps every match.
    pub max_distance: Option<f32>,
    /// Turns kept per session in the sliding-window buffer.
    pub buffer_capacity: usize,
    /// Upper bound on live session buffers; the least recently used session
    /// is dropped beyond it.
    pub max_sessions: usize,
    /// Sessions idle longer than this are forgotten.  `0` disables expiry.
    pub session_idle_ttl_secs: u64,
    /// Extra attempts after a failed index write before giving up and logging.
    pub persist_retries: u32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            data_dir: ".recall".to_string(),
            index_file: "memory_index.bin".to_string(),
            records_file: "memory_records.redb".to_string(),
            embedding_dim: 384,
            default_k: 3,
            max_distance: None,
            buffer_capacity: 6,
            max_sessions: 1024,
            session_idle_ttl_secs: 3600,
            persist_retries: 2,
        }
    }
}

impl MemoryConfig {
    pub fn index_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join(&self.index_file)
    }

    pub fn records_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join(&self.records_file)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub memory: MemoryConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)
                .with_context(|| format!("parsing config {}", path.display()))?;
        }

        // Env overrides take precedence over the config file.
        for var in ["RECALL_API_KEY", "GROQ_API_KEY"] {
            if let Ok(key) = env::var(var) {
                if !key.trim().is_empty() {
                    config.llm.api_key = key;
                    break;
                }
            }
        }

        if let Ok(value) = env::var("OLLAMA_BASE_URL") {
            if !value.is_empty() {
                config.embedding.base_url = value;
            }
        }

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
