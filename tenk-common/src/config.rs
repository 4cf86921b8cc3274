//! Configuration loading and data directory resolution
//!
//! Resolution priority for each value: environment variable, then TOML config
//! file, then compiled default. API keys are never written back to disk.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Full application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Root data directory (database, filing cache, vector store)
    pub data_dir: PathBuf,
    /// Product/knowledge catalog file (JSON)
    pub catalog_path: PathBuf,
    /// Static candidate feed file (JSON), used by the default feed
    pub candidates_path: PathBuf,
    /// User-agent string sent to SEC EDGAR (required by their fair-access policy)
    pub sec_user_agent: String,
    pub reasoning: ReasoningConfig,
    pub embedding: EmbeddingConfig,
    pub scoring: ScoringWeights,
    pub referee: RefereeConfig,
    pub chunking: ChunkingConfig,
}

/// Per-provider connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub requests_per_minute: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: String::new(),
            requests_per_minute: 60,
        }
    }
}

/// Reasoning-provider chain configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    /// Provider tried first ("groq" or "openai")
    pub primary: String,
    /// Providers tried in order when the primary fails
    pub fallbacks: Vec<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub openai: ProviderConfig,
    pub groq: ProviderConfig,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            primary: "groq".to_string(),
            fallbacks: vec!["openai".to_string()],
            temperature: 0.3,
            max_tokens: 4096,
            openai: ProviderConfig {
                model: "gpt-4o-mini".to_string(),
                ..Default::default()
            },
            groq: ProviderConfig {
                model: "qwen/qwen3-32b".to_string(),
                ..Default::default()
            },
        }
    }
}

/// Embedding-provider chain configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub primary: String,
    pub fallbacks: Vec<String>,
    /// Embedding dimension (local fallback produces vectors of this size)
    pub dimension: usize,
    pub openai: ProviderConfig,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            primary: "openai".to_string(),
            fallbacks: vec!["local".to_string()],
            dimension: 384,
            openai: ProviderConfig {
                model: "text-embedding-3-small".to_string(),
                ..Default::default()
            },
        }
    }
}

/// Additive priority-score weights
///
/// The shape of the rule (eligibility gate + ordered scoring) is a contract;
/// the constants are tunables.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub base: f64,
    pub high_value_boost: f64,
    pub strong_avg_boost: f64,
    pub findings_boost: f64,
    pub frequent_penalty: f64,
    /// A single past fit score at or above this marks the company high-value
    pub high_value_threshold: f64,
    pub strong_avg_threshold: f64,
    pub findings_threshold: i64,
    pub frequent_threshold: i64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            base: 50.0,
            high_value_boost: 25.0,
            strong_avg_boost: 15.0,
            findings_boost: 10.0,
            frequent_penalty: 10.0,
            high_value_threshold: 80.0,
            strong_avg_threshold: 70.0,
            findings_threshold: 10,
            frequent_threshold: 3,
        }
    }
}

/// Validate/revise loop settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RefereeConfig {
    /// Maximum validate/revise attempts per company
    pub max_iterations: u32,
    /// Minimum finding confidence the referee accepts
    pub min_confidence: f32,
}

impl Default for RefereeConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            min_confidence: 0.6,
        }
    }
}

/// Filing text chunking settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            catalog_path: data_dir.join("products.json"),
            candidates_path: data_dir.join("companies.json"),
            data_dir,
            sec_user_agent: "tenk/0.1.0 (research; contact@example.com)".to_string(),
            reasoning: ReasoningConfig::default(),
            embedding: EmbeddingConfig::default(),
            scoring: ScoringWeights::default(),
            referee: RefereeConfig::default(),
            chunking: ChunkingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file, falling back to defaults when the
    /// file is absent. Environment variables override file values.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => default_config_path(),
        };

        let mut config = match path {
            Some(ref p) if p.exists() => {
                let content = std::fs::read_to_string(p)?;
                toml::from_str(&content)
                    .map_err(|e| Error::Config(format!("Parse {} failed: {}", p.display(), e)))?
            }
            _ => AppConfig::default(),
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("TENK_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(key) = std::env::var("TENK_OPENAI_API_KEY") {
            self.reasoning.openai.api_key = Some(key.clone());
            self.embedding.openai.api_key = Some(key);
        }
        if let Ok(key) = std::env::var("TENK_GROQ_API_KEY") {
            self.reasoning.groq.api_key = Some(key);
        }
        if let Ok(ua) = std::env::var("TENK_SEC_USER_AGENT") {
            self.sec_user_agent = ua;
        }
    }

    /// SQLite database path inside the data directory
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("tenk.db")
    }

    /// Filing cache directory
    pub fn filings_dir(&self) -> PathBuf {
        self.data_dir.join("filings")
    }
}

/// Atomically write a TOML config file (temp file + rename)
pub fn write_toml_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize config failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tenk").join("config.toml"))
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("tenk"))
        .unwrap_or_else(|| PathBuf::from("./tenk_data"))
}
