//! Configuration management for codepal
//!
//! Loads the TOML configuration, applies `CODEPAL_SECTION__KEY` environment
//! overrides and validates the result before any component sees it.

use crate::error::{CodePalError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod validator;

pub use validator::ConfigValidator;

/// Schema version written to and accepted from `_meta.schema_version`
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Where persisted indexes and conversation files live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub index_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from("~/.codepal");
        Self {
            index_dir: data_dir.join("indexes"),
            data_dir,
        }
    }
}

/// Which files of a repository are indexed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Extensions (with leading dot) considered source text
    pub extensions: Vec<String>,
    /// Directory names never descended into
    pub ignore_dirs: Vec<String>,
    /// Largest file that is indexed, e.g. "1MB"
    pub max_file_size: String,
}

impl RepositoryConfig {
    pub fn max_file_size_bytes(&self) -> u64 {
        parse_size(&self.max_file_size).unwrap_or(1024 * 1024)
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        let extensions = [
            ".py", ".js", ".ts", ".java", ".cpp", ".c", ".h", ".hpp", ".cs", ".php", ".rb",
            ".go", ".rs", ".swift", ".kt", ".scala", ".r", ".m", ".mm", ".sh", ".bash", ".zsh",
            ".sql", ".html", ".css", ".scss", ".sass", ".xml", ".json", ".yaml", ".yml",
            ".toml", ".ini", ".cfg", ".md", ".txt", ".rst", ".tex",
        ];
        let ignore_dirs = [
            ".git",
            "__pycache__",
            "node_modules",
            ".venv",
            "venv",
            "env",
            "target",
        ];
        Self {
            extensions: extensions.iter().map(|s| s.to_string()).collect(),
            ignore_dirs: ignore_dirs.iter().map(|s| s.to_string()).collect(),
            max_file_size: "1MB".to_string(),
        }
    }
}

/// Chunker settings; sizes are in bytes of UTF-8 text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
    /// Prefer declaration boundaries when a grammar is available
    pub structural: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap: 200,
            structural: true,
        }
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "hash" (built in) or "fastembed" (requires the `fastembed` feature)
    pub provider: String,
    pub model: String,
    pub dimension: usize,
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "hash".to_string(),
            model: "all-MiniLM-L6-v2".to_string(),
            dimension: 384,
            batch_size: 32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    Cosine,
    L2,
}

impl DistanceMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::L2 => "l2",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintMode {
    /// Relative path, size and modification time per file
    Metadata,
    /// Relative path and BLAKE3 of the file content
    Content,
}

/// Vector index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    pub metric: DistanceMetric,
    /// HNSW M parameter (connections per layer)
    pub hnsw_m: usize,
    /// HNSW construction parameter (higher = better recall, slower build)
    pub hnsw_ef_construction: usize,
    /// HNSW search breadth
    pub ef_search: usize,
    /// Indexes up to this many vectors are scanned exhaustively
    pub exact_search_threshold: usize,
    pub fingerprint: FingerprintMode,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            metric: DistanceMetric::Cosine,
            hnsw_m: 16,
            hnsw_ef_construction: 200,
            ef_search: 64,
            exact_search_threshold: 2048,
            fingerprint: FingerprintMode::Metadata,
        }
    }
}

/// Limits applied by the repository tools
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    pub search_k: usize,
    pub max_search_k: usize,
    pub snippet_chars: usize,
    /// Output cap of a single file read
    pub max_read_bytes: usize,
    /// Bytes pulled from disk before line selection
    pub max_file_bytes: usize,
    pub max_list_depth: usize,
    pub max_list_entries: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            search_k: 5,
            max_search_k: 20,
            snippet_chars: 200,
            max_read_bytes: 32 * 1024,
            max_file_bytes: 1024 * 1024,
            max_list_depth: 3,
            max_list_entries: 500,
        }
    }
}

/// LLM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "offline", "openai" or "ollama"
    pub provider: String,
    pub model: String,
    pub base_url: String,
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout: String,
    pub max_retries: u32,
}

impl LlmConfig {
    pub fn request_timeout(&self) -> Duration {
        parse_duration(&self.request_timeout).unwrap_or(Duration::from_secs(30))
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "offline".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.1,
            max_tokens: 1024,
            request_timeout: "30s".to_string(),
            max_retries: 3,
        }
    }
}

/// Agent loop bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub max_steps: usize,
    pub max_selection_retries: usize,
    pub max_duration: String,
    /// Prior conversation turns included in prompts
    pub history_turns: usize,
    pub max_observation_chars: usize,
}

impl AgentConfig {
    pub fn max_duration(&self) -> Duration {
        parse_duration(&self.max_duration).unwrap_or(Duration::from_secs(120))
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 5,
            max_selection_retries: 2,
            max_duration: "120s".to_string(),
            history_turns: 6,
            max_observation_chars: 12_000,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CodePalError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| CodePalError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| CodePalError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: CODEPAL_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("CODEPAL_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "LLM__PROVIDER" => self.llm.provider = value.to_string(),
            "LLM__MODEL" => self.llm.model = value.to_string(),
            "LLM__BASE_URL" => self.llm.base_url = value.to_string(),
            "EMBEDDING__PROVIDER" => self.embedding.provider = value.to_string(),
            "EMBEDDING__MODEL" => self.embedding.model = value.to_string(),
            "AGENT__MAX_STEPS" => self.agent.max_steps = parse_env_number(path, value)?,
            "CHUNKING__CHUNK_SIZE" => self.chunking.chunk_size = parse_env_number(path, value)?,
            "CHUNKING__OVERLAP" => self.chunking.overlap = parse_env_number(path, value)?,
            "INDEX__METRIC" => {
                self.index.metric = match value {
                    "cosine" => DistanceMetric::Cosine,
                    "l2" => DistanceMetric::L2,
                    other => {
                        return Err(CodePalError::InvalidConfigValue {
                            path: path.to_string(),
                            message: format!("Unknown metric '{}'", other),
                        })
                    }
                };
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| CodePalError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("codepal").join("config.toml"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: SCHEMA_VERSION.to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig::default(),
            repository: RepositoryConfig::default(),
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            index: IndexConfig::default(),
            tools: ToolsConfig::default(),
            llm: LlmConfig::default(),
            agent: AgentConfig::default(),
        }
    }
}

fn parse_env_number(path: &str, value: &str) -> Result<usize> {
    value.parse().map_err(|_| CodePalError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}' as a number", value),
    })
}

/// Parse size strings like "512", "64KB", "10MB", "1GB"
pub fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim().to_uppercase();
    let (digits, multiplier) = if let Some(n) = s.strip_suffix("KB") {
        (n, 1024)
    } else if let Some(n) = s.strip_suffix("MB") {
        (n, 1024 * 1024)
    } else if let Some(n) = s.strip_suffix("GB") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = s.strip_suffix('B') {
        (n, 1)
    } else {
        (s.as_str(), 1)
    };
    digits.trim().parse::<u64>().ok().map(|n| n * multiplier)
}

/// Parse duration strings like "500ms", "30s", "5m", "1h" (bare numbers are seconds)
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(n) = s.strip_suffix("ms") {
        return n.parse().ok().map(Duration::from_millis);
    }
    let (digits, unit) = match s.char_indices().last() {
        Some((i, 's')) => (&s[..i], 1),
        Some((i, 'm')) => (&s[..i], 60),
        Some((i, 'h')) => (&s[..i], 3600),
        _ => (s, 1),
    };
    digits.parse::<u64>().ok().map(|n| Duration::from_secs(n * unit))
}

/// Expand a leading `~/` to the home directory
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| CodePalError::Config("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| CodePalError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}
