//! KnowVault configuration management
//!
//! The TOML file only holds non-secret settings. The API key and database URL
//! are resolved once at startup by [`Settings::resolve`] and then handed to
//! constructors explicitly.

use crate::error::{Error, Result};
use crate::storage::{redact_url, StoreLocation};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main KnowVault configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowVaultConfig {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// LLM provider configuration
    pub llm: LlmSection,

    /// Storage configuration
    pub storage: StorageConfig,

    /// Ingestion and retrieval configuration
    pub knowledge: KnowledgeConfig,

    /// Chat session configuration
    pub session: SessionConfig,

    /// Tool configuration
    pub tools: ToolsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl KnowVaultConfig {
    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse TOML text; missing sections and fields take their defaults
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("invalid config: {}", e)))
    }

    /// Render as pretty TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Default config file location (`<config dir>/knowvault/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs_next::config_dir().map(|p| p.join("knowvault").join("config.toml"))
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Allowed CORS origins (empty allows any origin)
    pub cors_origins: Vec<String>,

    /// Directory uploaded files are written to before ingestion
    pub upload_dir: PathBuf,

    /// Maximum accepted upload body in bytes
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            cors_origins: Vec::new(),
            upload_dir: PathBuf::from("temp_uploads"),
            max_upload_bytes: 25 * 1024 * 1024,
        }
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// OpenAI-compatible API base URL
    pub base_url: String,

    /// Environment variable holding the API key
    pub api_key_env: String,

    /// Chat model
    pub model: String,

    /// Embedding model
    pub embedding_model: String,

    /// System instructions for every conversation
    pub instructions: String,

    /// Max tokens per completion
    pub max_tokens: u32,

    /// Max tool-call round trips per chat turn
    pub max_tool_rounds: usize,

    /// HTTP timeout for provider and tool requests
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            instructions: "You are a helpful assistant. Search your knowledge base before \
                           answering and answer in markdown."
                .to_string(),
            max_tokens: 1024,
            max_tool_rounds: 4,
            request_timeout_secs: 60,
        }
    }
}

impl LlmSection {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Environment variable holding the database URL
    pub database_url_env: String,

    /// Inline database URL, used when the environment variable is unset
    pub database_url: Option<String>,

    /// Reject tenant identifiers that sanitize onto a claimed namespace.
    /// Turning this off lets e.g. ("alice", "s1_x") and ("alice_s1", "x")
    /// share one document table.
    pub strict_isolation: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url_env: "KNOWVAULT_DATABASE_URL".to_string(),
            database_url: None,
            strict_isolation: true,
        }
    }
}

/// Ingestion and retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    /// Max characters per chunk
    pub chunk_size: usize,

    /// Characters shared by consecutive chunks
    pub chunk_overlap: usize,

    /// Chunks retrieved per chat turn
    pub top_k: usize,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 100,
            top_k: 5,
        }
    }
}

/// Chat session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Past exchanges of the session added to each turn
    pub history_runs: usize,

    /// Session id used when a chat request omits one
    pub default_session_id: String,

    /// Print replies in the terminal chat as they are generated
    pub stream: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_runs: 5,
            default_session_id: "default_session".to_string(),
            stream: true,
        }
    }
}

/// Tool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Offer the web search tool
    pub web_search: bool,

    /// Instant-answer endpoint used by web search
    pub web_search_url: String,

    /// Offer the `save_memory` tool
    pub agentic_memory: bool,

    /// Extract user facts automatically after each turn
    pub user_memories: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            web_search: true,
            web_search_url: crate::agent::tools::DEFAULT_SEARCH_URL.to_string(),
            agentic_memory: true,
            user_memories: true,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

/// Process-wide secrets resolved at startup
#[derive(Clone)]
pub struct Settings {
    /// LLM provider API key
    pub api_key: String,
    /// Raw database URL
    pub database_url: String,
    /// Parsed store location
    pub location: StoreLocation,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("api_key", &"<redacted>")
            .field("database_url", &redact_url(&self.database_url))
            .field("location", &self.location)
            .finish()
    }
}

impl Settings {
    /// Resolve secrets from the process environment
    pub fn resolve(config: &KnowVaultConfig) -> Result<Self> {
        Self::resolve_with(config, |name| std::env::var(name).ok())
    }

    /// Resolve secrets through an explicit lookup.
    ///
    /// A missing API key or database URL is a fatal configuration error.
    pub fn resolve_with<F>(config: &KnowVaultConfig, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());

        let api_key = non_empty(lookup(&config.llm.api_key_env)).ok_or_else(|| {
            Error::Config(format!(
                "LLM API key not set (expected environment variable {})",
                config.llm.api_key_env
            ))
        })?;

        let database_url = non_empty(lookup(&config.storage.database_url_env))
            .or_else(|| non_empty(config.storage.database_url.clone()))
            .ok_or_else(|| {
                Error::Config(format!(
                    "database URL not set (set {} or storage.database_url)",
                    config.storage.database_url_env
                ))
            })?;

        let location = StoreLocation::parse(&database_url)?;

        Ok(Self {
            api_key,
            database_url,
            location,
        })
    }
}
