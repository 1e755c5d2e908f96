//! Configuration handling for memexd.
//!
//! Loaded once at startup from a TOML file (default:
//! `~/.config/memex/config.toml`) and immutable for the process lifetime.
//! `MEMEX_DATA_DIR` / `MEMEX_CONFIG_DIR` override the XDG directories.

use directories::{ProjectDirs, UserDirs};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Watch configuration
    #[serde(default)]
    pub watch: WatchConfig,

    /// Embedding configuration
    #[serde(default)]
    pub embedding: EmbeddingSettings,

    /// Store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Pipeline tuning
    #[serde(default)]
    pub pipeline: PipelineSettings,

    /// Ingestion listener
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Watch-related configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Directory roots to watch
    #[serde(default = "default_roots")]
    pub roots: Vec<PathBuf>,

    /// File extensions to index (without the dot)
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Directory or file names to ignore anywhere in a path
    #[serde(default = "default_ignore")]
    pub ignore: Vec<String>,

    /// Maximum file size to index (bytes)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

fn default_roots() -> Vec<PathBuf> {
    UserDirs::new()
        .and_then(|dirs| dirs.document_dir().map(PathBuf::from))
        .into_iter()
        .collect()
}

fn default_extensions() -> Vec<String> {
    vec![
        "md".to_string(),
        "txt".to_string(),
        "py".to_string(),
        "rs".to_string(),
    ]
}

fn default_ignore() -> Vec<String> {
    vec![
        ".git".to_string(),
        "__pycache__".to_string(),
        "node_modules".to_string(),
        "target".to_string(),
        ".venv".to_string(),
        "venv".to_string(),
    ]
}

fn default_max_file_size() -> u64 {
    2_097_152 // 2MB
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            roots: default_roots(),
            extensions: default_extensions(),
            ignore: default_ignore(),
            max_file_size: default_max_file_size(),
        }
    }
}

/// Embedding-related configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    /// Model identifier
    #[serde(default = "default_model")]
    pub model: String,

    /// Max concurrent inference calls
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Per-call timeout (seconds)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Attempts per embedding call before the path is skipped
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay between attempts (milliseconds)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_model() -> String {
    "sentence-transformers/all-MiniLM-L6-v2".to_string()
}

fn default_max_concurrent() -> usize {
    4
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    200
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_concurrent: default_max_concurrent(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

/// Store-related configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    /// Database location; defaults to `<data dir>/index.lance`
    pub path: Option<PathBuf>,
}

/// Pipeline tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Debounce quiet window (milliseconds)
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Work queue capacity
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Embedding workers; 0 means available parallelism
    #[serde(default)]
    pub workers: usize,

    /// Flush a batch at this many records
    #[serde(default = "default_batch_max_ops")]
    pub batch_max_ops: usize,

    /// Flush a batch at this age (milliseconds)
    #[serde(default = "default_batch_max_delay_ms")]
    pub batch_max_delay_ms: u64,
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_queue_capacity() -> usize {
    256
}

fn default_batch_max_ops() -> usize {
    32
}

fn default_batch_max_delay_ms() -> u64 {
    1000
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            queue_capacity: default_queue_capacity(),
            workers: 0,
            batch_max_ops: default_batch_max_ops(),
            batch_max_delay_ms: default_batch_max_delay_ms(),
        }
    }
}

/// Ingestion listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Enable the TCP reindex-trigger listener
    #[serde(default)]
    pub enabled: bool,

    /// Bind address
    #[serde(default = "default_ingest_bind")]
    pub bind: String,
}

fn default_ingest_bind() -> String {
    "127.0.0.1:9999".to_string()
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_ingest_bind(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load from the default location, falling back to defaults when no
    /// config file exists.
    pub fn load() -> Result<Self, String> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(Some(path)),
            _ => Ok(Self::default()),
        }
    }

    /// Load from an explicit path (must exist) or the default location.
    pub fn load_from(path: Option<PathBuf>) -> Result<Self, String> {
        let path = match path {
            Some(p) => p,
            None => return Self::load(),
        };

        let content = std::fs::read_to_string(&path)
            .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
        toml::from_str(&content).map_err(|e| format!("cannot parse {}: {e}", path.display()))
    }

    /// Default config file path.
    pub fn config_path() -> Option<PathBuf> {
        config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Sample config file content.
    pub fn sample_toml() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# failed to render sample config"))
    }

    /// Resolved store path.
    pub fn store_path(&self) -> Option<PathBuf> {
        match &self.store.path {
            Some(path) => Some(path.clone()),
            None => data_dir().map(|dir| dir.join("index.lance")),
        }
    }
}

/// Data directory (`MEMEX_DATA_DIR` overrides).
pub fn data_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("MEMEX_DATA_DIR") {
        return Some(PathBuf::from(dir));
    }
    ProjectDirs::from("", "", "memex").map(|dirs| dirs.data_dir().to_path_buf())
}

/// Config directory (`MEMEX_CONFIG_DIR` overrides).
pub fn config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("MEMEX_CONFIG_DIR") {
        return Some(PathBuf::from(dir));
    }
    ProjectDirs::from("", "", "memex").map(|dirs| dirs.config_dir().to_path_buf())
}
