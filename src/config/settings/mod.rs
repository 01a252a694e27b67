#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::chunking::ChunkingConfig;
use crate::embeddings::ollama::DEFAULT_EMBEDDING_DIMENSION;

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_SERVER_PORT: u16 = 7101;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OllamaConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub batch_size: u32,
    pub embedding_dimension: u32,
    pub timeout_seconds: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "nomic-embed-text:latest".to_string(),
            batch_size: 16,
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
            timeout_seconds: 30,
        }
    }
}

/// Which embedding backend the gate drives
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    #[default]
    Ollama,
    /// Deterministic token hashing; no model server required
    Hashing,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub query_timeout_seconds: u64,
    /// Never reach out to the network to pull a missing model
    pub offline: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Ollama,
            query_timeout_seconds: 30,
            offline: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexingConfig {
    pub extensions: Vec<String>,
    pub max_file_size: u64,
    pub generated_filter: bool,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| (*s).to_string()).collect(),
            max_file_size: 1024 * 1024,
            generated_filter: true,
        }
    }
}

pub const DEFAULT_EXTENSIONS: &[&str] = &[
    ".java",
    ".ts",
    ".tsx",
    ".js",
    ".jsx",
    ".py",
    ".rs",
    ".go",
    ".json",
    ".xml",
    ".yaml",
    ".yml",
    ".md",
    ".properties",
    ".gradle",
    ".toml",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub store_idle_seconds: u64,
    pub session_idle_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_SERVER_PORT,
            store_idle_seconds: 30 * 60,
            session_idle_seconds: 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WatcherConfig {
    pub enabled: bool,
    pub debounce_ms: u64,
    pub max_batch_size: usize,
    pub git_settle_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: 2000,
            max_batch_size: 100,
            git_settle_ms: 3000,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid embedding dimension: {0} (must be between 8 and 8192)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid timeout: {0}s (must be between 1 and 600 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid max chunk size: {0} (must be between 200 and 16384)")]
    InvalidMaxChunkSize(usize),
    #[error("Invalid min chunk size: {0} (must be between 10 and 1024)")]
    InvalidMinChunkSize(usize),
    #[error("Max chunk size ({0}) must be greater than min chunk size ({1})")]
    MaxChunkSizeTooSmall(usize, usize),
    #[error("Invalid overlap: {0} lines (must be at most 100)")]
    InvalidOverlapLines(usize),
    #[error("External chunker command is configured but empty")]
    EmptyExternalCommand,
    #[error("Invalid extension: {0:?} (must start with '.')")]
    InvalidExtension(String),
    #[error("Invalid max file size: {0} bytes (must be between 1 KiB and 64 MiB)")]
    InvalidMaxFileSize(u64),
    #[error("Invalid watcher batch size: {0} (must be between 1 and 10000)")]
    InvalidWatcherBatchSize(usize),
    #[error("Invalid value {value:?} for environment variable {name}")]
    InvalidEnvironment { name: String, value: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Load `config.toml` from `config_dir`, falling back to defaults when absent
    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    /// Load from the default directory and apply `CODE_RAG_*` environment overrides
    #[inline]
    pub fn load_default() -> Result<Self> {
        let dir = Self::config_dir()?;
        let mut config = Self::load(&dir)?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config
            .validate()
            .context("Configuration validation failed after environment overrides")?;
        Ok(config)
    }

    /// `CODE_RAG_HOME` when set, otherwise `~/.code-rag`
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        if let Some(home) = std::env::var_os("CODE_RAG_HOME") {
            return Ok(PathBuf::from(home));
        }
        dirs::home_dir()
            .map(|home| home.join(".code-rag"))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Apply environment-style overrides using `lookup` to resolve variable names
    #[inline]
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("CODE_RAG_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("CODE_RAG_PORT") {
            self.server.port = parse_env("CODE_RAG_PORT", &port)?;
        }
        if let Some(offline) = lookup("CODE_RAG_OFFLINE") {
            self.embedding.offline = parse_flag(&offline);
        }
        if let Some(watch) = lookup("CODE_RAG_WATCH") {
            self.watcher.enabled = parse_flag(&watch);
        }
        if let Some(debounce) = lookup("CODE_RAG_WATCH_DEBOUNCE") {
            self.watcher.debounce_ms = parse_seconds_as_millis("CODE_RAG_WATCH_DEBOUNCE", &debounce)?;
        }
        if let Some(settle) = lookup("CODE_RAG_WATCH_GIT_SETTLE") {
            self.watcher.git_settle_ms = parse_seconds_as_millis("CODE_RAG_WATCH_GIT_SETTLE", &settle)?;
        }
        if let Some(batch) = lookup("CODE_RAG_WATCH_MAX_BATCH") {
            self.watcher.max_batch_size = parse_env("CODE_RAG_WATCH_MAX_BATCH", &batch)?;
        }
        Ok(())
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ollama.validate()?;
        self.validate_chunking_config()?;
        self.validate_indexing_config()?;

        if !(1..=600).contains(&self.embedding.query_timeout_seconds) {
            return Err(ConfigError::InvalidTimeout(
                self.embedding.query_timeout_seconds,
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort(self.server.port));
        }

        if !(1..=10_000).contains(&self.watcher.max_batch_size) {
            return Err(ConfigError::InvalidWatcherBatchSize(
                self.watcher.max_batch_size,
            ));
        }

        Ok(())
    }

    fn validate_chunking_config(&self) -> Result<(), ConfigError> {
        let config = &self.chunking;

        if !(200..=16_384).contains(&config.max_chunk_size) {
            return Err(ConfigError::InvalidMaxChunkSize(config.max_chunk_size));
        }

        if !(10..=1024).contains(&config.min_chunk_size) {
            return Err(ConfigError::InvalidMinChunkSize(config.min_chunk_size));
        }

        if config.max_chunk_size <= config.min_chunk_size {
            return Err(ConfigError::MaxChunkSizeTooSmall(
                config.max_chunk_size,
                config.min_chunk_size,
            ));
        }

        if config.overlap_lines > 100 {
            return Err(ConfigError::InvalidOverlapLines(config.overlap_lines));
        }

        if !(1..=600).contains(&config.external_timeout_seconds) {
            return Err(ConfigError::InvalidTimeout(config.external_timeout_seconds));
        }

        if config
            .external_command
            .as_ref()
            .is_some_and(|command| command.is_empty() || command[0].trim().is_empty())
        {
            return Err(ConfigError::EmptyExternalCommand);
        }

        Ok(())
    }

    fn validate_indexing_config(&self) -> Result<(), ConfigError> {
        let config = &self.indexing;

        if let Some(bad) = config.extensions.iter().find(|ext| !ext.starts_with('.')) {
            return Err(ConfigError::InvalidExtension(bad.clone()));
        }

        if !(1024..=64 * 1024 * 1024).contains(&config.max_file_size) {
            return Err(ConfigError::InvalidMaxFileSize(config.max_file_size));
        }

        Ok(())
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join(CONFIG_FILE_NAME)
    }

    /// PID file written by `serve`
    #[inline]
    pub fn pid_file_path(&self) -> PathBuf {
        self.get_base_dir().join("server.pid")
    }

    #[inline]
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.embedding.query_timeout_seconds)
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        self.ollama.ollama_url()
    }
}

impl OllamaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))?;

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if !(8..=8192).contains(&self.embedding_dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding_dimension,
            ));
        }

        if !(1..=600).contains(&self.timeout_seconds) {
            return Err(ConfigError::InvalidTimeout(self.timeout_seconds));
        }

        Ok(())
    }

    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }
}

fn parse_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "no" | "off"
    )
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnvironment {
            name: name.to_string(),
            value: value.to_string(),
        })
}

fn parse_seconds_as_millis(name: &str, value: &str) -> Result<u64, ConfigError> {
    let seconds: f64 = parse_env(name, value)?;
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(ConfigError::InvalidEnvironment {
            name: name.to_string(),
            value: value.to_string(),
        });
    }
    Ok((seconds * 1000.0).round() as u64)
}
