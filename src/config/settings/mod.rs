
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::embeddings::ollama::DEFAULT_EMBEDDING_DIMENSION;

/// Overrides the platform configuration directory when set.
pub const CONFIG_DIR_ENV: &str = "DOCS_QA_CONFIG_DIR";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub answer: AnswerConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OllamaConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub embedding_model: String,
    pub generation_model: String,
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
            embedding_model: "nomic-embed-text:latest".to_string(),
            generation_model: "llama3.2:latest".to_string(),
            batch_size: 16,
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
            timeout_seconds: 30,
        }
    }
}

/// Similarity gating, index freshness and search concurrency.
///
/// The thresholds were tuned by hand against a small Vietnamese corpus; treat
/// them as starting points rather than derived constants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Minimum similarity for reusing a previously stored answer verbatim
    pub question_match_threshold: f32,
    /// Minimum best-segment similarity for definition questions
    pub definition_threshold: f32,
    /// Minimum best-segment similarity for every other question type
    pub general_threshold: f32,
    /// Maximum number of segments returned by the segment search
    pub segment_top_k: usize,
    pub question_search_timeout_ms: u64,
    pub segment_search_timeout_ms: u64,
    pub embedding_timeout_ms: u64,
    /// Number of search branches allowed to run at the same time
    pub worker_pool_size: usize,
    pub index_ttl_seconds: u64,
    /// Dimension of the token-hash vector used when the embedding service is down
    pub fallback_dimension: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            question_match_threshold: 0.6,
            definition_threshold: 0.5,
            general_threshold: 0.25,
            segment_top_k: 10,
            question_search_timeout_ms: 5_000,
            segment_search_timeout_ms: 10_000,
            embedding_timeout_ms: 30_000,
            worker_pool_size: 5,
            index_ttl_seconds: 60,
            fallback_dimension: 128,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub embedding_capacity: usize,
    pub response_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            embedding_capacity: 1_000,
            response_capacity: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnswerConfig {
    pub generation_timeout_ms: u64,
    /// Answers longer than this are cut and suffixed with "..."
    pub max_answer_chars: usize,
    /// How many of the best segments are handed to the generator as context
    pub context_segments: usize,
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self {
            generation_timeout_ms: 60_000,
            max_answer_chars: 1_000,
            context_segments: 3,
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
    #[error("Invalid embedding dimension: {0} (must be between 64 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid fallback dimension: {0} (must be between 8 and 1024)")]
    InvalidFallbackDimension(usize),
    #[error("Invalid {0}: {1} (must be between 0.0 and 1.0)")]
    InvalidThreshold(&'static str, f32),
    #[error("Invalid {0}: {1} (must be greater than 0)")]
    InvalidTimeout(&'static str, u64),
    #[error("Invalid {0}: {1} (must be between 1 and 1000000)")]
    InvalidCacheCapacity(&'static str, usize),
    #[error("Invalid worker pool size: {0} (must be between 1 and 64)")]
    InvalidWorkerPoolSize(usize),
    #[error("Invalid segment top-k: {0} (must be between 1 and 100)")]
    InvalidTopK(usize),
    #[error("Invalid max answer length: {0} (must be between 50 and 20000)")]
    InvalidMaxAnswerChars(usize),
    #[error("Invalid context segment count: {0} (must be between 1 and 20)")]
    InvalidContextSegments(usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Resolve the configuration directory, honoring `DOCS_QA_CONFIG_DIR`
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV) {
            return Ok(PathBuf::from(dir));
        }

        dirs::config_dir()
            .map(|dir| dir.join("docs-qa"))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Load the configuration from the default configuration directory
    #[inline]
    pub fn load_default() -> Result<Self> {
        let config_dir = Self::config_dir().context("Failed to resolve config directory")?;
        Self::load(config_dir)
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

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
        self.retrieval.validate()?;
        self.cache.validate()?;
        self.answer.validate()?;
        Ok(())
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    /// Get the path for the SQLite database
    #[inline]
    pub fn database_path(&self) -> PathBuf {
        self.get_base_dir().join("metadata.db")
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

        if self.embedding_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.embedding_model.clone()));
        }

        if self.generation_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.generation_model.clone()));
        }

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if !(64..=4096).contains(&self.embedding_dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding_dimension,
            ));
        }

        if self.timeout_seconds == 0 {
            return Err(ConfigError::InvalidTimeout(
                "ollama timeout",
                self.timeout_seconds,
            ));
        }

        Ok(())
    }

    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn set_protocol(&mut self, protocol: String) -> Result<(), ConfigError> {
        if protocol != "http" && protocol != "https" {
            return Err(ConfigError::InvalidProtocol(protocol));
        }
        self.protocol = protocol;
        Ok(())
    }

    pub fn set_host(&mut self, host: String) -> Result<(), ConfigError> {
        let temp_config = OllamaConfig {
            host: host.clone(),
            ..self.clone()
        };
        temp_config.validate()?;
        self.host = host;
        Ok(())
    }

    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        if port == 0 {
            return Err(ConfigError::InvalidPort(port));
        }
        self.port = port;
        Ok(())
    }

    pub fn set_embedding_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.embedding_model = model;
        Ok(())
    }

    pub fn set_generation_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.generation_model = model;
        Ok(())
    }

    pub fn set_batch_size(&mut self, batch_size: u32) -> Result<(), ConfigError> {
        if batch_size == 0 || batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(batch_size));
        }
        self.batch_size = batch_size;
        Ok(())
    }

    pub fn set_embedding_dimension(&mut self, dimension: u32) -> Result<(), ConfigError> {
        if !(64..=4096).contains(&dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(dimension));
        }
        self.embedding_dimension = dimension;
        Ok(())
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_threshold("question match threshold", self.question_match_threshold)?;
        validate_threshold("definition threshold", self.definition_threshold)?;
        validate_threshold("general threshold", self.general_threshold)?;

        if !(1..=100).contains(&self.segment_top_k) {
            return Err(ConfigError::InvalidTopK(self.segment_top_k));
        }

        validate_timeout("question search timeout", self.question_search_timeout_ms)?;
        validate_timeout("segment search timeout", self.segment_search_timeout_ms)?;
        validate_timeout("embedding timeout", self.embedding_timeout_ms)?;

        if !(1..=64).contains(&self.worker_pool_size) {
            return Err(ConfigError::InvalidWorkerPoolSize(self.worker_pool_size));
        }

        if !(8..=1024).contains(&self.fallback_dimension) {
            return Err(ConfigError::InvalidFallbackDimension(
                self.fallback_dimension,
            ));
        }

        Ok(())
    }

    pub fn question_search_timeout(&self) -> Duration {
        Duration::from_millis(self.question_search_timeout_ms)
    }

    pub fn segment_search_timeout(&self) -> Duration {
        Duration::from_millis(self.segment_search_timeout_ms)
    }

    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_millis(self.embedding_timeout_ms)
    }

    pub fn index_ttl(&self) -> Duration {
        Duration::from_secs(self.index_ttl_seconds)
    }

    pub fn set_thresholds(
        &mut self,
        question_match: f32,
        definition: f32,
        general: f32,
    ) -> Result<(), ConfigError> {
        validate_threshold("question match threshold", question_match)?;
        validate_threshold("definition threshold", definition)?;
        validate_threshold("general threshold", general)?;
        self.question_match_threshold = question_match;
        self.definition_threshold = definition;
        self.general_threshold = general;
        Ok(())
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_capacity("embedding cache capacity", self.embedding_capacity)?;
        validate_capacity("response cache capacity", self.response_capacity)?;
        Ok(())
    }
}

impl AnswerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_timeout("generation timeout", self.generation_timeout_ms)?;

        if !(50..=20_000).contains(&self.max_answer_chars) {
            return Err(ConfigError::InvalidMaxAnswerChars(self.max_answer_chars));
        }

        if !(1..=20).contains(&self.context_segments) {
            return Err(ConfigError::InvalidContextSegments(self.context_segments));
        }

        Ok(())
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_millis(self.generation_timeout_ms)
    }
}

fn validate_threshold(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidThreshold(name, value))
    }
}

fn validate_timeout(name: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidTimeout(name, value));
    }
    Ok(())
}

fn validate_capacity(name: &'static str, value: usize) -> Result<(), ConfigError> {
    if (1..=1_000_000).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidCacheCapacity(name, value))
    }
}
