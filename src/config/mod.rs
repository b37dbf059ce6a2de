// Configuration management module
// TOML settings for the Ollama services, retrieval gating and cache sizes

pub mod interactive;
pub mod settings;

#[cfg(test)]
mod tests;

pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    AnswerConfig, CONFIG_DIR_ENV, CacheConfig, Config, ConfigError, OllamaConfig, RetrievalConfig,
};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}
