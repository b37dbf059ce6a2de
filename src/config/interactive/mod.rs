
use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};

use super::{Config, ConfigError, OllamaConfig, RetrievalConfig};
use crate::embeddings::OllamaClient;

#[inline]
pub fn run_interactive_config() -> Result<()> {
    eprintln!("{}", style("🔧 Docs QA Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config()?;

    eprintln!("{}", style("Ollama Configuration").bold().yellow());
    eprintln!("Configure your local Ollama instance for embeddings and answer generation.");
    eprintln!();

    configure_ollama(&mut config.ollama)?;

    eprintln!();
    eprintln!("{}", style("Retrieval Thresholds").bold().yellow());
    eprintln!("Similarity scores range from 0.0 (unrelated) to 1.0 (identical).");
    eprintln!();

    configure_thresholds(&mut config.retrieval)?;

    eprintln!();
    eprintln!("{}", style("Testing configuration...").yellow());

    if test_ollama_connection(&config.ollama) {
        eprintln!("{}", style("✓ Ollama connection successful!").green());
    } else {
        eprintln!(
            "{}",
            style("⚠ Warning: Could not connect to Ollama").yellow()
        );
        eprintln!("You can continue, but questions will fall back to keyword search.");
    }

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());
        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config() -> Result<()> {
    let config = Config::load_default().context("Failed to load configuration")?;

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Ollama Settings:").bold().yellow());
    eprintln!("  Host: {}", style(&config.ollama.host).cyan());
    eprintln!("  Port: {}", style(config.ollama.port).cyan());
    eprintln!(
        "  Embedding Model: {}",
        style(&config.ollama.embedding_model).cyan()
    );
    eprintln!(
        "  Generation Model: {}",
        style(&config.ollama.generation_model).cyan()
    );
    eprintln!("  Batch Size: {}", style(config.ollama.batch_size).cyan());

    match config.ollama_url() {
        Ok(url) => eprintln!("  Ollama URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  Ollama URL: {} ({})", style("Invalid").red(), e),
    }

    let retrieval = &config.retrieval;
    eprintln!();
    eprintln!("{}", style("Retrieval Settings:").bold().yellow());
    eprintln!(
        "  Question Reuse Threshold: {}",
        style(retrieval.question_match_threshold).cyan()
    );
    eprintln!(
        "  Definition Threshold: {}",
        style(retrieval.definition_threshold).cyan()
    );
    eprintln!(
        "  General Threshold: {}",
        style(retrieval.general_threshold).cyan()
    );
    eprintln!("  Segment Top-K: {}", style(retrieval.segment_top_k).cyan());
    eprintln!(
        "  Worker Pool Size: {}",
        style(retrieval.worker_pool_size).cyan()
    );
    eprintln!(
        "  Index TTL: {}s",
        style(retrieval.index_ttl_seconds).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Cache Settings:").bold().yellow());
    eprintln!(
        "  Embedding Cache: {} entries",
        style(config.cache.embedding_capacity).cyan()
    );
    eprintln!(
        "  Response Cache: {} entries",
        style(config.cache.response_capacity).cyan()
    );

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

fn load_existing_config() -> Result<Config> {
    Config::load_default().map_or_else(
        |_| {
            eprintln!(
                "{}",
                style("No existing configuration found. Using defaults.").yellow()
            );
            let base_dir = Config::config_dir().context("Failed to resolve config directory")?;
            Ok(Config {
                base_dir,
                ..Config::default()
            })
        },
        |config| {
            eprintln!("{}", style("Found existing configuration.").green());
            Ok(config)
        },
    )
}

fn configure_ollama(ollama: &mut OllamaConfig) -> Result<()> {
    let protocols = &["http", "https"];
    let default_index = protocols
        .iter()
        .position(|&p| p == ollama.protocol)
        .unwrap_or(0);

    let protocol_index = Select::new()
        .with_prompt("Ollama protocol")
        .default(default_index)
        .items(protocols)
        .interact()?;

    let protocol = protocols[protocol_index].to_string();

    let host: String = Input::new()
        .with_prompt("Ollama host")
        .default(ollama.host.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            let temp_config = OllamaConfig {
                protocol: protocol.clone(),
                host: input.clone(),
                ..OllamaConfig::default()
            };
            temp_config.validate()?;
            Ok(())
        })
        .interact_text()?;

    let port: u16 = Input::new()
        .with_prompt("Ollama port")
        .default(ollama.port)
        .validate_with(|input: &u16| -> Result<(), &str> {
            if *input == 0 {
                Err("Port must be greater than 0")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let embedding_model = prompt_model("Embedding model", &ollama.embedding_model)?;
    let generation_model = prompt_model("Generation model", &ollama.generation_model)?;

    ollama.set_protocol(protocol)?;
    ollama.set_host(host)?;
    ollama.set_port(port)?;
    ollama.set_embedding_model(embedding_model)?;
    ollama.set_generation_model(generation_model)?;

    Ok(())
}

fn prompt_model(prompt: &str, current: &str) -> Result<String> {
    let model: String = Input::new()
        .with_prompt(prompt)
        .default(current.to_string())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    Ok(model)
}

fn configure_thresholds(retrieval: &mut RetrievalConfig) -> Result<()> {
    let question_match = prompt_threshold(
        "Minimum similarity to reuse a stored answer",
        retrieval.question_match_threshold,
    )?;
    let definition = prompt_threshold(
        "Minimum similarity for definition questions",
        retrieval.definition_threshold,
    )?;
    let general = prompt_threshold(
        "Minimum similarity for other questions",
        retrieval.general_threshold,
    )?;

    retrieval.set_thresholds(question_match, definition, general)?;
    Ok(())
}

fn prompt_threshold(prompt: &str, current: f32) -> Result<f32> {
    let value: f32 = Input::new()
        .with_prompt(prompt)
        .default(current)
        .validate_with(|input: &f32| -> Result<(), &str> {
            if (0.0..=1.0).contains(input) {
                Ok(())
            } else {
                Err("Threshold must be between 0.0 and 1.0")
            }
        })
        .interact_text()?;

    Ok(value)
}

fn test_ollama_connection(ollama: &OllamaConfig) -> bool {
    let config = Config {
        ollama: ollama.clone(),
        ..Config::default()
    };

    OllamaClient::new(&config)
        .and_then(|client| {
            client
                .with_timeout(std::time::Duration::from_secs(5))
                .with_retry_attempts(1)
                .ping()
        })
        .is_ok()
}
