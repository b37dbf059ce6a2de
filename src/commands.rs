use anyhow::{Context, Result};
use console::style;
use dialoguer::Confirm;
use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::answer::AnswerOrchestrator;
use crate::config::Config;
use crate::embeddings::{EmbeddingService, GenerationService, OllamaClient};
use crate::indexer::{ConsistencyValidator, Indexer};
use crate::store::{Document, DocumentStore, SqliteStore};

/// Everything a command needs, wired once from the configuration
pub struct Runtime {
    pub config: Config,
    pub sqlite: Arc<SqliteStore>,
    pub orchestrator: Arc<AnswerOrchestrator>,
    pub indexer: Indexer,
}

impl Runtime {
    #[inline]
    pub async fn load() -> Result<Self> {
        let config = Config::load_default().context("Failed to load configuration")?;
        Self::from_config(config).await
    }

    #[inline]
    pub async fn from_config(config: Config) -> Result<Self> {
        let sqlite = Arc::new(
            SqliteStore::initialize_from_config_dir(config.get_base_dir())
                .await
                .context("Failed to initialize database")?,
        );
        let ollama = OllamaClient::new(&config).context("Failed to create Ollama client")?;

        let store: Arc<dyn DocumentStore> = Arc::clone(&sqlite) as Arc<dyn DocumentStore>;
        let embedder: Arc<dyn EmbeddingService> = Arc::new(ollama.clone());
        let generator: Arc<dyn GenerationService> = Arc::new(ollama);

        let orchestrator = Arc::new(AnswerOrchestrator::new(
            &config,
            Arc::clone(&store),
            Arc::clone(&embedder),
            generator,
        ));
        let indexer = Indexer::new(&config, store, embedder, Arc::clone(&orchestrator));

        Ok(Self {
            config,
            sqlite,
            orchestrator,
            indexer,
        })
    }

    /// Find a document by ID, or by a case-insensitive fragment of its title
    #[inline]
    pub async fn find_document(&self, identifier: &str) -> Result<Document> {
        if let Some(document) = self.sqlite.get_document(identifier).await? {
            return Ok(document);
        }

        let needle = identifier.to_lowercase();
        let documents = self.sqlite.list_documents().await?;
        documents
            .into_iter()
            .find(|d| d.title.to_lowercase().contains(&needle))
            .ok_or_else(|| anyhow::anyhow!("Document not found: {}", identifier))
    }

    async fn resolve_owner(&self, document: Option<&str>) -> Result<Option<String>> {
        match document {
            Some(identifier) => Ok(Some(self.find_document(identifier).await?.id)),
            None => Ok(None),
        }
    }
}

/// Index a plain text file as a new document
#[inline]
pub async fn add_document(path: &Path, title: Option<String>) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let title = title.unwrap_or_else(|| {
        path.file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string())
    });

    let runtime = Runtime::load().await?;
    let document = runtime
        .indexer
        .add_document(&title, Some(path.display().to_string()), &text)
        .await?;

    println!("Added document: {} (ID: {})", document.title, document.id);
    Ok(())
}

/// List all indexed documents
#[inline]
pub async fn list_documents() -> Result<()> {
    let runtime = Runtime::load().await?;
    let documents = runtime
        .sqlite
        .list_documents()
        .await
        .context("Failed to list documents")?;

    if documents.is_empty() {
        println!("No documents have been added yet.");
        println!("Use 'docs-qa add <file>' to add one.");
        return Ok(());
    }

    let counts = runtime.sqlite.segment_counts().await?;

    println!("Documents ({} total):", documents.len());
    println!();

    for document in &documents {
        let segments = counts
            .iter()
            .find(|(owner, _)| owner == &document.id)
            .map_or(0, |(_, count)| *count);

        println!("📄 {} (ID: {})", document.title, document.id);
        if let Some(source) = &document.source {
            println!("   Source: {}", source);
        }
        println!("   Segments: {}", segments);
        println!(
            "   Added: {}",
            document.created_at.format("%Y-%m-%d %H:%M:%S")
        );
        println!();
    }

    Ok(())
}

/// Delete a document and all its embeddings
#[inline]
pub async fn delete_document(identifier: &str) -> Result<()> {
    let runtime = Runtime::load().await?;
    let document = runtime.find_document(identifier).await?;

    println!("Found document: {} (ID: {})", document.title, document.id);

    if console::user_attended()
        && !Confirm::new()
            .with_prompt("Delete this document and its embeddings? This cannot be undone.")
            .default(false)
            .interact()?
    {
        println!("Nothing deleted.");
        return Ok(());
    }

    if runtime.indexer.delete_document(&document.id).await? {
        println!("✓ Document deleted: {}", document.title);
    } else {
        println!("Document {} was already gone.", document.id);
    }

    Ok(())
}

/// Answer one question and print the answer
#[inline]
pub async fn ask(question: &str, document: Option<&str>) -> Result<()> {
    let runtime = Runtime::load().await?;
    let owner = runtime.resolve_owner(document).await?;

    let answer = runtime
        .orchestrator
        .answer(question, owner.as_deref())
        .await;
    println!("{}", answer);

    Ok(())
}

/// Read questions from stdin until EOF, sharing caches between them
#[inline]
pub async fn chat(document: Option<&str>) -> Result<()> {
    let runtime = Runtime::load().await?;
    let owner = runtime.resolve_owner(document).await?;

    eprintln!(
        "{}",
        style("Ask a question, or press Ctrl-D to quit.").dim()
    );

    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        eprint!("{} ", style(">").bold().green());
        std::io::stderr().flush()?;

        let Some(line) = lines.next() else {
            break;
        };
        let line = line.context("Failed to read from stdin")?;
        let question = line.trim();
        if question.is_empty() {
            continue;
        }

        let answer = runtime
            .orchestrator
            .answer(question, owner.as_deref())
            .await;
        println!("{}", answer);
    }

    info!(
        "Chat finished with {} cached responses and {} cached embeddings",
        runtime.orchestrator.response_cache().len(),
        runtime.orchestrator.embedding_cache().len()
    );
    Ok(())
}

/// Re-embed stored segments with the configured embedding model
#[inline]
pub async fn regenerate(document: Option<&str>) -> Result<()> {
    let runtime = Runtime::load().await?;
    let owner = runtime.resolve_owner(document).await?;

    let stats = runtime.indexer.regenerate(owner.as_deref()).await?;

    println!(
        "Regenerated {} embeddings across {} documents",
        stats.embeddings_generated, stats.documents_processed
    );
    if stats.errors_encountered > 0 {
        println!(
            "⚠️  {} documents failed and kept their previous embeddings",
            stats.errors_encountered
        );
    }

    Ok(())
}

/// Remove embeddings whose document no longer exists
#[inline]
pub async fn cleanup(dry_run: bool) -> Result<()> {
    let runtime = Runtime::load().await?;
    let validator = ConsistencyValidator::new(runtime.sqlite.as_ref(), &runtime.orchestrator);

    let report = validator.validate_consistency().await?;
    println!("{}", report.summary());

    if report.orphaned_owners.is_empty() {
        println!("✅ Nothing to clean up");
        return Ok(());
    }

    for owner in &report.orphaned_owners {
        println!("   👻 Orphaned owner: {}", owner);
    }

    if dry_run {
        println!(
            "Dry run: {} orphaned embeddings would be deleted",
            report.orphaned_embeddings
        );
        return Ok(());
    }

    let removed = validator
        .cleanup_orphaned_embeddings(&report.orphaned_owners)
        .await?;
    println!("✓ Deleted {} orphaned embeddings", removed);

    Ok(())
}

/// Print the state of the database, the Ollama server and the index
#[inline]
pub async fn show_status() -> Result<()> {
    let config = Config::load_default().unwrap_or_else(|_| Config {
        base_dir: Config::config_dir().unwrap_or_default(),
        ..Config::default()
    });

    println!("📊 Docs-QA Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("🤖 Ollama Status:");
    match OllamaClient::new(&config) {
        Ok(client) => {
            let health = tokio::task::spawn_blocking(move || client.health_check())
                .await
                .context("Health check task failed to complete")?;
            match health {
                Ok(()) => {
                    println!(
                        "   ✅ Ollama: Connected ({}:{})",
                        config.ollama.host, config.ollama.port
                    );
                }
                Err(e) => {
                    println!("   ⚠️  Ollama: Unhealthy - {:#}", e);
                }
            }
            println!("   📋 Embedding Model: {}", config.ollama.embedding_model);
            println!("   📋 Generation Model: {}", config.ollama.generation_model);
            println!("   🔢 Batch Size: {}", config.ollama.batch_size);
        }
        Err(e) => {
            println!("   ❌ Ollama: Invalid configuration - {:#}", e);
        }
    }

    println!();
    println!("🗄️  Database Status:");
    let runtime = match Runtime::from_config(config).await {
        Ok(runtime) => {
            println!("   ✅ SQLite: Connected");
            runtime
        }
        Err(e) => {
            println!("   ❌ SQLite: Failed to connect - {:#}", e);
            return Ok(());
        }
    };

    println!();
    println!("🔍 Vector Index:");
    match runtime.orchestrator.index().snapshot().await {
        Ok(snapshot) => {
            println!("   📊 Embeddings loaded: {}", snapshot.len());
            println!(
                "   ⏱️  Refresh interval: {}s",
                runtime.orchestrator.index().ttl().as_secs()
            );
            let mismatched = snapshot
                .records()
                .iter()
                .filter(|r| r.vector.len() != runtime.config.ollama.embedding_dimension as usize)
                .count();
            if mismatched > 0 {
                println!(
                    "   ⚠️  {} embeddings do not have {} dimensions; run 'docs-qa regenerate'",
                    mismatched, runtime.config.ollama.embedding_dimension
                );
            }
        }
        Err(e) => {
            println!("   ❌ Failed to load index - {:#}", e);
        }
    }

    println!();
    println!("🔎 Consistency:");
    let validator = ConsistencyValidator::new(runtime.sqlite.as_ref(), &runtime.orchestrator);
    match validator.validate_consistency().await {
        Ok(report) => {
            if report.is_consistent {
                println!("   ✅ Store is consistent");
            } else {
                println!("   ⚠️  {} issues found", report.total_issues());
            }
            println!("   {}", report.summary());
        }
        Err(e) => {
            warn!("Consistency check failed: {:#}", e);
            println!("   ❌ Failed to check consistency: {:#}", e);
        }
    }

    match runtime.sqlite.list_questions().await {
        Ok(questions) => println!("   💬 Stored answers: {}", questions.len()),
        Err(e) => println!("   💬 Stored answers: Error - {:#}", e),
    }

    println!();
    println!("💡 Next Steps:");
    println!("   • Use 'docs-qa add <file>' to index a document");
    println!("   • Use 'docs-qa ask <question>' to ask a single question");
    println!("   • Use 'docs-qa chat' for an interactive session");

    Ok(())
}
