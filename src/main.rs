use clap::{Parser, Subcommand};
use docs_qa::Result;
use docs_qa::commands::{
    add_document, ask, chat, cleanup, delete_document, list_documents, regenerate, show_status,
};
use docs_qa::config::{run_interactive_config, show_config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "docs-qa")]
#[command(about = "Question answering over locally indexed documents with Ollama")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure Ollama connection, retrieval thresholds and caches
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Index a plain text file as a new document
    Add {
        /// Path of the text file
        file: PathBuf,
        /// Optional title for the document, defaults to the file name
        #[arg(long)]
        title: Option<String>,
    },
    /// List all indexed documents
    List,
    /// Delete a document and its embeddings
    Delete {
        /// Document ID or title
        document: String,
    },
    /// Answer a single question
    Ask {
        /// The question to answer
        question: String,
        /// Only search this document (ID or title)
        #[arg(long)]
        document: Option<String>,
    },
    /// Answer questions read from stdin until EOF
    Chat {
        /// Only search this document (ID or title)
        #[arg(long)]
        document: Option<String>,
    },
    /// Re-embed stored segments, e.g. after changing the embedding model
    Regenerate {
        /// Only regenerate this document (ID or title)
        #[arg(long)]
        document: Option<String>,
    },
    /// Delete embeddings whose document no longer exists
    Cleanup {
        /// Report what would be deleted without deleting it
        #[arg(long)]
        dry_run: bool,
    },
    /// Show the state of the database, Ollama and the vector index
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config()?;
            } else {
                run_interactive_config()?;
            }
        }
        Commands::Add { file, title } => {
            add_document(&file, title).await?;
        }
        Commands::List => {
            list_documents().await?;
        }
        Commands::Delete { document } => {
            delete_document(&document).await?;
        }
        Commands::Ask { question, document } => {
            ask(&question, document.as_deref()).await?;
        }
        Commands::Chat { document } => {
            chat(document.as_deref()).await?;
        }
        Commands::Regenerate { document } => {
            regenerate(document.as_deref()).await?;
        }
        Commands::Cleanup { dry_run } => {
            cleanup(dry_run).await?;
        }
        Commands::Status => {
            show_status().await?;
        }
    }

    Ok(())
}
