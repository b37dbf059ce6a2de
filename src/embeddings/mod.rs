// Embeddings module
// Service traits for the embedding and generation backends, the Ollama client
// implementing both, and the offline token-hash fallback vector

pub mod fallback;
pub mod ollama;

use anyhow::Result;
use async_trait::async_trait;

pub use fallback::fallback_embedding;
pub use ollama::{EmbeddingResult, OllamaClient};

/// Maps text to a fixed-dimension vector.
///
/// Implementations must return the same vector for the same input for as long
/// as the underlying model does not change.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts, preserving input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }
}

/// Maps a prompt to free text.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Where a vector came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Produced by the embedding service
    Genuine,
    /// Token-hash vector produced locally while the embedding service was unavailable
    Fallback,
}

/// A vector tagged with its provenance so fallback vectors are never mistaken
/// for model output.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub provenance: Provenance,
}

impl Embedding {
    #[inline]
    pub fn genuine(vector: Vec<f32>) -> Self {
        Self {
            vector,
            provenance: Provenance::Genuine,
        }
    }

    #[inline]
    pub fn fallback(vector: Vec<f32>) -> Self {
        Self {
            vector,
            provenance: Provenance::Fallback,
        }
    }

    #[inline]
    pub fn is_fallback(&self) -> bool {
        self.provenance == Provenance::Fallback
    }
}
