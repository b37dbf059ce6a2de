// Indexer module
// Turns plain text into stored, embedded segments and keeps the answer
// engine's caches in step with every write

pub mod consistency;
pub mod segmenter;


use std::sync::Arc;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::QaError;
use crate::answer::AnswerOrchestrator;
use crate::config::Config;
use crate::embeddings::EmbeddingService;
use crate::store::{Document, DocumentStore, EmbeddingRecord, NewDocument};

pub use consistency::{ConsistencyReport, ConsistencyValidator};
pub use segmenter::segment_text;

/// Longest segment, in characters, produced when ingesting text
pub const DEFAULT_MAX_SEGMENT_CHARS: usize = 800;

/// Writes documents and their embeddings to the store.
///
/// Every write is followed by `AnswerOrchestrator::invalidate_caches`, so
/// the next question sees the new corpus.
pub struct Indexer {
    store: Arc<dyn DocumentStore>,
    embedder: Arc<dyn EmbeddingService>,
    orchestrator: Arc<AnswerOrchestrator>,
    batch_size: usize,
    max_segment_chars: usize,
    expected_dimension: usize,
}

/// Counters for one bulk operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexingStats {
    pub documents_processed: usize,
    pub embeddings_generated: usize,
    pub errors_encountered: usize,
}

impl Indexer {
    #[inline]
    pub fn new(
        config: &Config,
        store: Arc<dyn DocumentStore>,
        embedder: Arc<dyn EmbeddingService>,
        orchestrator: Arc<AnswerOrchestrator>,
    ) -> Self {
        Self {
            store,
            embedder,
            orchestrator,
            batch_size: config.ollama.batch_size.max(1) as usize,
            max_segment_chars: DEFAULT_MAX_SEGMENT_CHARS,
            expected_dimension: config.ollama.embedding_dimension as usize,
        }
    }

    #[inline]
    pub fn with_max_segment_chars(mut self, max_segment_chars: usize) -> Self {
        self.max_segment_chars = max_segment_chars.max(1);
        self
    }

    /// Segment, embed and store a new document
    #[inline]
    pub async fn add_document(
        &self,
        title: &str,
        source: Option<String>,
        text: &str,
    ) -> Result<Document> {
        let segments = segment_text(text, self.max_segment_chars);
        if segments.is_empty() {
            return Err(
                QaError::InvalidDocument(format!("Document '{}' contains no text", title)).into(),
            );
        }

        info!("Indexing '{}' ({} segments)", title, segments.len());

        // Embed before writing anything so a failed embedding leaves nothing behind
        let vectors = self
            .embed_segments(&segments, &format!("Embedding {}", title))
            .await
            .with_context(|| format!("Failed to embed segments of '{}'", title))?;

        let document = self
            .store
            .create_document(NewDocument {
                id: Uuid::new_v4().to_string(),
                title: title.to_string(),
                source,
            })
            .await
            .context("Failed to create document")?;

        let records = into_records(&document.id, segments, vectors);
        let stored = records.len();
        if let Err(e) = self.store.insert_embeddings(records).await {
            // Do not leave a document without segments behind
            if let Err(cleanup) = self.store.delete_document(&document.id).await {
                warn!(
                    "Failed to remove document {} after a failed insert: {:#}",
                    document.id, cleanup
                );
            }
            return Err(e.context("Failed to store embeddings"));
        }

        self.orchestrator.invalidate_caches().await;

        info!(
            "Indexed '{}' as {} with {} embeddings",
            document.title, document.id, stored
        );
        Ok(document)
    }

    /// Delete a document and its embeddings.
    ///
    /// Returns false when the document does not exist.
    #[inline]
    pub async fn delete_document(&self, id: &str) -> Result<bool> {
        let removed_embeddings = self
            .store
            .delete_embeddings_by_owner(id)
            .await
            .context("Failed to delete embeddings")?;
        let removed = self
            .store
            .delete_document(id)
            .await
            .context("Failed to delete document")?;

        if removed || removed_embeddings > 0 {
            self.orchestrator.invalidate_caches().await;
        }

        info!(
            "Deleted document {} ({} embeddings removed)",
            id, removed_embeddings
        );
        Ok(removed)
    }

    /// Re-embed stored segments in bulk, for one document or all of them.
    ///
    /// Used after switching embedding models. A document whose embedding
    /// fails keeps its old vectors.
    #[inline]
    pub async fn regenerate(&self, owner_id: Option<&str>) -> Result<IndexingStats> {
        let owners: Vec<String> = match owner_id {
            Some(owner_id) => vec![owner_id.to_string()],
            None => self
                .store
                .list_documents()
                .await
                .context("Failed to list documents")?
                .into_iter()
                .map(|document| document.id)
                .collect(),
        };

        let mut stats = IndexingStats::default();

        for owner in &owners {
            match self.regenerate_owner(owner).await {
                Ok(count) => {
                    stats.documents_processed += 1;
                    stats.embeddings_generated += count;
                }
                Err(e) => {
                    warn!("Failed to regenerate embeddings for {}: {:#}", owner, e);
                    stats.errors_encountered += 1;
                }
            }
        }

        if stats.documents_processed > 0 {
            self.orchestrator.invalidate_caches().await;
        }

        info!(
            "Regenerated {} embeddings for {} documents ({} errors)",
            stats.embeddings_generated, stats.documents_processed, stats.errors_encountered
        );
        Ok(stats)
    }

    async fn regenerate_owner(&self, owner_id: &str) -> Result<usize> {
        let existing = self
            .store
            .list_embeddings_by_owner(owner_id)
            .await
            .context("Failed to load existing segments")?;
        if existing.is_empty() {
            debug!("No segments stored for {}", owner_id);
            return Ok(0);
        }

        let segments: Vec<String> = existing.into_iter().map(|r| r.segment).collect();
        let vectors = self
            .embed_segments(&segments, &format!("Regenerating {}", owner_id))
            .await?;

        let records = into_records(owner_id, segments, vectors);
        let count = records.len();
        self.store
            .replace_embeddings(owner_id, records)
            .await
            .context("Failed to replace embeddings")?;

        Ok(count)
    }

    async fn embed_segments(&self, segments: &[String], message: &str) -> Result<Vec<Vec<f32>>> {
        let bar = if console::user_attended_stderr() {
            ProgressBar::new(segments.len() as u64).with_style(
                ProgressStyle::with_template("{spinner} [{pos}/{len}] {msg}")
                    .expect("style template is valid"),
            )
        } else {
            ProgressBar::hidden()
        };
        bar.set_message(message.to_string());

        let mut vectors = Vec::with_capacity(segments.len());
        for batch in segments.chunks(self.batch_size) {
            let embedded = self.embedder.embed_batch(batch).await?;
            if embedded.len() != batch.len() {
                bar.abandon();
                return Err(QaError::Embedding(format!(
                    "Expected {} embeddings, got {}",
                    batch.len(),
                    embedded.len()
                ))
                .into());
            }

            if embedded.iter().any(Vec::is_empty) {
                bar.abandon();
                return Err(QaError::Embedding("Received an empty embedding".to_string()).into());
            }
            let mismatched = embedded
                .iter()
                .filter(|vector| vector.len() != self.expected_dimension)
                .count();
            if mismatched > 0 {
                warn!(
                    "{} embeddings do not have the configured {} dimensions",
                    mismatched, self.expected_dimension
                );
            }

            vectors.extend(embedded);
            bar.inc(batch.len() as u64);
        }

        bar.finish_and_clear();
        Ok(vectors)
    }
}

fn into_records(owner_id: &str, segments: Vec<String>, vectors: Vec<Vec<f32>>) -> Vec<EmbeddingRecord> {
    segments
        .into_iter()
        .zip(vectors)
        .map(|(segment, vector)| EmbeddingRecord {
            owner_id: owner_id.to_string(),
            segment,
            vector,
        })
        .collect()
}
