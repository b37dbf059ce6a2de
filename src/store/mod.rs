// Storage module
// Documents, embedded segments and the answered-question log behind one trait,
// with a SQLite implementation for the CLI and an in-memory one for tests

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashSet;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// A source document; owns the segments embedded from it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub source: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDocument {
    pub id: String,
    pub title: String,
    pub source: Option<String>,
}

/// A text segment and its embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// Opaque identifier of the owning document
    pub owner_id: String,
    pub segment: String,
    pub vector: Vec<f32>,
}

/// A question that received a synthesized answer, kept for verbatim reuse
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionRecord {
    pub question_text: String,
    pub answer_text: String,
    pub created_at: NaiveDateTime,
    pub owner_id: Option<String>,
}

/// Persistence for everything the answer engine reads and writes.
///
/// Callers that mutate embeddings through this trait are responsible for
/// invalidating any in-memory index built from `list_all_embeddings`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn create_document(&self, document: NewDocument) -> Result<Document>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    async fn list_documents(&self) -> Result<Vec<Document>>;

    /// Delete a document and the questions answered from it.
    ///
    /// Returns false when no such document exists. Embeddings are left alone.
    async fn delete_document(&self, id: &str) -> Result<bool>;

    async fn insert_embeddings(&self, records: Vec<EmbeddingRecord>) -> Result<()>;

    /// Every embedding, in insertion order
    async fn list_all_embeddings(&self) -> Result<Vec<EmbeddingRecord>>;

    async fn list_embeddings_by_owner(&self, owner_id: &str) -> Result<Vec<EmbeddingRecord>>;

    /// Returns the number of deleted records
    async fn delete_embeddings_by_owner(&self, owner_id: &str) -> Result<u64>;

    /// Swap all embeddings of one owner for a new set
    async fn replace_embeddings(
        &self,
        owner_id: &str,
        records: Vec<EmbeddingRecord>,
    ) -> Result<()> {
        self.delete_embeddings_by_owner(owner_id).await?;
        self.insert_embeddings(records).await
    }

    /// Embeddings whose owner is not among `existing_owner_ids`
    async fn find_orphaned_embeddings(
        &self,
        existing_owner_ids: &HashSet<String>,
    ) -> Result<Vec<EmbeddingRecord>> {
        let records = self.list_all_embeddings().await?;
        Ok(records
            .into_iter()
            .filter(|record| !existing_owner_ids.contains(&record.owner_id))
            .collect())
    }

    /// Every answered question, oldest first
    async fn list_questions(&self) -> Result<Vec<QuestionRecord>>;

    async fn save_question(&self, question: QuestionRecord) -> Result<()>;
}
