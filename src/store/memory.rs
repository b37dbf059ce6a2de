use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{Document, DocumentStore, EmbeddingRecord, NewDocument, QuestionRecord};

#[derive(Debug, Default)]
struct MemoryState {
    documents: Vec<Document>,
    embeddings: Vec<EmbeddingRecord>,
    questions: Vec<QuestionRecord>,
}

/// Process-local store, lost on exit
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create_document(&self, document: NewDocument) -> Result<Document> {
        let mut state = self.state.write().await;
        if state.documents.iter().any(|d| d.id == document.id) {
            bail!("Document {} already exists", document.id);
        }

        let document = Document {
            id: document.id,
            title: document.title,
            source: document.source,
            created_at: Utc::now().naive_utc(),
        };
        state.documents.push(document.clone());
        Ok(document)
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let state = self.state.read().await;
        Ok(state.documents.iter().find(|d| d.id == id).cloned())
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        Ok(self.state.read().await.documents.clone())
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let before = state.documents.len();
        state.documents.retain(|d| d.id != id);
        let deleted = state.documents.len() != before;

        if deleted {
            state
                .questions
                .retain(|q| q.owner_id.as_deref() != Some(id));
        }

        Ok(deleted)
    }

    async fn insert_embeddings(&self, records: Vec<EmbeddingRecord>) -> Result<()> {
        self.state.write().await.embeddings.extend(records);
        Ok(())
    }

    async fn list_all_embeddings(&self) -> Result<Vec<EmbeddingRecord>> {
        Ok(self.state.read().await.embeddings.clone())
    }

    async fn list_embeddings_by_owner(&self, owner_id: &str) -> Result<Vec<EmbeddingRecord>> {
        let state = self.state.read().await;
        Ok(state
            .embeddings
            .iter()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn delete_embeddings_by_owner(&self, owner_id: &str) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.embeddings.len();
        state.embeddings.retain(|r| r.owner_id != owner_id);
        Ok((before - state.embeddings.len()) as u64)
    }

    async fn replace_embeddings(
        &self,
        owner_id: &str,
        records: Vec<EmbeddingRecord>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state.embeddings.retain(|r| r.owner_id != owner_id);
        state.embeddings.extend(records);
        Ok(())
    }

    async fn list_questions(&self) -> Result<Vec<QuestionRecord>> {
        Ok(self.state.read().await.questions.clone())
    }

    async fn save_question(&self, question: QuestionRecord) -> Result<()> {
        self.state.write().await.questions.push(question);
        Ok(())
    }
}
