
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, Pool, Sqlite};
use std::path::Path;
use tracing::{debug, info, warn};

use super::{Document, DocumentStore, EmbeddingRecord, NewDocument, QuestionRecord};
use crate::QaError;

pub type DbPool = Pool<Sqlite>;

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

#[derive(Debug, FromRow)]
struct SegmentRow {
    id: i64,
    owner_id: String,
    content: String,
    vector: String,
}

#[derive(Debug, FromRow)]
struct QuestionRow {
    question: String,
    answer: String,
    owner_id: Option<String>,
    created_at: NaiveDateTime,
}

impl TryFrom<SegmentRow> for EmbeddingRecord {
    type Error = QaError;

    fn try_from(row: SegmentRow) -> Result<Self, Self::Error> {
        let vector: Vec<f32> = serde_json::from_str(&row.vector).map_err(|e| {
            QaError::Database(format!(
                "Corrupt vector for segment {} of {}: {}",
                row.id, row.owner_id, e
            ))
        })?;

        Ok(Self {
            owner_id: row.owner_id,
            segment: row.content,
            vector,
        })
    }
}

impl From<QuestionRow> for QuestionRecord {
    fn from(row: QuestionRow) -> Self {
        Self {
            question_text: row.question,
            answer_text: row.answer,
            created_at: row.created_at,
            owner_id: row.owner_id,
        }
    }
}

impl SqliteStore {
    #[inline]
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    #[inline]
    pub async fn initialize_from_config_dir(config_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        Self::new(config_dir.join("metadata.db")).await
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/store/sqlite/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run schema migration")?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    /// Number of stored segments per owner, including owners without a document
    #[inline]
    pub async fn segment_counts(&self) -> Result<Vec<(String, i64)>> {
        let counts = sqlx::query_as::<_, (String, i64)>(
            "SELECT owner_id, COUNT(*) FROM segments GROUP BY owner_id ORDER BY owner_id",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to count segments")?;

        Ok(counts)
    }

    async fn insert_segments(
        executor: &mut sqlx::SqliteConnection,
        records: &[EmbeddingRecord],
    ) -> Result<()> {
        let now = Utc::now().naive_utc();

        for record in records {
            let vector =
                serde_json::to_string(&record.vector).context("Failed to serialize vector")?;

            sqlx::query(
                "INSERT INTO segments (owner_id, content, vector, dimension, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&record.owner_id)
            .bind(&record.segment)
            .bind(vector)
            .bind(record.vector.len() as i64)
            .bind(now)
            .execute(&mut *executor)
            .await
            .with_context(|| format!("Failed to insert segment for {}", record.owner_id))?;
        }

        Ok(())
    }

    /// Decode rows, skipping any whose vector cannot be parsed
    fn decode_segments(rows: Vec<SegmentRow>) -> Vec<EmbeddingRecord> {
        let total = rows.len();
        let records: Vec<EmbeddingRecord> = rows
            .into_iter()
            .filter_map(|row| match EmbeddingRecord::try_from(row) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Skipping segment: {}", e);
                    None
                }
            })
            .collect();

        if records.len() < total {
            warn!(
                "{} of {} segments could not be decoded and were skipped",
                total - records.len(),
                total
            );
        }
        records
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn create_document(&self, document: NewDocument) -> Result<Document> {
        let now = Utc::now().naive_utc();

        sqlx::query("INSERT INTO documents (id, title, source, created_at) VALUES (?, ?, ?, ?)")
            .bind(&document.id)
            .bind(&document.title)
            .bind(&document.source)
            .bind(now)
            .execute(&self.pool)
            .await
            .context("Failed to create document")?;

        self.get_document(&document.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created document"))
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let document = sqlx::query_as::<_, Document>(
            "SELECT id, title, source, created_at FROM documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get document by id")?;

        Ok(document)
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        let documents = sqlx::query_as::<_, Document>(
            "SELECT id, title, source, created_at FROM documents ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list documents")?;

        Ok(documents)
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete document")?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_embeddings(&self, records: Vec<EmbeddingRecord>) -> Result<()> {
        if records.is_empty() {
            debug!("No embeddings to store");
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;
        Self::insert_segments(&mut tx, &records).await?;
        tx.commit().await.context("Failed to commit embeddings")?;

        info!("Stored {} embeddings", records.len());
        Ok(())
    }

    async fn list_all_embeddings(&self) -> Result<Vec<EmbeddingRecord>> {
        let rows = sqlx::query_as::<_, SegmentRow>(
            "SELECT id, owner_id, content, vector FROM segments ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list embeddings")?;

        Ok(Self::decode_segments(rows))
    }

    async fn list_embeddings_by_owner(&self, owner_id: &str) -> Result<Vec<EmbeddingRecord>> {
        let rows = sqlx::query_as::<_, SegmentRow>(
            "SELECT id, owner_id, content, vector FROM segments WHERE owner_id = ? ORDER BY id",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list embeddings by owner")?;

        Ok(Self::decode_segments(rows))
    }

    async fn delete_embeddings_by_owner(&self, owner_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM segments WHERE owner_id = ?")
            .bind(owner_id)
            .execute(&self.pool)
            .await
            .context("Failed to delete embeddings by owner")?;

        debug!(
            "Deleted {} embeddings for owner {}",
            result.rows_affected(),
            owner_id
        );
        Ok(result.rows_affected())
    }

    async fn replace_embeddings(
        &self,
        owner_id: &str,
        records: Vec<EmbeddingRecord>,
    ) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        sqlx::query("DELETE FROM segments WHERE owner_id = ?")
            .bind(owner_id)
            .execute(&mut *tx)
            .await
            .context("Failed to delete embeddings by owner")?;

        Self::insert_segments(&mut tx, &records).await?;
        tx.commit()
            .await
            .context("Failed to commit replaced embeddings")?;

        info!(
            "Replaced embeddings for owner {} with {} records",
            owner_id,
            records.len()
        );
        Ok(())
    }

    async fn list_questions(&self) -> Result<Vec<QuestionRecord>> {
        let rows = sqlx::query_as::<_, QuestionRow>(
            "SELECT question, answer, owner_id, created_at FROM questions ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list questions")?;

        Ok(rows.into_iter().map(QuestionRecord::from).collect())
    }

    async fn save_question(&self, question: QuestionRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO questions (question, answer, owner_id, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&question.question_text)
        .bind(&question.answer_text)
        .bind(&question.owner_id)
        .bind(question.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to save question")?;

        Ok(())
    }
}
