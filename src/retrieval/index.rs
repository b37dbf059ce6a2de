use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::store::{DocumentStore, EmbeddingRecord};

/// Immutable point-in-time copy of every embedding record.
///
/// Snapshots are replaced wholesale and never patched, so a holder keeps a
/// consistent view for as long as it keeps the `Arc`.
#[derive(Debug, Clone)]
pub struct VectorIndexSnapshot {
    records: Vec<EmbeddingRecord>,
    loaded_at: Instant,
}

impl VectorIndexSnapshot {
    #[inline]
    pub fn new(records: Vec<EmbeddingRecord>) -> Self {
        Self {
            records,
            loaded_at: Instant::now(),
        }
    }

    #[inline]
    pub fn records(&self) -> &[EmbeddingRecord] {
        &self.records
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[inline]
    pub fn age(&self) -> Duration {
        self.loaded_at.elapsed()
    }

    /// Copy of this snapshot holding only the records of one owner
    #[inline]
    pub fn scoped_to(&self, owner_id: &str) -> Self {
        Self {
            records: self
                .records
                .iter()
                .filter(|record| record.owner_id == owner_id)
                .cloned()
                .collect(),
            loaded_at: self.loaded_at,
        }
    }
}

/// TTL-bounded cache of all embedding records held by the store.
///
/// Anything that writes embeddings to the store must call [`VectorIndex::invalidate`]
/// afterwards, otherwise searches keep using the old snapshot until the TTL runs out.
pub struct VectorIndex {
    store: Arc<dyn DocumentStore>,
    ttl: Duration,
    current: RwLock<Option<Arc<VectorIndexSnapshot>>>,
}

impl VectorIndex {
    #[inline]
    pub fn new(store: Arc<dyn DocumentStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            current: RwLock::new(None),
        }
    }

    /// Current snapshot, reloading from the store when there is none or it
    /// has outlived the TTL
    #[inline]
    pub async fn snapshot(&self) -> Result<Arc<VectorIndexSnapshot>> {
        let cached = self.current.read().await.clone();
        if let Some(snapshot) = cached.filter(|s| self.is_fresh(s)) {
            return Ok(snapshot);
        }

        let mut current = self.current.write().await;
        // Another request may have reloaded while we waited for the lock
        if let Some(snapshot) = current.as_ref().filter(|s| self.is_fresh(s)) {
            return Ok(Arc::clone(snapshot));
        }

        debug!("Reloading vector index from store");
        let records = self
            .store
            .list_all_embeddings()
            .await
            .context("Failed to load embeddings for the vector index")?;

        let snapshot = Arc::new(VectorIndexSnapshot::new(records));
        info!("Vector index loaded with {} records", snapshot.len());
        *current = Some(Arc::clone(&snapshot));

        Ok(snapshot)
    }

    /// Drop the cached snapshot so the next call to `snapshot` reloads
    #[inline]
    pub async fn invalidate(&self) {
        *self.current.write().await = None;
        debug!("Vector index invalidated");
    }

    #[inline]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_fresh(&self, snapshot: &VectorIndexSnapshot) -> bool {
        snapshot.age() < self.ttl
    }
}
