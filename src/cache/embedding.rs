use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::LruStore;
use crate::embeddings::{Embedding, EmbeddingService, fallback_embedding};

/// Memoizes embedding service calls by normalized text.
///
/// Only genuine embeddings are ever stored. When the service fails, times out
/// or answers with an empty vector, the caller gets a fallback vector and the
/// cache stays untouched so a later successful call can fill the slot.
pub struct EmbeddingCache {
    entries: LruStore<String, Vec<f32>>,
    service: Arc<dyn EmbeddingService>,
    timeout: Duration,
    fallback_dimension: usize,
}

impl EmbeddingCache {
    #[inline]
    pub fn new(
        service: Arc<dyn EmbeddingService>,
        capacity: usize,
        timeout: Duration,
        fallback_dimension: usize,
    ) -> Self {
        Self {
            entries: LruStore::new(capacity),
            service,
            timeout,
            fallback_dimension,
        }
    }

    /// Trim and case-fold text into its cache key
    #[inline]
    pub fn normalize(text: &str) -> String {
        text.trim().to_lowercase()
    }

    #[inline]
    pub async fn get_or_compute(&self, text: &str) -> Embedding {
        let key = Self::normalize(text);

        if let Some(vector) = self.entries.get(&key) {
            debug!("Embedding cache hit ({} chars)", key.chars().count());
            return Embedding::genuine(vector);
        }

        if key.is_empty() {
            return self.fallback(&key);
        }

        match tokio::time::timeout(self.timeout, self.service.embed(&key)).await {
            Ok(Ok(vector)) if !vector.is_empty() => {
                self.entries.put(key, vector.clone());
                Embedding::genuine(vector)
            }
            Ok(Ok(_)) => {
                warn!("Embedding service returned an empty vector, using fallback embedding");
                self.fallback(&key)
            }
            Ok(Err(e)) => {
                warn!("Embedding service failed, using fallback embedding: {:#}", e);
                self.fallback(&key)
            }
            Err(_) => {
                warn!(
                    "Embedding service timed out after {:?}, using fallback embedding",
                    self.timeout
                );
                self.fallback(&key)
            }
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn clear(&self) {
        self.entries.clear();
    }

    fn fallback(&self, key: &str) -> Embedding {
        Embedding::fallback(fallback_embedding(key, self.fallback_dimension))
    }
}
