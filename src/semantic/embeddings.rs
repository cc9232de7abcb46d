//! Embedding gateway in front of the external embedding service.
//!
//! - Deduplicates requested keys against the cache and within the request
//! - Sends cache misses to the service in bounded batches
//! - Reassembles one slot per requested key, in request order
//!
//! A vector the cache rejects (wrong dimensionality, empty) only empties
//! the slot of its own key.

use std::collections::HashSet;
use std::sync::Arc;

use crate::semantic::cache::EmbeddingCache;
use crate::semantic::Embedding;
use crate::services::{EmbeddingService, ServiceError};

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Embedding service failed: {0}")]
    Service(#[from] ServiceError),

    #[error("Embedding service returned {got} vectors for {expected} texts")]
    CountMismatch { expected: usize, got: usize },
}

pub struct EmbeddingGateway {
    service: Arc<dyn EmbeddingService>,
    cache: Arc<EmbeddingCache>,
    batch_size: usize,
}

impl EmbeddingGateway {
    pub fn new(
        service: Arc<dyn EmbeddingService>,
        cache: Arc<EmbeddingCache>,
        batch_size: usize,
    ) -> Self {
        Self {
            service,
            cache,
            batch_size: batch_size.max(1),
        }
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    /// Embed every key, one slot per key in the same order.
    ///
    /// A failed service batch fails the whole call. Batches that completed
    /// before the failure stay cached. A slot is `None` when the cache
    /// refused the vector returned for that key.
    pub async fn embed(&self, keys: &[String]) -> Result<Vec<Option<Embedding>>, EmbeddingError> {
        let uncached = self.uncached_keys(keys);

        if !uncached.is_empty() {
            log::info!(
                "getting embeddings for {} of {} keys from {}",
                uncached.len(),
                keys.len(),
                self.service.name()
            );
        }

        for (batch_no, batch) in uncached.chunks(self.batch_size).enumerate() {
            let vectors = self.service.embed(batch).await?;
            if vectors.len() != batch.len() {
                return Err(EmbeddingError::CountMismatch {
                    expected: batch.len(),
                    got: vectors.len(),
                });
            }

            let mut rejected = 0;
            for (key, vector) in batch.iter().zip(vectors) {
                if let Err(err) = self.cache.put(key, Arc::from(vector)) {
                    log::warn!("embedding excluded: {err}");
                    rejected += 1;
                }
            }
            log::debug!(
                "embedding batch={} size={} rejected={rejected}",
                batch_no + 1,
                batch.len()
            );
        }

        Ok(keys.iter().map(|key| self.cache.get(key)).collect())
    }

    /// Keys not in the cache, each listed once, in first-seen order.
    fn uncached_keys(&self, keys: &[String]) -> Vec<String> {
        let mut seen = HashSet::new();
        keys.iter()
            .filter(|key| !self.cache.contains(key))
            .filter(|key| seen.insert(key.as_str()))
            .cloned()
            .collect()
    }
}
