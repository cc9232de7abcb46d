//! Process-lifetime embedding cache.
//!
//! Maps a descriptor key to its embedding. Entries are never evicted: a key
//! is derived from an item's content, so a changed item produces a new key
//! instead of a stale hit.

use std::collections::HashMap;
use std::sync::{OnceLock, PoisonError, RwLock};

use crate::semantic::Embedding;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Dimension mismatch for key {key:?}: expected {expected}, got {got}")]
    DimensionMismatch {
        key: String,
        expected: usize,
        got: usize,
    },

    #[error("Refusing to cache an empty vector for key {0:?}")]
    EmptyVector(String),
}

/// Shared, append-only key → vector map.
///
/// The first stored vector fixes the dimensionality; later vectors of a
/// different length are rejected.
#[derive(Default)]
pub struct EmbeddingCache {
    entries: RwLock<HashMap<String, Embedding>>,
    dimensions: OnceLock<usize>,
}

impl EmbeddingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Embedding> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn put(&self, key: &str, vector: Embedding) -> Result<(), CacheError> {
        if vector.is_empty() {
            return Err(CacheError::EmptyVector(key.to_string()));
        }

        let expected = *self.dimensions.get_or_init(|| vector.len());
        if vector.len() != expected {
            return Err(CacheError::DimensionMismatch {
                key: key.to_string(),
                expected,
                got: vector.len(),
            });
        }

        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), vector);
        Ok(())
    }

    /// Dimensionality fixed by the first stored vector
    pub fn dimensions(&self) -> Option<usize> {
        self.dimensions.get().copied()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
