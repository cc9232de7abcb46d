//! Semantic ranking of bookmarks against a free-text query.
//!
//! # Architecture
//!
//! - `descriptor`: canonical text embedded for an item or a query
//! - `cache`: process-lifetime key → vector map
//! - `embeddings`: cache-aware, batching gateway to the embedding service
//! - `index`: cosine similarity scoring and top-K selection
//! - `rerank`: second pass through a completion model
//! - `search`: the pipeline above for one query
//! - `controller`: debounce and latest-wins around `search`

pub mod cache;
pub mod controller;
pub mod descriptor;
pub mod embeddings;
pub mod index;
pub mod rerank;
pub mod search;

use std::sync::Arc;

pub use cache::EmbeddingCache;
pub use controller::{QueryController, QueryOutcome, QueryState};
pub use embeddings::EmbeddingGateway;
pub use rerank::Reranker;
pub use search::SemanticSearch;

/// Shared, immutable embedding vector
pub type Embedding = Arc<[f32]>;
