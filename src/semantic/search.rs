//! One end-to-end semantic search over an item list.
//!
//! query → descriptor → embeddings (query + every item) → cosine top pool
//! → optional rerank → top K

use std::sync::Arc;

use crate::bookmarks::Bookmark;
use crate::config::SearchConfig;
use crate::semantic::descriptor::{descriptor_key, query_descriptor};
use crate::semantic::Embedding;
use crate::semantic::embeddings::{EmbeddingError, EmbeddingGateway};
use crate::semantic::index::rank;
use crate::semantic::rerank::Reranker;

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Query embedding was rejected by the embedding cache")]
    QueryVectorRejected,
}

pub struct SemanticSearch {
    gateway: Arc<EmbeddingGateway>,
    reranker: Option<Reranker>,
    config: SearchConfig,
}

impl SemanticSearch {
    /// `reranker` is only used when `config.rerank` is set.
    pub fn new(
        gateway: Arc<EmbeddingGateway>,
        reranker: Option<Reranker>,
        config: SearchConfig,
    ) -> Self {
        let reranker = reranker.filter(|_| config.rerank);
        Self {
            gateway,
            reranker,
            config,
        }
    }

    pub fn top_k(&self) -> usize {
        self.config.top_k
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Fill the embedding cache with every item's current descriptor so the
    /// first query only embeds the query text.
    ///
    /// Returns how many items ended up with a usable vector.
    pub async fn warm_up(&self, items: &[Bookmark]) -> Result<usize, EmbeddingError> {
        let keys: Vec<String> = items.iter().map(descriptor_key).collect();
        let embedded = self.gateway.embed(&keys).await?.iter().flatten().count();
        log::info!(
            "embedding warm-up done items={} embedded={embedded} cached={}",
            items.len(),
            self.gateway.cache().len()
        );
        Ok(embedded)
    }

    /// Rank `items` against `query` and return at most `top_k` of them with
    /// their similarity score set.
    ///
    /// Embedding failures fail the search, as does a rejected query vector.
    /// Items whose vector was rejected are left out. Reranking failures only
    /// cost the second pass.
    pub async fn run(
        &self,
        query: &str,
        items: &[Bookmark],
        top_k: usize,
    ) -> Result<Vec<Bookmark>, SearchError> {
        if items.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        // item vectors go first so they fix the dimension on a cold cache
        let mut keys: Vec<String> = items.iter().map(descriptor_key).collect();
        keys.push(query_descriptor(query));

        let vectors = self.gateway.embed(&keys).await?;
        let Some((Some(query_vector), item_slots)) = vectors.split_last() else {
            return Err(SearchError::QueryVectorRejected);
        };

        let (positions, item_vectors): (Vec<usize>, Vec<Embedding>) = item_slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.clone().map(|v| (i, v)))
            .unzip();
        if item_vectors.len() < items.len() {
            log::warn!(
                "{} of {} items have no usable embedding",
                items.len() - item_vectors.len(),
                items.len()
            );
        }

        let pool = self.config.candidate_pool(top_k);
        let ranked = rank(query_vector, &item_vectors, pool);
        log::debug!(
            "scored items={} candidates={} pool={pool}",
            items.len(),
            ranked.len()
        );

        let candidates: Vec<Bookmark> = ranked
            .iter()
            .map(|c| items[positions[c.index]].clone().with_score(c.score))
            .collect();

        let mut results = match &self.reranker {
            Some(reranker) => reranker.rerank(query, candidates).await,
            None => candidates,
        };
        results.truncate(top_k);

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompletionConfig;
    use crate::semantic::cache::EmbeddingCache;
    use crate::tests::fakes::{FakeCompletion, FakeEmbeddings};

    fn items() -> Vec<Bookmark> {
        vec![
            Bookmark::new("Cats", "https://pets.com/cats"),
            Bookmark::new("Rockets", "https://space.com/rockets"),
            Bookmark::new("Rust", "https://rust-lang.org"),
            Bookmark::new("Pasta", "https://food.com/pasta"),
        ]
    }

    fn search(service: Arc<FakeEmbeddings>, reranker: Option<Reranker>) -> SemanticSearch {
        let cache = Arc::new(EmbeddingCache::new());
        let gateway = Arc::new(EmbeddingGateway::new(service, cache, 100));
        SemanticSearch::new(gateway, reranker, SearchConfig::default())
    }

    #[tokio::test]
    async fn test_scores_are_attached_and_descending() {
        let search = search(Arc::new(FakeEmbeddings::new()), None);
        let results = search.run("space travel", &items(), 4).await.unwrap();

        assert_eq!(results[0].title, "Rockets");
        let scores: Vec<f32> = results.iter().map(|b| b.score.unwrap()).collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    }

    #[tokio::test]
    async fn test_truncates_to_top_k() {
        let search = search(Arc::new(FakeEmbeddings::new()), None);
        let results = search.run("rust code", &items(), 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "Rust");
    }

    #[tokio::test]
    async fn test_reranker_sees_candidate_pool() {
        let completion = Arc::new(FakeCompletion::replying(r#"{"ranking": [2]}"#));
        let reranker = Reranker::new(completion.clone(), &CompletionConfig::default());
        let search = search(Arc::new(FakeEmbeddings::new()), Some(reranker));

        // top_k 1 with multiplier 2 hands two candidates to the reranker
        let results = search.run("space travel", &items(), 1).await.unwrap();

        assert_eq!(completion.calls(), 1);
        let prompt = completion.last_prompt().unwrap();
        assert!(prompt.contains("2. "));
        assert!(!prompt.contains("3. "));
        assert_eq!(results.len(), 1);
        assert_ne!(results[0].title, "Rockets");
    }

    #[tokio::test]
    async fn test_rerank_disabled_by_config() {
        let completion = Arc::new(FakeCompletion::replying("[2, 1]"));
        let reranker = Reranker::new(completion.clone(), &CompletionConfig::default());
        let gateway = Arc::new(EmbeddingGateway::new(
            Arc::new(FakeEmbeddings::new()),
            Arc::new(EmbeddingCache::new()),
            100,
        ));
        let config = SearchConfig {
            rerank: false,
            ..SearchConfig::default()
        };
        let search = SemanticSearch::new(gateway, Some(reranker), config);

        search.run("space travel", &items(), 2).await.unwrap();
        assert_eq!(completion.calls(), 0);
    }

    #[tokio::test]
    async fn test_embedding_failure_is_fatal() {
        let search = search(Arc::new(FakeEmbeddings::new().failing_on_call(1)), None);
        let result = search.run("space travel", &items(), 2).await;
        assert!(matches!(result, Err(SearchError::Embedding(_))));
    }

    #[tokio::test]
    async fn test_warm_up_fills_cache() {
        let service = Arc::new(FakeEmbeddings::new());
        let search = search(service.clone(), None);

        assert_eq!(search.warm_up(&items()).await.unwrap(), 4);
        assert_eq!(service.texts_embedded(), 4);

        search.run("space travel", &items(), 1).await.unwrap();
        // only the query descriptor was new
        assert_eq!(service.texts_embedded(), 5);
    }

    #[tokio::test]
    async fn test_rejected_item_vector_is_skipped_on_every_run() {
        let rockets = Bookmark::new("Rockets", "https://space.com/rockets");
        let broken = Bookmark::new("Broken", "https://broken.example");
        let service = Arc::new(
            FakeEmbeddings::new().with_vector(&descriptor_key(&broken), vec![1.0; 7]),
        );
        let search = search(service, None);
        let items = vec![rockets, broken];

        for _ in 0..2 {
            let results = search.run("space travel", &items, 1).await.unwrap();
            let titles: Vec<&str> = results.iter().map(|b| b.title.as_str()).collect();
            assert_eq!(titles, ["Rockets"]);
        }
    }

    #[tokio::test]
    async fn test_rejected_query_vector_is_an_error() {
        let query_key = query_descriptor("space travel");
        let service = Arc::new(FakeEmbeddings::new().with_vector(&query_key, vec![1.0; 7]));
        let search = search(service, None);

        assert_eq!(search.warm_up(&items()).await.unwrap(), 4);
        let result = search.run("space travel", &items(), 2).await;
        assert!(matches!(result, Err(SearchError::QueryVectorRejected)));
    }

    #[tokio::test]
    async fn test_warm_up_counts_usable_vectors() {
        let broken = Bookmark::new("Broken", "https://broken.example");
        let service = Arc::new(FakeEmbeddings::new().with_vector(&descriptor_key(&broken), vec![]));
        let search = search(service, None);

        let mut all = items();
        all.push(broken);
        assert_eq!(search.warm_up(&all).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_empty_items() {
        let service = Arc::new(FakeEmbeddings::new());
        let search = search(service.clone(), None);
        assert!(search.run("anything", &[], 5).await.unwrap().is_empty());
        assert_eq!(service.calls(), 0);
    }
}
