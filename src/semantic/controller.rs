//! Query controller: debounce, latest-wins and error containment around
//! [`SemanticSearch`].
//!
//! Every call to [`QueryController::search`] starts a new generation. After
//! the debounce window the call only executes if it is still the newest
//! generation, and its results are only returned if no newer query started
//! while it was executing. Older calls resolve to
//! [`QueryOutcome::Superseded`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tracing::Instrument;

use crate::bookmarks::Bookmark;
use crate::semantic::embeddings::EmbeddingError;
use crate::semantic::search::SemanticSearch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Idle,
    Debouncing,
    Executing,
    Succeeded,
    Failed,
}

#[derive(Debug, PartialEq)]
pub enum QueryOutcome {
    /// Results for the newest query. Empty when the query failed.
    Results(Vec<Bookmark>),
    /// A newer query was issued before this one finished.
    Superseded,
}

impl QueryOutcome {
    pub fn into_results(self) -> Option<Vec<Bookmark>> {
        match self {
            QueryOutcome::Results(results) => Some(results),
            QueryOutcome::Superseded => None,
        }
    }
}

pub struct QueryController {
    search: SemanticSearch,
    debounce: Duration,
    top_k: usize,
    generation: AtomicU64,
    state: Mutex<QueryState>,
    bookmarks: RwLock<Arc<Vec<Bookmark>>>,
}

impl QueryController {
    pub fn new(search: SemanticSearch, bookmarks: Vec<Bookmark>) -> Self {
        let debounce = search.config().debounce();
        let top_k = search.top_k();
        Self {
            search,
            debounce,
            top_k,
            generation: AtomicU64::new(0),
            state: Mutex::new(QueryState::Idle),
            bookmarks: RwLock::new(Arc::new(bookmarks)),
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn state(&self) -> QueryState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the searchable items. Queries already executing keep the list
    /// they started with.
    pub fn set_bookmarks(&self, bookmarks: Vec<Bookmark>) {
        *self.bookmarks.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(bookmarks);
    }

    pub fn bookmarks(&self) -> Arc<Vec<Bookmark>> {
        self.bookmarks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn warm_up(&self) -> Result<usize, EmbeddingError> {
        let items = self.bookmarks();
        self.search.warm_up(&items).await
    }

    pub async fn search(&self, query: &str) -> QueryOutcome {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        if query.trim().is_empty() {
            self.transition(QueryState::Idle);
            return QueryOutcome::Results(Vec::new());
        }

        self.transition(QueryState::Debouncing);
        tokio::time::sleep(self.debounce).await;

        if !self.is_current(generation) {
            log::debug!("query generation={generation} superseded while debouncing");
            return QueryOutcome::Superseded;
        }

        self.transition(QueryState::Executing);
        let items = self.bookmarks();
        let span = tracing::info_span!("query", generation, items = items.len());
        let result = self
            .search
            .run(query, &items, self.top_k)
            .instrument(span)
            .await;

        if !self.is_current(generation) {
            log::debug!("query generation={generation} finished after a newer query, discarded");
            return QueryOutcome::Superseded;
        }

        let outcome = match result {
            Ok(results) => {
                log::info!("query generation={generation} results={}", results.len());
                self.transition(QueryState::Succeeded);
                results
            }
            Err(err) => {
                log::error!("query generation={generation} failed: {err}");
                self.transition(QueryState::Failed);
                Vec::new()
            }
        };

        self.transition(QueryState::Idle);
        QueryOutcome::Results(outcome)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn transition(&self, next: QueryState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != next {
            log::debug!("query state {:?} -> {:?}", *state, next);
            *state = next;
        }
    }
}
