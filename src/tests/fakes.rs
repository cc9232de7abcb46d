//! Deterministic in-memory doubles for the external services.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::services::{
    CompletionRequest, CompletionService, EmbeddingService, ScrapeOptions, ScrapeService,
    ScrapedPage, ServiceError,
};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn rejected(service: &'static str, message: &str) -> ServiceError {
    ServiceError::Rejected {
        service,
        message: message.to_string(),
    }
}

/// Words that push a text towards one axis of the fake vector space.
const BUCKETS: [&[&str]; 4] = [
    &["space", "rocket", "rockets", "orbit", "travel", "launch", "nasa"],
    &["cat", "cats", "dog", "dogs", "pet", "pets"],
    &["rust", "code", "programming", "lang", "compiler"],
    &["pasta", "food", "recipe", "cooking"],
];
const BIAS: f32 = 0.1;

/// Embeds text as word counts over a few topic buckets plus a constant bias
/// dimension, so every vector is non-zero and topical texts score high
/// against each other.
#[derive(Default)]
pub struct FakeEmbeddings {
    state: Mutex<EmbeddingCalls>,
    fail_on_call: Option<usize>,
    drop_last: bool,
    latency: Option<Duration>,
    overrides: HashMap<String, Vec<f32>>,
}

#[derive(Default)]
struct EmbeddingCalls {
    calls: usize,
    max_batch: usize,
    texts: Vec<String>,
}

impl FakeEmbeddings {
    pub fn new() -> Self {
        Self::default()
    }

    /// The `n`th call (1-based) fails.
    pub fn failing_on_call(mut self, n: usize) -> Self {
        self.fail_on_call = Some(n);
        self
    }

    /// Every call returns one vector fewer than requested.
    pub fn dropping_last(mut self) -> Self {
        self.drop_last = true;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Return `vector` for `text` instead of the bucket embedding.
    pub fn with_vector(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.overrides.insert(text.to_string(), vector);
        self
    }

    pub fn vector_for(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; BUCKETS.len() + 1];
        for word in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            for (axis, words) in BUCKETS.iter().enumerate() {
                if words.contains(&word) {
                    vector[axis] += 1.0;
                }
            }
        }
        vector[BUCKETS.len()] = BIAS;
        vector
    }

    pub fn calls(&self) -> usize {
        lock(&self.state).calls
    }

    pub fn texts_embedded(&self) -> usize {
        lock(&self.state).texts.len()
    }

    pub fn embedded_texts(&self) -> Vec<String> {
        lock(&self.state).texts.clone()
    }

    pub fn max_batch(&self) -> usize {
        lock(&self.state).max_batch
    }
}

#[async_trait]
impl EmbeddingService for FakeEmbeddings {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        let call = {
            let mut state = lock(&self.state);
            state.calls += 1;
            state.calls
        };

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.fail_on_call == Some(call) {
            return Err(rejected("fake-embeddings", "scripted failure"));
        }

        {
            let mut state = lock(&self.state);
            state.max_batch = state.max_batch.max(texts.len());
            state.texts.extend(texts.iter().cloned());
        }

        let mut vectors: Vec<Vec<f32>> = texts
            .iter()
            .map(|t| {
                self.overrides
                    .get(t)
                    .cloned()
                    .unwrap_or_else(|| Self::vector_for(t))
            })
            .collect();
        if self.drop_last {
            vectors.pop();
        }
        Ok(vectors)
    }

    fn name(&self) -> &'static str {
        "fake-embeddings"
    }
}

/// Serves pages from a fixed url → markdown map. Unknown urls come back
/// without content.
#[derive(Default)]
pub struct FakeScraper {
    pages: HashMap<String, String>,
    fail: bool,
    calls: Mutex<Vec<Vec<String>>>,
}

impl FakeScraper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, markdown: &str) -> Self {
        self.pages.insert(url.to_string(), markdown.to_string());
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn calls(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Every url sent to the service, in request order.
    pub fn requested(&self) -> Vec<String> {
        lock(&self.calls).iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl ScrapeService for FakeScraper {
    async fn batch_scrape(
        &self,
        urls: &[String],
        _opts: &ScrapeOptions,
    ) -> Result<Vec<ScrapedPage>, ServiceError> {
        lock(&self.calls).push(urls.to_vec());
        if self.fail {
            return Err(rejected("fake-scraper", "scripted failure"));
        }

        Ok(urls
            .iter()
            .map(|url| ScrapedPage {
                url: url.clone(),
                markdown: self.pages.get(url).cloned(),
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "fake-scraper"
    }
}

/// Replies from a script, one entry per call. Once the script runs out the
/// fallback reply is used.
pub struct FakeCompletion {
    script: Mutex<VecDeque<Result<String, ServiceError>>>,
    fallback: Option<String>,
    prompts: Mutex<Vec<String>>,
    call_times: Mutex<Vec<Instant>>,
    latency: Option<Duration>,
}

impl FakeCompletion {
    fn with(script: Vec<Result<String, ServiceError>>, fallback: Option<String>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            prompts: Mutex::new(Vec::new()),
            call_times: Mutex::new(Vec::new()),
            latency: None,
        }
    }

    /// Same reply to every call.
    pub fn replying(text: &str) -> Self {
        Self::with(Vec::new(), Some(text.to_string()))
    }

    /// Every call fails.
    pub fn failing() -> Self {
        Self::with(Vec::new(), None)
    }

    pub fn scripted(script: Vec<Result<String, ServiceError>>) -> Self {
        Self::with(script, Some(String::new()))
    }

    /// Each call takes `latency` to answer.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn error() -> ServiceError {
        rejected("fake-completion", "scripted failure")
    }

    pub fn calls(&self) -> usize {
        lock(&self.prompts).len()
    }

    pub fn last_prompt(&self) -> Option<String> {
        lock(&self.prompts).last().cloned()
    }

    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        lock(&self.call_times).clone()
    }
}

#[async_trait]
impl CompletionService for FakeCompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ServiceError> {
        lock(&self.prompts).push(request.prompt.clone());
        lock(&self.call_times).push(Instant::now());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if let Some(next) = lock(&self.script).pop_front() {
            return next;
        }
        self.fallback.clone().ok_or_else(Self::error)
    }

    fn name(&self) -> &'static str {
        "fake-completion"
    }
}
