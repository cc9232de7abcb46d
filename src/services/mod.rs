//! Contracts for the external services the pipeline talks to.
//!
//! Each service is a trait so the pipeline can be driven by the HTTP clients
//! in this module or by in-memory doubles in tests:
//! - `EmbeddingService`: batch of texts → one vector per text
//! - `ScrapeService`: batch of urls → page content per url
//! - `CompletionService`: prompt → raw text (decoding is the caller's job)

pub mod firecrawl;
pub mod openai;

use async_trait::async_trait;
use rand::random;
use std::time::Duration;

pub use firecrawl::FirecrawlClient;
pub use openai::OpenAiClient;

/// Base delay for the first retry, doubled on every attempt
const RETRY_BASE_DELAY_MS: u64 = 500;
const RETRY_MAX_JITTER_MS: u64 = 250;
const RETRY_MAX_DELAY_MS: u64 = 30_000;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{service}: request failed: {source}")]
    Transport {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service}: http status {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{service}: malformed response: {message}")]
    Malformed {
        service: &'static str,
        message: String,
    },

    #[error("{service}: {message}")]
    Rejected {
        service: &'static str,
        message: String,
    },
}

impl ServiceError {
    pub fn malformed(service: &'static str, message: impl Into<String>) -> Self {
        Self::Malformed {
            service,
            message: message.into(),
        }
    }

    /// Timeouts, connection failures, 5xx and 429 are worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Transport { source, .. } => {
                source.is_timeout() || source.is_connect() || source.is_request()
            }
            ServiceError::Status { status, .. } => *status == 429 || *status >= 500,
            ServiceError::Malformed { .. } | ServiceError::Rejected { .. } => false,
        }
    }
}

#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Returns exactly one vector per input text, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Default)]
pub struct ScrapeOptions {
    pub only_main_content: bool,
    pub exclude_tags: Vec<String>,
    pub timeout: Duration,
}

/// One page returned by the scrape service. `markdown` is `None` when the
/// service could not extract anything for that url.
#[derive(Debug, Clone)]
pub struct ScrapedPage {
    pub url: String,
    pub markdown: Option<String>,
}

#[async_trait]
pub trait ScrapeService: Send + Sync {
    async fn batch_scrape(
        &self,
        urls: &[String],
        opts: &ScrapeOptions,
    ) -> Result<Vec<ScrapedPage>, ServiceError>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseFormat {
    Text,
    JsonObject,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub system: Option<String>,
    pub prompt: String,
    pub format: ResponseFormat,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ServiceError>;

    fn name(&self) -> &'static str;
}

/// Run `op` until it succeeds, fails terminally, or `max_retries` extra
/// attempts are spent. Backoff is exponential with random jitter.
pub async fn with_retries<T, F, Fut>(
    service: &'static str,
    max_retries: u8,
    mut op: F,
) -> Result<T, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ServiceError>>,
{
    let mut attempt = 0u8;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_retries && err.is_retryable() => {
                attempt += 1;
                let delay = backoff_delay(attempt);
                log::info!(
                    "service={service} retrying attempt={attempt}/{max_retries} \
backoff={delay:?} err={err}"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Exponential from `RETRY_BASE_DELAY_MS`, capped at `RETRY_MAX_DELAY_MS`
/// before jitter is added.
fn backoff_delay(attempt: u8) -> Duration {
    let factor = 2u64.saturating_pow(u32::from(attempt.saturating_sub(1)));
    let exp = RETRY_BASE_DELAY_MS
        .saturating_mul(factor)
        .min(RETRY_MAX_DELAY_MS);
    Duration::from_millis(exp + random::<u64>() % RETRY_MAX_JITTER_MS)
}
