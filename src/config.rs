use crate::storage::{self, StorageManager};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const CONFIG_FILE: &str = "config.yaml";

/// Default number of results returned by a search
pub const DEFAULT_TOP_K: usize = 50;
/// Candidate pool handed to the reranker is `top_k * multiplier`
const DEFAULT_CANDIDATE_MULTIPLIER: usize = 2;
const DEFAULT_DEBOUNCE_MS: u64 = 300;

const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-large";
/// Embedding service request limit (texts per request)
const DEFAULT_EMBEDDING_BATCH_SIZE: usize = 100;
const MAX_EMBEDDING_BATCH_SIZE: usize = 2048;
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

const DEFAULT_RERANK_MODEL: &str = "gpt-4o";
const DEFAULT_SUMMARY_MODEL: &str = "gpt-4o-mini";
const DEFAULT_MAX_TOKENS: u32 = 1000;
const DEFAULT_TEMPERATURE: f32 = 0.3;

const DEFAULT_ENRICH_BATCH_SIZE: usize = 10;
const DEFAULT_PACING_MS: u64 = 1000;
const DEFAULT_MAX_CONTENT_CHARS: usize = 4000;

const DEFAULT_FIRECRAWL_BASE_URL: &str = "https://api.firecrawl.dev/v1";
const DEFAULT_SCRAPE_TIMEOUT_MS: u64 = 5000;

const DEFAULT_HTTP_MAX_RETRIES: u8 = 3;
const MAX_HTTP_RETRIES: u8 = 10;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config file is not valid utf8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("config is malformed: {0}")]
    Malformed(#[from] serde_yml::Error),

    #[error("{field} {message}")]
    Invalid { field: &'static str, message: String },

    #[error("environment variable {0} is missing")]
    MissingKey(&'static str),
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Headroom given to the reranker, must be at least 2
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,

    /// Quiet period before a query executes
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default = "default_true")]
    pub rerank: bool,
}

impl SearchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn candidate_pool(&self, top_k: usize) -> usize {
        top_k.saturating_mul(self.candidate_multiplier.max(2))
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            candidate_multiplier: DEFAULT_CANDIDATE_MULTIPLIER,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            rerank: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            batch_size: DEFAULT_EMBEDDING_BATCH_SIZE,
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompletionConfig {
    #[serde(default = "default_rerank_model")]
    pub rerank_model: String,

    #[serde(default = "default_summary_model")]
    pub summary_model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            rerank_model: DEFAULT_RERANK_MODEL.to_string(),
            summary_model: DEFAULT_SUMMARY_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnrichConfig {
    #[serde(default = "default_enrich_batch_size")]
    pub batch_size: usize,

    /// Minimum spacing between two batches hitting the external services
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,

    /// Scraped content is cut to this many characters before summarization
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,

    /// Domains the scrape service cannot handle (social media)
    #[serde(default = "default_unscrapable_domains")]
    pub unscrapable_domains: Vec<String>,
}

impl EnrichConfig {
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_ENRICH_BATCH_SIZE,
            pacing_ms: DEFAULT_PACING_MS,
            max_content_chars: DEFAULT_MAX_CONTENT_CHARS,
            unscrapable_domains: default_unscrapable_domains(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScrapeConfig {
    #[serde(default = "default_firecrawl_base_url")]
    pub base_url: String,

    #[serde(default = "default_scrape_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_true")]
    pub only_main_content: bool,

    #[serde(default = "default_exclude_tags")]
    pub exclude_tags: Vec<String>,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_FIRECRAWL_BASE_URL.to_string(),
            timeout_ms: DEFAULT_SCRAPE_TIMEOUT_MS,
            only_main_content: true,
            exclude_tags: default_exclude_tags(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_max_retries")]
    pub max_retries: u8,

    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_HTTP_MAX_RETRIES,
            timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_candidate_multiplier() -> usize {
    DEFAULT_CANDIDATE_MULTIPLIER
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_embedding_batch_size() -> usize {
    DEFAULT_EMBEDDING_BATCH_SIZE
}

fn default_openai_base_url() -> String {
    DEFAULT_OPENAI_BASE_URL.to_string()
}

fn default_rerank_model() -> String {
    DEFAULT_RERANK_MODEL.to_string()
}

fn default_summary_model() -> String {
    DEFAULT_SUMMARY_MODEL.to_string()
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn default_enrich_batch_size() -> usize {
    DEFAULT_ENRICH_BATCH_SIZE
}

fn default_pacing_ms() -> u64 {
    DEFAULT_PACING_MS
}

fn default_max_content_chars() -> usize {
    DEFAULT_MAX_CONTENT_CHARS
}

fn default_unscrapable_domains() -> Vec<String> {
    ["twitter.com", "x.com", "youtube.com"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_firecrawl_base_url() -> String {
    DEFAULT_FIRECRAWL_BASE_URL.to_string()
}

fn default_scrape_timeout_ms() -> u64 {
    DEFAULT_SCRAPE_TIMEOUT_MS
}

fn default_exclude_tags() -> Vec<String> {
    ["script", "style", "header", "footer", "nav", "aside"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_http_max_retries() -> u8 {
    DEFAULT_HTTP_MAX_RETRIES
}

fn default_http_timeout_secs() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub embeddings: EmbeddingConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub enrich: EnrichConfig,
    #[serde(default)]
    pub scrape: ScrapeConfig,
    #[serde(default)]
    pub http: HttpConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: String,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.search.top_k == 0 {
            return Err(ConfigError::invalid("search.top_k", "must be greater than 0"));
        }

        if self.search.candidate_multiplier < 2 {
            return Err(ConfigError::invalid(
                "search.candidate_multiplier",
                format!("must be at least 2, got {}", self.search.candidate_multiplier),
            ));
        }

        let batch = self.embeddings.batch_size;
        if batch == 0 || batch > MAX_EMBEDDING_BATCH_SIZE {
            return Err(ConfigError::invalid(
                "embeddings.batch_size",
                format!("must be between 1 and {MAX_EMBEDDING_BATCH_SIZE}, got {batch}"),
            ));
        }

        if !(0.0..=2.0).contains(&self.completion.temperature) {
            return Err(ConfigError::invalid(
                "completion.temperature",
                format!("must be between 0.0 and 2.0, got {}", self.completion.temperature),
            ));
        }

        if self.enrich.batch_size == 0 {
            return Err(ConfigError::invalid("enrich.batch_size", "must be greater than 0"));
        }

        // pacing is the rate-limit backpressure between enrichment batches
        if self.enrich.pacing_ms == 0 {
            return Err(ConfigError::invalid("enrich.pacing_ms", "must be greater than 0"));
        }

        if self.enrich.max_content_chars == 0 {
            return Err(ConfigError::invalid(
                "enrich.max_content_chars",
                "must be greater than 0",
            ));
        }

        if self.http.max_retries > MAX_HTTP_RETRIES {
            return Err(ConfigError::invalid(
                "http.max_retries",
                format!(
                    "must be at most {MAX_HTTP_RETRIES}, got {}",
                    self.http.max_retries
                ),
            ));
        }

        Ok(())
    }

    pub fn load_with(base_path: &str) -> Result<Self, ConfigError> {
        let store = storage::BackendLocal::new(base_path)?;

        // create new if does not exist
        if !store.exists(CONFIG_FILE) {
            store.write(CONFIG_FILE, serde_yml::to_string(&Self::default())?.as_bytes())?;
        }

        let config_str = String::from_utf8(store.read(CONFIG_FILE)?)?;
        let mut config: Self = serde_yml::from_str(&config_str)?;

        config.base_path = base_path.to_string();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let store = storage::BackendLocal::new(&self.base_path)?;

        let config_str = serde_yml::to_string(&self)?;
        store.write(CONFIG_FILE, config_str.as_bytes())?;
        Ok(())
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }
}

/// Read a service credential from the environment.
pub fn api_key(var: &'static str) -> Result<String, ConfigError> {
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
        _ => Err(ConfigError::MissingKey(var)),
    }
}
