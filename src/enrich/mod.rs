//! Enrichment: fetch each bookmark's page content and ask a completion
//! model for a summary and keywords.
//!
//! Items are processed in fixed-size batches, strictly one after another,
//! released through a [`PacingGate`]. A failing batch keeps its items as they
//! were and the run moves on to the next batch.

pub mod categories;
pub mod content_cache;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::bookmarks::Bookmark;
use crate::config::Config;
use crate::pacing::PacingGate;
use crate::services::{
    CompletionRequest, CompletionService, ResponseFormat, ScrapeOptions, ScrapeService,
    ServiceError,
};

pub use categories::Categorizer;
pub use content_cache::{ContentCache, FileContentCache, MemoryContentCache, ScrapedContent};

/// Content used for hosts the scrape service is known to refuse
pub const UNSCRAPABLE_CONTENT: &str = "This content cannot be scraped";
/// Content used when a scrape produced nothing for a url
pub const SCRAPE_FAILED_CONTENT: &str = "Failed to scrape content";

const SYSTEM_PROMPT: &str = "You are a helpful assistant that summarizes scraped pages \
for bookmarks. Respond with a JSON object containing a \"bookmarks\" array, where each \
entry has the \"index\" of the page, a \"summary\" of its content and a \"keywords\" array.";

#[derive(Debug, thiserror::Error)]
pub enum EnrichError {
    #[error("Scrape failed: {0}")]
    Scrape(#[source] ServiceError),

    #[error("Summarization failed: {0}")]
    Completion(#[source] ServiceError),

    #[error("Malformed enrichment response: {0}")]
    Decode(String),
}

/// One decoded entry of an enrichment response. `index` is 1-based within
/// the batch.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Enrichment {
    pub index: i64,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub keywords: Option<Vec<String>>,
}

pub struct Enricher {
    scraper: Arc<dyn ScrapeService>,
    completion: Arc<dyn CompletionService>,
    content_cache: Arc<dyn ContentCache>,
    scrape_opts: ScrapeOptions,
    batch_size: usize,
    max_content_chars: usize,
    unscrapable_domains: Vec<String>,
    model: String,
    max_tokens: u32,
    temperature: f32,
    gate: PacingGate,
}

impl Enricher {
    pub fn new(
        scraper: Arc<dyn ScrapeService>,
        completion: Arc<dyn CompletionService>,
        content_cache: Arc<dyn ContentCache>,
        config: &Config,
    ) -> Self {
        Self {
            scraper,
            completion,
            content_cache,
            scrape_opts: ScrapeOptions {
                only_main_content: config.scrape.only_main_content,
                exclude_tags: config.scrape.exclude_tags.clone(),
                timeout: std::time::Duration::from_millis(config.scrape.timeout_ms),
            },
            batch_size: config.enrich.batch_size.max(1),
            max_content_chars: config.enrich.max_content_chars,
            unscrapable_domains: config
                .enrich
                .unscrapable_domains
                .iter()
                .map(|d| d.trim().trim_start_matches('.').to_lowercase())
                .collect(),
            model: config.completion.summary_model.clone(),
            max_tokens: config.completion.max_tokens,
            temperature: config.completion.temperature,
            gate: PacingGate::new(config.enrich.pacing()),
        }
    }

    pub async fn enrich(&self, items: Vec<Bookmark>) -> Vec<Bookmark> {
        self.enrich_with_progress(items, |_| {}).await
    }

    /// Same as [`Enricher::enrich`], calling `on_batch` with the number of
    /// items processed so far after every batch.
    pub async fn enrich_with_progress<F>(
        &self,
        items: Vec<Bookmark>,
        mut on_batch: F,
    ) -> Vec<Bookmark>
    where
        F: FnMut(usize),
    {
        let total_batches = items.len().div_ceil(self.batch_size);
        let mut enriched = Vec::with_capacity(items.len());
        log::debug!(
            "enriching items={} batches={total_batches} pacing={:?}",
            items.len(),
            self.gate.interval()
        );

        for (batch_no, chunk) in items.chunks(self.batch_size).enumerate() {
            let batch_no = batch_no + 1;

            let outcome = {
                // the next batch is paced from when this one finishes
                let _permit = self.gate.acquire().await;
                log::info!(
                    "processing batch={batch_no}/{total_batches} size={}",
                    chunk.len()
                );
                self.enrich_batch(chunk).await
            };

            match outcome {
                Ok(batch) => {
                    let count = batch.iter().filter(|b| b.is_enriched()).count();
                    log::info!(
                        "batch={batch_no} outcome=ok enriched={count}/{}",
                        chunk.len()
                    );
                    enriched.extend(batch);
                }
                Err(err) => {
                    log::warn!(
                        "batch={batch_no} outcome=fallback service={} err={err}",
                        self.completion.name()
                    );
                    enriched.extend(chunk.iter().cloned());
                }
            }
            on_batch(enriched.len());
        }

        enriched
    }

    async fn enrich_batch(&self, chunk: &[Bookmark]) -> Result<Vec<Bookmark>, EnrichError> {
        let urls: Vec<String> = chunk.iter().map(|b| b.url.clone()).collect();
        let contents = self.resolve_content(&urls).await?;

        let request = self.request(chunk, &contents);
        let text = self
            .completion
            .complete(&request)
            .await
            .map_err(EnrichError::Completion)?;

        let entries = decode_enrichment(&text)?;
        Ok(merge_enrichment(chunk, entries))
    }

    /// Content for every url, in order. Cached and unscrapable urls never
    /// reach the scrape service; anything the service could not extract gets
    /// [`SCRAPE_FAILED_CONTENT`].
    pub async fn resolve_content(
        &self,
        urls: &[String],
    ) -> Result<Vec<ScrapedContent>, EnrichError> {
        let mut resolved: Vec<Option<ScrapedContent>> = urls
            .iter()
            .map(|url| {
                if is_unscrapable(url, &self.unscrapable_domains) {
                    Some(ScrapedContent::new(url.as_str(), UNSCRAPABLE_CONTENT))
                } else {
                    self.content_cache.get(url)
                }
            })
            .collect();

        let mut seen = HashSet::new();
        let to_scrape: Vec<String> = urls
            .iter()
            .zip(&resolved)
            .filter(|(_, content)| content.is_none())
            .map(|(url, _)| url.clone())
            .filter(|url| seen.insert(url.clone()))
            .collect();

        if !to_scrape.is_empty() {
            log::debug!(
                "scraping urls={} cached={} via {}",
                to_scrape.len(),
                urls.len() - to_scrape.len(),
                self.scraper.name()
            );

            let pages = self
                .scraper
                .batch_scrape(&to_scrape, &self.scrape_opts)
                .await
                .map_err(EnrichError::Scrape)?;

            let scraped: HashMap<String, String> = pages
                .into_iter()
                .filter_map(|page| {
                    let markdown = page.markdown.filter(|m| !m.trim().is_empty())?;
                    Some((page.url, markdown))
                })
                .collect();

            for (slot, url) in resolved.iter_mut().zip(urls) {
                if slot.is_some() {
                    continue;
                }
                if let Some(markdown) = scraped.get(url) {
                    let entry = ScrapedContent::new(url.as_str(), markdown.as_str());
                    self.content_cache.put(entry.clone());
                    *slot = Some(entry);
                }
            }
        }

        Ok(resolved
            .into_iter()
            .zip(urls)
            .map(|(slot, url)| {
                slot.unwrap_or_else(|| ScrapedContent::new(url.as_str(), SCRAPE_FAILED_CONTENT))
            })
            .collect())
    }

    fn request(&self, chunk: &[Bookmark], contents: &[ScrapedContent]) -> CompletionRequest {
        let pages = chunk
            .iter()
            .zip(contents)
            .enumerate()
            .map(|(i, (bookmark, content))| {
                format!(
                    "{}. Title: {}\nURL: {}\nContent: {}\n",
                    i + 1,
                    bookmark.title,
                    bookmark.url,
                    truncate_chars(&content.markdown, self.max_content_chars)
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        CompletionRequest {
            model: self.model.clone(),
            system: Some(SYSTEM_PROMPT.to_string()),
            prompt: format!(
                "Generate a short SEO paragraph summary and a list of keywords for each of the \
following scraped pages. If a page covers many different topics (eg. a blog), note all \
of them:\n\n{pages}"
            ),
            format: ResponseFormat::JsonObject,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

/// Decode `{"bookmarks": [..]}` or a bare array of entries.
///
/// A response that is not JSON or has no entry array is an error. Single
/// entries that do not have the expected shape are skipped.
pub fn decode_enrichment(text: &str) -> Result<Vec<Enrichment>, EnrichError> {
    let value: Value =
        serde_json::from_str(text.trim()).map_err(|e| EnrichError::Decode(e.to_string()))?;

    let entries = match value {
        Value::Array(entries) => entries,
        Value::Object(mut map) => match map.remove("bookmarks") {
            Some(Value::Array(entries)) => entries,
            _ => return Err(EnrichError::Decode("missing bookmarks array".to_string())),
        },
        _ => return Err(EnrichError::Decode("expected an object or array".to_string())),
    };

    Ok(entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<Enrichment>(entry) {
            Ok(entry) => Some(entry),
            Err(err) => {
                log::debug!("skipping enrichment entry: {err}");
                None
            }
        })
        .collect())
}

/// Apply decoded entries to a batch by 1-based index. Entries outside the
/// batch are dropped; items without an entry are returned unchanged.
pub fn merge_enrichment(chunk: &[Bookmark], entries: Vec<Enrichment>) -> Vec<Bookmark> {
    let mut merged = chunk.to_vec();

    for entry in entries {
        if entry.index < 1 || entry.index as u64 > chunk.len() as u64 {
            log::debug!(
                "enrichment index {} outside batch of {}, dropped",
                entry.index,
                chunk.len()
            );
            continue;
        }
        let item = &mut merged[(entry.index - 1) as usize];

        if let Some(summary) = entry
            .summary
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
        {
            item.summary = Some(summary);
        }

        let keywords: Vec<String> = entry
            .keywords
            .unwrap_or_default()
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        if !keywords.is_empty() {
            item.keywords = Some(keywords);
        }
    }

    merged
}

/// Exact host or sub-domain match. Urls without a host never match.
pub fn is_unscrapable(url: &str, domains: &[String]) -> bool {
    let Some(host) = Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_string)) else {
        return false;
    };
    let host = host.trim_start_matches("www.");

    domains
        .iter()
        .any(|domain| host == domain || host.ends_with(&format!(".{domain}")))
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((offset, _)) => &text[..offset],
        None => text,
    }
}
