//! Scraped page content keyed by url.
//!
//! Entries are never expired; once a page is scraped it is reused until the
//! cache file is removed.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::StorageManager;

const CACHE_FILE: &str = "scraped.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapedContent {
    pub url: String,
    pub markdown: String,
    pub last_scraped: DateTime<Utc>,
}

impl ScrapedContent {
    pub fn new(url: impl Into<String>, markdown: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            markdown: markdown.into(),
            last_scraped: Utc::now(),
        }
    }
}

pub trait ContentCache: Send + Sync {
    fn get(&self, url: &str) -> Option<ScrapedContent>;
    fn put(&self, entry: ScrapedContent);
}

#[derive(Default)]
pub struct MemoryContentCache {
    entries: RwLock<HashMap<String, ScrapedContent>>,
}

impl MemoryContentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: impl IntoIterator<Item = ScrapedContent>) -> Self {
        let cache = Self::new();
        for entry in entries {
            cache.put(entry);
        }
        cache
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<ScrapedContent> {
        let mut entries: Vec<ScrapedContent> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.url.cmp(&b.url));
        entries
    }
}

impl ContentCache for MemoryContentCache {
    fn get(&self, url: &str) -> Option<ScrapedContent> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
    }

    fn put(&self, entry: ScrapedContent) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry.url.clone(), entry);
    }
}

/// Content cache persisted as `scraped.json` through a [`StorageManager`].
///
/// Every `put` rewrites the file. A failed write is logged and the entry
/// stays available in memory for the rest of the run.
pub struct FileContentCache {
    memory: MemoryContentCache,
    storage: Box<dyn StorageManager>,
}

impl FileContentCache {
    pub fn load(storage: Box<dyn StorageManager>) -> anyhow::Result<Self> {
        let entries: Vec<ScrapedContent> = if storage.exists(CACHE_FILE) {
            let raw = storage.read(CACHE_FILE)?;
            serde_json::from_slice(&raw)?
        } else {
            Vec::new()
        };

        log::debug!("content cache loaded entries={}", entries.len());
        Ok(Self {
            memory: MemoryContentCache::with_entries(entries),
            storage,
        })
    }

    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    fn persist(&self) -> anyhow::Result<()> {
        let data = serde_json::to_vec_pretty(&self.memory.snapshot())?;
        self.storage.write(CACHE_FILE, &data)?;
        Ok(())
    }
}

impl ContentCache for FileContentCache {
    fn get(&self, url: &str) -> Option<ScrapedContent> {
        self.memory.get(url)
    }

    fn put(&self, entry: ScrapedContent) {
        self.memory.put(entry);
        if let Err(err) = self.persist() {
            log::warn!("failed to persist content cache: {err:#}");
        }
    }
}
