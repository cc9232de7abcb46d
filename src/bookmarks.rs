use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    hash::Hash,
    path::Path,
    time::Instant,
};

/// A saved link. `url` is the identity: two bookmarks with the same url are
/// the same entity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bookmark {
    pub title: String,
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    /// Relevance assigned during a single search, never read back from disk
    #[serde(default, skip_deserializing, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

impl Hash for Bookmark {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.url.hash(state)
    }
}

impl PartialEq for Bookmark {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for Bookmark {}

impl Bookmark {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = Some(score);
        self
    }

    /// Non-empty summary, if any
    pub fn summary(&self) -> Option<&str> {
        self.summary
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Non-empty keyword list, if any
    pub fn keywords(&self) -> Option<&[String]> {
        self.keywords.as_deref().filter(|k| !k.is_empty())
    }

    pub fn is_enriched(&self) -> bool {
        self.summary().is_some() || self.keywords().is_some()
    }
}

/// Drop entries without a title or url and collapse duplicate urls to the
/// first occurrence.
pub fn dedup(items: impl IntoIterator<Item = Bookmark>) -> Vec<Bookmark> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|b| !b.title.trim().is_empty() && !b.url.trim().is_empty())
        .filter(|b| seen.insert(b.url.clone()))
        .collect()
}

/// Parse a Netscape bookmark export: every `<a href>` with text is a bookmark.
pub fn parse_html_export(html: &str) -> Vec<Bookmark> {
    let document = scraper::Html::parse_document(html);
    let link_selector = match scraper::Selector::parse("a[href]") {
        Ok(s) => s,
        Err(e) => {
            log::error!("invalid link selector: {e}");
            return vec![];
        }
    };

    let links = document.select(&link_selector).filter_map(|element| {
        let url = element.attr("href")?.trim().to_string();
        let title = element.text().collect::<String>().trim().to_string();
        Some(Bookmark::new(title, url))
    });

    dedup(links)
}

/// Parse a JSON list of bookmarks. Browser history exports are accepted as
/// well since every history record carries `title` and `url`.
pub fn parse_json_export(json: &str) -> serde_json::Result<Vec<Bookmark>> {
    let items: Vec<Bookmark> = serde_json::from_str(json)?;
    Ok(dedup(items))
}

pub fn load_items(path: &Path) -> anyhow::Result<Vec<Bookmark>> {
    let now = Instant::now();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    let items = match extension.as_str() {
        "html" | "htm" => parse_html_export(&content),
        "json" => parse_json_export(&content)
            .with_context(|| format!("{} is not a valid item list", path.display()))?,
        _ if content.trim_start().starts_with('[') => parse_json_export(&content)?,
        _ if content.trim_start().starts_with('<') => parse_html_export(&content),
        _ => return Err(anyhow!("unrecognized input format: {}", path.display())),
    };

    log::info!(
        "loaded {} items from {} in {:?}",
        items.len(),
        path.display(),
        now.elapsed()
    );

    Ok(items)
}

pub fn save_items(path: &Path, items: &[Bookmark]) -> anyhow::Result<()> {
    let persisted: Vec<Bookmark> = items
        .iter()
        .cloned()
        .map(|mut b| {
            b.score = None;
            b
        })
        .collect();
    let json = serde_json::to_string_pretty(&persisted)?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
