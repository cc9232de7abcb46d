//! Sort bookmarks into a fixed set of categories with a completion model.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::bookmarks::Bookmark;
use crate::config::Config;
use crate::pacing::PacingGate;
use crate::services::{CompletionRequest, CompletionService, ResponseFormat};

pub const CATEGORIES: [&str; 9] = [
    "Movies",
    "Books",
    "Music",
    "Podcasts",
    "Games",
    "News",
    "Twitter",
    "Youtube",
    "Productivity",
];

pub struct Categorizer {
    completion: Arc<dyn CompletionService>,
    model: String,
    max_tokens: u32,
    temperature: f32,
    gate: PacingGate,
}

impl Categorizer {
    pub fn new(completion: Arc<dyn CompletionService>, config: &Config) -> Self {
        Self {
            completion,
            model: config.completion.rerank_model.clone(),
            max_tokens: config.completion.max_tokens,
            temperature: config.completion.temperature,
            gate: PacingGate::new(config.enrich.pacing()),
        }
    }

    /// Category → bookmarks in that category. A bookmark can appear under
    /// several categories or none.
    pub async fn categorize(&self, items: &[Bookmark]) -> BTreeMap<&'static str, Vec<Bookmark>> {
        let mut categories: BTreeMap<&'static str, Vec<Bookmark>> = BTreeMap::new();

        for item in items {
            let found = {
                let _permit = self.gate.acquire().await;
                self.categories_for(item).await
            };
            for category in found {
                categories.entry(category).or_default().push(item.clone());
            }
        }

        categories
    }

    /// Empty when the completion call fails.
    pub async fn categories_for(&self, item: &Bookmark) -> Vec<&'static str> {
        let request = CompletionRequest {
            model: self.model.clone(),
            system: Some("You are a helpful assistant that categorizes bookmarks.".to_string()),
            prompt: format!(
                "Categorize the following bookmark into one or more of these categories: {}. \
Respond with only the category names, separated by commas.\n\nTitle: {}\nURL: {}",
                CATEGORIES.join(", "),
                item.title,
                item.url
            ),
            format: ResponseFormat::Text,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        match self.completion.complete(&request).await {
            Ok(text) => parse_categories(&text),
            Err(err) => {
                log::warn!(
                    "categorize url={} outcome=skipped service={} err={err}",
                    item.url,
                    self.completion.name()
                );
                Vec::new()
            }
        }
    }
}

/// Known category names from a comma-separated reply, case-insensitive,
/// each at most once.
pub fn parse_categories(text: &str) -> Vec<&'static str> {
    let mut found = Vec::new();
    for label in text.split([',', '\n']) {
        let label = label.trim().trim_matches(|c: char| c == '.' || c == '"');
        if let Some(category) = CATEGORIES.iter().find(|c| c.eq_ignore_ascii_case(label)) {
            if !found.contains(category) {
                found.push(*category);
            }
        }
    }
    found
}
