//! Descriptor keys: the canonical text embedded for an item or a query.
//!
//! Priority for items:
//! 1. title + summary
//! 2. title + keywords
//! 3. title + url rewritten into plain tokens
//!
//! Keys depend on the item's current fields, so callers re-derive them
//! after enrichment instead of storing them.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::bookmarks::Bookmark;

/// Maximum descriptor length (characters, not tokens)
const MAX_DESCRIPTOR_LENGTH: usize = 2048;

static SCHEME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b[a-z][a-z0-9+.-]*://|\b(?:https?|mailto|file):").expect("valid scheme regex")
});

/// Descriptor for a bookmark.
pub fn descriptor_key(bookmark: &Bookmark) -> String {
    let detail = if let Some(summary) = bookmark.summary() {
        summary.to_string()
    } else if let Some(keywords) = bookmark.keywords() {
        keywords.join(", ")
    } else {
        normalize_url(&bookmark.url)
    };

    let title = bookmark.title.trim();
    let detail = detail.trim();
    let key = match (title.is_empty(), detail.is_empty()) {
        (true, _) => detail.to_string(),
        (false, true) => title.to_string(),
        (false, false) => format!("{title} {detail}"),
    };

    truncate(&collapse_whitespace(&key))
}

/// Descriptor for a query: the query text itself, title-less.
pub fn query_descriptor(query: &str) -> String {
    truncate(&collapse_whitespace(query))
}

/// Turn a url into embedding-friendly tokens: scheme markers, slashes and
/// hyphens become spaces.
pub fn normalize_url(url: &str) -> String {
    let without_scheme = SCHEME_REGEX.replace_all(url, " ");
    let spaced = without_scheme.replace(['/', '-'], " ");
    collapse_whitespace(&spaced)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_DESCRIPTOR_LENGTH {
        return text.to_string();
    }
    text.chars().take(MAX_DESCRIPTOR_LENGTH).collect()
}
