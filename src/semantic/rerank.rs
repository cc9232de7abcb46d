//! Second-pass reordering of the top candidates by a completion model.
//!
//! The model receives the query and a 1-based numbered list of candidate
//! descriptors and answers with an ordering of those numbers. Invalid or
//! out-of-range numbers are dropped, and candidates the model never
//! mentions are appended in their original order, so no candidate is lost.
//! If the call fails, the input order is returned unchanged.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

use crate::bookmarks::Bookmark;
use crate::config::CompletionConfig;
use crate::semantic::descriptor::descriptor_key;
use crate::services::{CompletionRequest, CompletionService, ResponseFormat};

const SYSTEM_PROMPT: &str = "You rank saved bookmarks by relevance to a search query. \
Respond with a JSON object of the form {\"ranking\": [3, 1, 2]} listing bookmark numbers, \
most relevant first.";

/// Why a completion response could not be turned into a ranking.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DecodeError {
    #[error("empty response")]
    Empty,

    #[error("json object has no ranking array")]
    MissingRanking,

    #[error("response contains no numbers")]
    NoNumbers,
}

pub struct Reranker {
    completion: Arc<dyn CompletionService>,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl Reranker {
    pub fn new(completion: Arc<dyn CompletionService>, config: &CompletionConfig) -> Self {
        Self {
            completion,
            model: config.rerank_model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    /// Reorder `candidates` for `query`. Never fails: on any service or
    /// decode error the input order is kept.
    pub async fn rerank(&self, query: &str, candidates: Vec<Bookmark>) -> Vec<Bookmark> {
        if candidates.len() < 2 {
            return candidates;
        }

        log::debug!("reranking candidates={}", candidates.len());
        let request = self.request(query, &candidates);

        let text = match self.completion.complete(&request).await {
            Ok(text) => text,
            Err(err) => {
                log::warn!(
                    "rerank outcome=fallback service={} err={err}",
                    self.completion.name()
                );
                return candidates;
            }
        };

        match decode_ranking(&text) {
            Ok(ranking) => merge_ranking(candidates, &ranking),
            Err(err) => {
                log::warn!("rerank outcome=fallback decode_err={err}");
                candidates
            }
        }
    }

    fn request(&self, query: &str, candidates: &[Bookmark]) -> CompletionRequest {
        let listing = candidates
            .iter()
            .enumerate()
            .map(|(i, b)| format!("{}. {}", i + 1, descriptor_key(b)))
            .collect::<Vec<_>>()
            .join("\n");

        CompletionRequest {
            model: self.model.clone(),
            system: Some(SYSTEM_PROMPT.to_string()),
            prompt: format!(
                "Query: \"{query}\"\n\n\
Rank the following bookmarks based on their relevance to the query:\n\n{listing}\n\n\
Provide the ranking as a JSON object with a \"ranking\" array of bookmark numbers."
            ),
            format: ResponseFormat::JsonObject,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

/// Decode a ranking response into the raw list of integers it names.
///
/// Accepts `{"ranking": [..]}`, a bare JSON array, or a plain
/// comma/whitespace separated list. Entries that are not integers are
/// skipped here; range checks happen in [`merge_ranking`].
pub fn decode_ranking(text: &str) -> Result<Vec<i64>, DecodeError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(DecodeError::Empty);
    }

    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => {
            let array = ["ranking", "rankings", "order", "indices"]
                .into_iter()
                .find_map(|key| map.get(key).and_then(Value::as_array))
                .ok_or(DecodeError::MissingRanking)?;
            Ok(array.iter().filter_map(integer_from_value).collect())
        }
        Ok(Value::Array(array)) => Ok(array.iter().filter_map(integer_from_value).collect()),
        _ => decode_delimited(text),
    }
}

fn integer_from_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn decode_delimited(text: &str) -> Result<Vec<i64>, DecodeError> {
    let tokens: Vec<&str> = text
        .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .map(|t| t.trim_matches(|c: char| !c.is_ascii_digit() && c != '-'))
        .filter(|t| !t.is_empty())
        .collect();

    let numbers: Vec<i64> = tokens.iter().filter_map(|t| t.parse().ok()).collect();
    if numbers.is_empty() {
        return Err(DecodeError::NoNumbers);
    }
    Ok(numbers)
}

/// Apply a 1-based ranking to `candidates`.
///
/// Out-of-range and repeated indices are ignored. Candidates missing from
/// the ranking follow in original relative order.
pub fn merge_ranking<T>(candidates: Vec<T>, ranking: &[i64]) -> Vec<T> {
    let len = candidates.len();
    let mut slots: Vec<Option<T>> = candidates.into_iter().map(Some).collect();
    let mut seen = HashSet::new();
    let mut merged = Vec::with_capacity(len);

    for &rank in ranking {
        if rank < 1 || rank as u64 > len as u64 {
            log::debug!("rerank index {rank} out of range 1..={len}, dropped");
            continue;
        }
        let position = (rank - 1) as usize;
        if !seen.insert(position) {
            continue;
        }
        if let Some(item) = slots[position].take() {
            merged.push(item);
        }
    }

    merged.extend(slots.into_iter().flatten());
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::fakes::FakeCompletion;

    fn candidates() -> Vec<Bookmark> {
        vec![
            Bookmark::new("Cats", "https://pets.com/cats"),
            Bookmark::new("Rockets", "https://space.com/rockets"),
            Bookmark::new("Rust", "https://rust-lang.org"),
        ]
    }

    fn urls(items: &[Bookmark]) -> Vec<&str> {
        items.iter().map(|b| b.url.as_str()).collect()
    }

    fn reranker(completion: FakeCompletion) -> Reranker {
        Reranker::new(Arc::new(completion), &CompletionConfig::default())
    }

    #[test]
    fn test_decode_structured() {
        assert_eq!(decode_ranking(r#"{"ranking": [2, 1, 3]}"#).unwrap(), vec![2, 1, 3]);
        assert_eq!(decode_ranking(r#"{"ranking": ["2", "x", 1]}"#).unwrap(), vec![2, 1]);
        assert_eq!(decode_ranking("[3, 1]").unwrap(), vec![3, 1]);
    }

    #[test]
    fn test_decode_delimited() {
        assert_eq!(decode_ranking("3, 1, 2").unwrap(), vec![3, 1, 2]);
        assert_eq!(decode_ranking("2,abc, 1.").unwrap(), vec![2, 1]);
        assert_eq!(decode_ranking("1. 3\n2. 1").unwrap(), vec![1, 3, 2, 1]);
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(decode_ranking("   "), Err(DecodeError::Empty));
        assert_eq!(decode_ranking(r#"{"answer": 1}"#), Err(DecodeError::MissingRanking));
        assert_eq!(decode_ranking("no idea"), Err(DecodeError::NoNumbers));
    }

    #[test]
    fn test_merge_reorders() {
        assert_eq!(merge_ranking(vec!['a', 'b', 'c'], &[3, 1, 2]), vec!['c', 'a', 'b']);
    }

    #[test]
    fn test_merge_appends_omitted_in_original_order() {
        assert_eq!(merge_ranking(vec!['a', 'b', 'c', 'd'], &[3]), vec!['c', 'a', 'b', 'd']);
    }

    #[test]
    fn test_merge_drops_out_of_range_and_duplicates() {
        assert_eq!(
            merge_ranking(vec!['a', 'b', 'c'], &[0, 4, -1, 2, 2, 99]),
            vec!['b', 'a', 'c']
        );
    }

    #[test]
    fn test_merge_never_loses_candidates() {
        let rankings: Vec<Vec<i64>> = vec![
            vec![],
            vec![1],
            vec![5, 5, 5],
            vec![2, 1, 2, 1],
            vec![-3, 0, i64::MAX, i64::MIN],
            vec![4, 3, 2, 1, 0],
        ];
        for ranking in rankings {
            let mut merged = merge_ranking(vec![1, 2, 3, 4], &ranking);
            merged.sort();
            assert_eq!(merged, vec![1, 2, 3, 4], "ranking {ranking:?}");
        }
    }

    #[tokio::test]
    async fn test_rerank_applies_model_order() {
        let r = reranker(FakeCompletion::replying(r#"{"ranking": [2, 3, 1]}"#));
        let out = r.rerank("space", candidates()).await;
        assert_eq!(
            urls(&out),
            vec!["https://space.com/rockets", "https://rust-lang.org", "https://pets.com/cats"]
        );
    }

    #[tokio::test]
    async fn test_rerank_plain_list_fallback_contract() {
        let r = reranker(FakeCompletion::replying("2, 7, banana"));
        let out = r.rerank("space", candidates()).await;
        assert_eq!(
            urls(&out),
            vec!["https://space.com/rockets", "https://pets.com/cats", "https://rust-lang.org"]
        );
    }

    #[tokio::test]
    async fn test_rerank_service_failure_keeps_order() {
        let r = reranker(FakeCompletion::failing());
        let out = r.rerank("space", candidates()).await;
        assert_eq!(urls(&out), urls(&candidates()));
    }

    #[tokio::test]
    async fn test_rerank_garbage_keeps_order() {
        let r = reranker(FakeCompletion::replying("I cannot help with that"));
        let out = r.rerank("space", candidates()).await;
        assert_eq!(urls(&out), urls(&candidates()));
    }

    #[tokio::test]
    async fn test_rerank_prompt_numbers_descriptors() {
        let completion = Arc::new(FakeCompletion::replying("[1]"));
        let r = Reranker::new(completion.clone(), &CompletionConfig::default());
        r.rerank("space travel", candidates()).await;

        let prompt = completion.last_prompt().unwrap();
        assert!(prompt.contains("Query: \"space travel\""));
        assert!(prompt.contains("1. Cats pets.com cats"));
        assert!(prompt.contains("2. Rockets space.com rockets"));
    }

    #[tokio::test]
    async fn test_single_candidate_skips_service() {
        let completion = Arc::new(FakeCompletion::replying("[1]"));
        let r = Reranker::new(completion.clone(), &CompletionConfig::default());
        let out = r.rerank("q", vec![Bookmark::new("a", "https://a.com")]).await;
        assert_eq!(out.len(), 1);
        assert_eq!(completion.calls(), 0);
    }
}
