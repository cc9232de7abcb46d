//! Cosine similarity scoring and top-K candidate selection.

/// A candidate that survived scoring.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    /// Position of the candidate in the scored input
    pub index: usize,
    /// Cosine similarity score (-1.0 to 1.0)
    pub score: f32,
}

/// Errors that can occur when scoring a single candidate.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ScoreError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Cannot score a zero-norm vector")]
    ZeroNormVector,
}

/// Cosine similarity: dot product over the product of magnitudes.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, ScoreError> {
    if a.len() != b.len() {
        return Err(ScoreError::DimensionMismatch {
            expected: a.len(),
            got: b.len(),
        });
    }

    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a < f32::EPSILON || norm_b < f32::EPSILON {
        return Err(ScoreError::ZeroNormVector);
    }

    let dot_product: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    Ok(dot_product / (norm_a * norm_b))
}

/// Score every candidate against `query`, one entry per candidate.
///
/// Candidates that cannot be scored (zero norm, wrong length) yield `Err`
/// for that position only.
pub fn score<V: AsRef<[f32]>>(query: &[f32], candidates: &[V]) -> Vec<Result<f32, ScoreError>> {
    candidates
        .iter()
        .map(|c| cosine_similarity(query, c.as_ref()))
        .collect()
}

/// Rank candidates by descending similarity and keep the best `top_k`.
///
/// Equal scores keep their input order. Unscorable candidates are logged
/// and left out.
pub fn rank<V: AsRef<[f32]>>(
    query: &[f32],
    candidates: &[V],
    top_k: usize,
) -> Vec<ScoredCandidate> {
    let mut results: Vec<ScoredCandidate> = score(query, candidates)
        .into_iter()
        .enumerate()
        .filter_map(|(index, result)| match result {
            Ok(score) if score.is_finite() => Some(ScoredCandidate { index, score }),
            Ok(score) => {
                log::warn!("candidate={index} excluded: non-finite score {score}");
                None
            }
            Err(err) => {
                log::warn!("candidate={index} excluded: {err}");
                None
            }
        })
        .collect();

    // sort_by is stable, ties keep input order
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    results.truncate(top_k);

    results
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f32 = 1e-6;

    #[test]
    fn test_symmetric() {
        let a = [0.3, -1.2, 4.0];
        let b = [2.0, 0.5, -0.7];
        let ab = cosine_similarity(&a, &b).unwrap();
        let ba = cosine_similarity(&b, &a).unwrap();
        assert!((ab - ba).abs() < TOLERANCE);
    }

    #[test]
    fn test_self_similarity_is_one() {
        let a = [0.3, -1.2, 4.0, 9.5];
        let s = cosine_similarity(&a, &a).unwrap();
        assert!((s - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_orthogonal_and_opposite() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap().abs() < TOLERANCE);
        assert!((cosine_similarity(&[1.0, 0.0], &[-2.0, 0.0]).unwrap() + 1.0).abs() < TOLERANCE);
    }

    #[test]
    fn test_zero_norm_is_an_error() {
        assert_eq!(
            cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]),
            Err(ScoreError::ZeroNormVector)
        );
        assert_eq!(
            cosine_similarity(&[1.0, 0.0], &[0.0, 0.0]),
            Err(ScoreError::ZeroNormVector)
        );
    }

    #[test]
    fn test_dimension_mismatch_is_an_error() {
        assert!(matches!(
            cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]),
            Err(ScoreError::DimensionMismatch { expected: 2, got: 3 })
        ));
    }

    #[test]
    fn test_rank_orders_by_score() {
        let query = [1.0, 0.0];
        let candidates: Vec<Vec<f32>> = vec![vec![0.0, 1.0], vec![1.0, 0.1], vec![1.0, 1.0]];
        let ranked = rank(&query, &candidates, 10);

        let order: Vec<usize> = ranked.iter().map(|c| c.index).collect();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn test_ties_keep_input_order() {
        // scores 0.9, 0.9, 0.3 against the query [1, 0]
        let query = [1.0, 0.0];
        let high = vec![0.9, (1.0f32 - 0.81).sqrt()];
        let low = vec![0.3, (1.0f32 - 0.09).sqrt()];
        let candidates = vec![high.clone(), high, low];

        let ranked = rank(&query, &candidates, 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].index, 0);
        assert_eq!(ranked[1].index, 1);
        assert!((ranked[0].score - 0.9).abs() < 1e-5);
    }

    #[test]
    fn test_zero_candidate_is_excluded_not_fatal() {
        let query = [1.0, 0.0];
        let candidates: Vec<Vec<f32>> = vec![vec![1.0, 0.0], vec![0.0, 0.0], vec![0.5, 0.5]];
        let ranked = rank(&query, &candidates, 10);

        assert_eq!(ranked.len(), 2);
        assert!(ranked.iter().all(|c| c.index != 1));
    }

    #[test]
    fn test_zero_query_excludes_everything() {
        let candidates: Vec<Vec<f32>> = vec![vec![1.0, 0.0]];
        let ranked = rank(&[0.0, 0.0], &candidates, 10);
        assert!(ranked.is_empty());
    }

    #[test]
    fn test_truncates_to_top_k() {
        let query = [1.0, 0.0];
        let candidates: Vec<Vec<f32>> = (0..10).map(|i| vec![1.0, i as f32 * 0.1]).collect();
        let ranked = rank(&query, &candidates, 3);
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].index, 0);
    }
}
