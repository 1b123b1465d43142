//! Score normalization and weighted fusion.

/// Min-max normalizes scores to `[0, 1]` within one result list.
///
/// A single-element list normalizes to `1.0`; a list where every score
/// is equal also normalizes to `1.0` for each entry.
#[must_use]
pub fn min_max_normalize(scores: &[f64]) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }
    let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if range <= f64::EPSILON {
        return vec![1.0; scores.len()];
    }
    scores.iter().map(|s| (s - min) / range).collect()
}

/// Weighted fusion of normalized vector and lexical scores.
///
/// A result absent from one list contributes `0.0` on that side.
#[must_use]
pub fn fuse(vector_norm: Option<f64>, lexical_norm: Option<f64>, w_vector: f64, w_lexical: f64) -> f64 {
    w_vector * vector_norm.unwrap_or(0.0) + w_lexical * lexical_norm.unwrap_or(0.0)
}
