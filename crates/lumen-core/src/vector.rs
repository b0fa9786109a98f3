//! Vector math shared by retrieval and action matching.

use std::cmp::Ordering;

use ndarray::ArrayView1;

/// Norms at or below this are treated as zero.
const NORM_EPSILON: f32 = 1e-9;

/// Cosine similarity `dot(a, b) / (|a| * |b|)`.
///
/// Returns 0.0 when either vector has zero norm or the lengths differ, so a
/// zero vector from a degraded encoder never matches anything.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let a = ArrayView1::from(a);
    let b = ArrayView1::from(b);

    let norm_a = a.dot(&a).sqrt();
    let norm_b = b.dot(&b).sqrt();
    if norm_a <= NORM_EPSILON || norm_b <= NORM_EPSILON {
        return 0.0;
    }
    a.dot(&b) / (norm_a * norm_b)
}

/// L2 norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    let v = ArrayView1::from(v);
    v.dot(&v).sqrt()
}

/// Whether every component is zero.
pub fn is_zero_vector(v: &[f32]) -> bool {
    l2_norm(v) <= NORM_EPSILON
}

/// Rank candidates by descending cosine similarity to `query`.
///
/// The sort is stable: equal scores keep their input order.
pub fn rank_descending_by_cosine(query: &[f32], candidates: &[Vec<f32>]) -> Vec<(usize, f32)> {
    let mut scores: Vec<(usize, f32)> = candidates
        .iter()
        .enumerate()
        .map(|(idx, c)| (idx, cosine_similarity(query, c)))
        .collect();
    scores.sort_by(|l, r| r.1.partial_cmp(&l.1).unwrap_or(Ordering::Equal));
    scores
}
