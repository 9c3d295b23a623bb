//! Cosine scoring and rank ordering shared by the store backends.

use std::cmp::Ordering;

use insight_core::types::{RetrievalResult, ScoredChunk};

/// Cosine similarity in `[-1, 1]`. A zero-norm operand scores 0.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut na, mut nb) = (0f32, 0f32, 0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na.sqrt() * nb.sqrt())).clamp(-1.0, 1.0)
}

/// A scored candidate tagged with its insertion sequence number.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub seq: u64,
    pub hit: ScoredChunk,
}

/// Order candidates by score (descending), then by insertion sequence
/// (ascending), and keep the first `k`.
pub fn rank(mut candidates: Vec<Candidate>, k: usize) -> RetrievalResult {
    candidates.sort_by(|a, b| match b.hit.score.total_cmp(&a.hit.score) {
        Ordering::Equal => a.seq.cmp(&b.seq),
        other => other,
    });
    candidates.truncate(k);
    RetrievalResult::from_ranked(candidates.into_iter().map(|c| c.hit).collect())
}
