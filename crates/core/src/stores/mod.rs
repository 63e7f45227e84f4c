pub mod memory;
pub mod qdrant;

pub use memory::InMemoryIndexStore;
pub use qdrant::QdrantIndexStore;

use crate::models::ScoredChunk;
use std::cmp::Ordering;

/// Score descending, then ordinal ascending, then `code` before `file-summary`
/// before `repo-summary`. Remaining ties fall back to chunk id for a total order.
pub fn rank_order(left: &ScoredChunk, right: &ScoredChunk) -> Ordering {
    right
        .score
        .total_cmp(&left.score)
        .then_with(|| left.chunk.ordinal.cmp(&right.chunk.ordinal))
        .then_with(|| left.chunk.kind.cmp(&right.chunk.kind))
        .then_with(|| left.chunk.chunk_id.cmp(&right.chunk.chunk_id))
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}
