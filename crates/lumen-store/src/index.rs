//! Vector index contract consumed by ingestion and retrieval.

use lumen_core::Result;

use crate::types::{NewChunk, ScoredChunk};

/// Chunk storage with cosine-similarity nearest-neighbour queries.
///
/// `query_top_k` returns at most `k` chunks ordered best-first; equal scores
/// keep insertion order. Chunks whose embedding length differs from the
/// index dimension are stored but never returned.
pub trait VectorIndex: Send + Sync {
    /// Insert a chunk and its embedding. Returns the chunk id.
    fn insert(&self, chunk: NewChunk) -> Result<i64>;

    /// Remove every chunk belonging to a document. Returns the number removed.
    fn delete_by_document_id(&self, document_id: i64) -> Result<usize>;

    /// The `k` chunks most similar to `query`, best-first.
    fn query_top_k(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>>;

    /// Embedding dimension accepted by this index.
    fn dimension(&self) -> usize;
}
