//! Embedding backend trait and the unavailable-model placeholder.
//!
//! A backend only knows how to run a model. Readiness tracking, caching and
//! zero-vector degradation live in [`crate::EmbeddingEncoder`].

use ndarray::Array1;

use lumen_core::Result;

/// Trait for embedding backends.
pub trait EmbedderBackend: Send + Sync {
    /// Generate an embedding for a text string.
    fn embed(&self, text: &str) -> Result<Array1<f32>>;

    /// Get the embedding dimension.
    fn dimension(&self) -> usize;

    /// Check if the embedder is available (model loaded).
    fn is_available(&self) -> bool;
}

/// Placeholder used when no model could be loaded.
pub struct NoopEmbedder {
    dim: usize,
}

impl NoopEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl EmbedderBackend for NoopEmbedder {
    fn embed(&self, _text: &str) -> Result<Array1<f32>> {
        Err(lumen_core::Error::Inference("embedding model not loaded".into()))
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn is_available(&self) -> bool {
        false
    }
}
