//! Lumen Infer: sentence embeddings for retrieval and action matching.
//!
//! `EmbeddingEncoder` is the only type most callers need. With the `onnx`
//! feature and model files present it runs all-MiniLM-L6-v2; otherwise it
//! stays not-ready and encodes everything to zero vectors.

pub mod assets;
pub mod cache;
pub mod embedder;
pub mod encoder;
pub mod onnx_embedder;

pub use cache::QueryCache;
pub use embedder::{EmbedderBackend, NoopEmbedder};
pub use encoder::EmbeddingEncoder;

#[cfg(feature = "onnx")]
pub use onnx_embedder::OnnxEmbedder;

use std::path::Path;
use std::sync::Arc;

/// Create the best available backend for the given model directory.
#[cfg_attr(not(feature = "onnx"), allow(unused_variables))]
pub fn create_embedder(model_dir: &Path, dim: usize) -> Arc<dyn EmbedderBackend> {
    #[cfg(feature = "onnx")]
    {
        match OnnxEmbedder::load(model_dir, dim) {
            Ok(embedder) => return Arc::new(embedder),
            Err(e) => tracing::warn!("ONNX embedder unavailable: {}", e),
        }
    }

    #[cfg(not(feature = "onnx"))]
    {
        tracing::info!("ONNX feature disabled; semantic search unavailable");
    }

    Arc::new(NoopEmbedder::new(dim))
}
