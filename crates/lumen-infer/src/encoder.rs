//! EmbeddingEncoder: text to fixed-length vectors, never failing past its boundary.
//!
//! Any backend failure yields a zero vector of the configured dimension and
//! flips the encoder to not-ready until [`EmbeddingEncoder::reinitialize`].
//! A zero vector has zero cosine similarity to everything, so downstream
//! matching degrades instead of erroring.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::assets::install_assets;
use crate::cache::QueryCache;
use crate::embedder::{EmbedderBackend, NoopEmbedder};

pub struct EmbeddingEncoder {
    backend: Arc<dyn EmbedderBackend>,
    dim: usize,
    ready: AtomicBool,
    cache: QueryCache,
}

impl EmbeddingEncoder {
    /// Wrap an already constructed backend. Ready iff the backend is available
    /// and produces vectors of `dim` components.
    pub fn new(backend: Arc<dyn EmbedderBackend>, dim: usize) -> Self {
        let ready = backend.is_available() && backend.dimension() == dim;
        if backend.is_available() && !ready {
            warn!(
                "Embedding backend dim {} does not match configured dim {}",
                backend.dimension(),
                dim
            );
        }
        Self {
            backend,
            dim,
            ready: AtomicBool::new(ready),
            cache: QueryCache::default_cache(),
        }
    }

    /// An encoder with no model. Every `encode` returns zeros.
    pub fn unavailable(dim: usize) -> Self {
        Self::new(Arc::new(NoopEmbedder::new(dim)), dim)
    }

    /// One-time initialization: install bundled assets into `model_dir` (skipped
    /// if it already exists), then load the model from there.
    ///
    /// Failures are logged and produce a not-ready encoder.
    pub fn initialize(bundled_assets: &Path, model_dir: &Path, dim: usize) -> Self {
        if let Err(e) = install_assets(bundled_assets, model_dir) {
            warn!("Embedding assets unavailable: {}", e);
            return Self::unavailable(dim);
        }
        let encoder = Self::new(crate::create_embedder(model_dir, dim), dim);
        info!("Embedding encoder ready={} dim={}", encoder.is_ready(), dim);
        encoder
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    /// Re-enable an encoder disabled by a backend failure. A backend that is
    /// unavailable or has the wrong dimension stays disabled. Returns the
    /// resulting readiness.
    pub fn reinitialize(&self) -> bool {
        if !self.is_ready() && self.backend.is_available() && self.backend.dimension() == self.dim {
            info!("Re-enabling embedding encoder");
            self.ready.store(true, Ordering::Release);
        }
        self.is_ready()
    }

    /// Encode a query. Results are cached, so repeated queries skip inference.
    pub fn encode(&self, text: &str) -> Vec<f32> {
        if !self.is_ready() {
            return self.zeros();
        }
        if let Some(hit) = self.cache.get(text) {
            debug!("Query embedding cache hit");
            return hit.to_vec();
        }
        match self.run(text) {
            Some(v) => {
                self.cache.put(text.to_string(), v.clone().into());
                v
            }
            None => self.zeros(),
        }
    }

    /// Encode document chunks, bypassing the query cache.
    pub fn encode_batch(&self, texts: &[&str]) -> Vec<Vec<f32>> {
        texts
            .iter()
            .map(|t| {
                if self.is_ready() {
                    self.run(t).unwrap_or_else(|| self.zeros())
                } else {
                    self.zeros()
                }
            })
            .collect()
    }

    fn run(&self, text: &str) -> Option<Vec<f32>> {
        match self.backend.embed(text) {
            Ok(v) if v.len() == self.dim => Some(v.to_vec()),
            Ok(v) => {
                warn!(
                    "Embedding has {} components, expected {}; encoder disabled",
                    v.len(),
                    self.dim
                );
                self.ready.store(false, Ordering::Release);
                None
            }
            Err(e) => {
                warn!("Embedding failed; encoder disabled: {}", e);
                self.ready.store(false, Ordering::Release);
                None
            }
        }
    }

    fn zeros(&self) -> Vec<f32> {
        vec![0.0; self.dim]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::{Error, Result};
    use ndarray::Array1;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    /// Hashes bytes into a few buckets; fails on the text "boom".
    struct FakeBackend {
        dim: usize,
        calls: AtomicUsize,
    }

    impl EmbedderBackend for FakeBackend {
        fn embed(&self, text: &str) -> Result<Array1<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if text == "boom" {
                return Err(Error::Inference("runtime error".into()));
            }
            let mut v = Array1::zeros(self.dim);
            for b in text.bytes() {
                v[b as usize % self.dim] += 1.0;
            }
            Ok(v)
        }

        fn dimension(&self) -> usize {
            self.dim
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    fn fake(dim: usize) -> Arc<FakeBackend> {
        Arc::new(FakeBackend {
            dim,
            calls: AtomicUsize::new(0),
        })
    }

    #[test]
    fn test_unavailable_returns_zeros() {
        let enc = EmbeddingEncoder::unavailable(384);
        assert!(!enc.is_ready());
        let v = enc.encode("hello");
        assert_eq!(v.len(), 384);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_encode_is_idempotent_and_cached() {
        let backend = fake(16);
        let enc = EmbeddingEncoder::new(backend.clone(), 16);
        assert!(enc.is_ready());

        let a = enc.encode("open camera");
        let b = enc.encode("open camera");
        assert_eq!(a, b);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failure_degrades_to_zeros_and_not_ready() {
        let enc = EmbeddingEncoder::new(fake(8), 8);
        let v = enc.encode("boom");
        assert_eq!(v, vec![0.0; 8]);
        assert!(!enc.is_ready());
        assert_eq!(enc.encode("fine now"), vec![0.0; 8]);

        assert!(enc.reinitialize());
        assert!(enc.encode("fine now").iter().any(|x| *x != 0.0));
        assert!(!EmbeddingEncoder::unavailable(8).reinitialize());
    }

    #[test]
    fn test_dimension_mismatch_is_not_ready() {
        let enc = EmbeddingEncoder::new(fake(8), 384);
        assert!(!enc.is_ready());
        assert_eq!(enc.encode("x").len(), 384);
    }

    #[test]
    fn test_batch_bypasses_cache() {
        let backend = fake(8);
        let enc = EmbeddingEncoder::new(backend.clone(), 8);
        let out = enc.encode_batch(&["a", "a", "b"]);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], out[1]);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_initialize_without_assets_is_not_ready() {
        let dir = TempDir::new().unwrap();
        let enc = EmbeddingEncoder::initialize(
            &dir.path().join("assets"),
            &dir.path().join("embedding-model"),
            384,
        );
        assert!(!enc.is_ready());
        assert_eq!(enc.encode("anything").len(), 384);
    }
}
