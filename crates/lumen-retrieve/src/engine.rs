//! RetrievalEngine: query text in, ranked context out.
//!
//! Stateless over the index. No re-ranking beyond the index's own order.

use std::sync::Arc;

use tracing::debug;

use crate::types::{Retrieval, RetrievedContext};
use lumen_core::Result;
use lumen_infer::EmbeddingEncoder;
use lumen_store::VectorIndex;

pub struct RetrievalEngine {
    encoder: Arc<EmbeddingEncoder>,
    index: Arc<dyn VectorIndex>,
}

impl RetrievalEngine {
    pub fn new(encoder: Arc<EmbeddingEncoder>, index: Arc<dyn VectorIndex>) -> Self {
        Self { encoder, index }
    }

    /// Retrieve up to `k` chunks for `query`.
    ///
    /// An unready encoder yields an empty retrieval, not an error: callers
    /// treat it as "no retrieval available" and prompt without context.
    pub fn retrieve(&self, query: &str, k: usize) -> Result<Retrieval> {
        if !self.encoder.is_ready() {
            debug!("Encoder not ready; retrieval skipped");
            return Ok(Retrieval::default());
        }

        let embedding = self.encoder.encode(query);
        let hits = self.index.query_top_k(&embedding, k)?;

        let contexts: Vec<RetrievedContext> = hits
            .into_iter()
            .map(|hit| RetrievedContext {
                source_file_name: hit.chunk.file_name,
                text: hit.chunk.text,
                score: hit.score,
            })
            .collect();
        let context_text = contexts
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        debug!("Retrieved {} contexts (k={})", contexts.len(), k);
        Ok(Retrieval {
            context_text,
            contexts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::vector::rank_descending_by_cosine;
    use lumen_infer::EmbedderBackend;
    use lumen_store::{Chunk, NewChunk, ScoredChunk};
    use ndarray::Array1;
    use parking_lot::Mutex;

    const DIM: usize = 4;

    /// Maps the first character of the text to a fixed direction.
    struct FirstLetter;

    impl EmbedderBackend for FirstLetter {
        fn embed(&self, text: &str) -> Result<Array1<f32>> {
            let mut v = Array1::from_elem(DIM, 0.1);
            let c = text.bytes().next().unwrap_or(b'a');
            v[(c - b'a') as usize % DIM] = 1.0;
            Ok(v)
        }

        fn dimension(&self) -> usize {
            DIM
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    #[derive(Default)]
    struct MemoryIndex {
        rows: Mutex<Vec<(Chunk, Vec<f32>)>>,
    }

    impl VectorIndex for MemoryIndex {
        fn insert(&self, chunk: NewChunk) -> Result<i64> {
            let mut rows = self.rows.lock();
            let id = rows.len() as i64 + 1;
            rows.push((
                Chunk {
                    id,
                    document_id: chunk.document_id,
                    file_name: chunk.file_name,
                    text: chunk.text,
                    chunk_index: chunk.chunk_index,
                },
                chunk.embedding,
            ));
            Ok(id)
        }

        fn delete_by_document_id(&self, document_id: i64) -> Result<usize> {
            let mut rows = self.rows.lock();
            let before = rows.len();
            rows.retain(|(c, _)| c.document_id != document_id);
            Ok(before - rows.len())
        }

        fn query_top_k(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
            let rows = self.rows.lock();
            let embeddings: Vec<Vec<f32>> = rows.iter().map(|(_, e)| e.clone()).collect();
            Ok(rank_descending_by_cosine(query, &embeddings)
                .into_iter()
                .take(k)
                .map(|(i, score)| ScoredChunk {
                    score,
                    chunk: rows[i].0.clone(),
                })
                .collect())
        }

        fn dimension(&self) -> usize {
            DIM
        }
    }

    fn engine_with_five_chunks(encoder: EmbeddingEncoder) -> RetrievalEngine {
        let encoder = Arc::new(encoder);
        let index = Arc::new(MemoryIndex::default());
        for (i, text) in ["apple pie", "banana bread", "cherry tart", "date cake", "apricot jam"]
            .iter()
            .enumerate()
        {
            index
                .insert(NewChunk {
                    document_id: 1,
                    file_name: "recipes.md".into(),
                    text: text.to_string(),
                    chunk_index: i as i32,
                    embedding: encoder.encode(text),
                })
                .unwrap();
        }
        RetrievalEngine::new(encoder, index)
    }

    #[test]
    fn test_k_smaller_than_index() {
        let engine = engine_with_five_chunks(EmbeddingEncoder::new(Arc::new(FirstLetter), DIM));
        let r = engine.retrieve("almond", 3).unwrap();
        assert_eq!(r.contexts.len(), 3);
        assert!(r.contexts.windows(2).all(|w| w[0].score >= w[1].score));
        // Both "a" chunks tie at the top, in insertion order.
        assert_eq!(r.contexts[0].text, "apple pie");
        assert_eq!(r.contexts[1].text, "apricot jam");
        assert!(r.context_text.starts_with("apple pie apricot jam "));
        assert_eq!(r.contexts[0].source_file_name, "recipes.md");
    }

    #[test]
    fn test_k_larger_than_index_returns_all() {
        let engine = engine_with_five_chunks(EmbeddingEncoder::new(Arc::new(FirstLetter), DIM));
        assert_eq!(engine.retrieve("banana", 10).unwrap().contexts.len(), 5);
    }

    #[test]
    fn test_unready_encoder_fails_open() {
        let engine = engine_with_five_chunks(EmbeddingEncoder::unavailable(DIM));
        let r = engine.retrieve("apple", 3).unwrap();
        assert!(r.is_empty());
        assert!(r.context_text.is_empty());
        assert_eq!(r.detailed_context_json(), "[]");
    }
}
