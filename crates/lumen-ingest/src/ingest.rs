//! Document ingestion pipeline: read → dedup → chunk → embed → store document and chunks.
//!
//! Ingestion is best-effort: a document that cannot be read contributes no
//! chunks and yields `Ok(None)` rather than an error.

use std::fs::File;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::chunking::create_chunks;
use crate::reader::{DocumentReaders, DocumentType};
use lumen_core::{Error, Result, Settings};
use lumen_infer::EmbeddingEncoder;
use lumen_store::{AddDocumentOptions, NewChunk, SqliteStore};

/// Handles document ingestion: reading, chunking, embedding, and storage.
pub struct Ingester<'a> {
    store: &'a SqliteStore,
    encoder: &'a EmbeddingEncoder,
    readers: DocumentReaders,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl<'a> Ingester<'a> {
    pub fn new(store: &'a SqliteStore, encoder: &'a EmbeddingEncoder, settings: &Settings) -> Self {
        Self {
            store,
            encoder,
            readers: DocumentReaders::default(),
            chunk_size: settings.chunk_size,
            chunk_overlap: settings.chunk_overlap,
        }
    }

    pub fn with_readers(mut self, readers: DocumentReaders) -> Self {
        self.readers = readers;
        self
    }

    /// Ingest a file. Returns the document ID, or `None` if nothing could be read.
    pub fn ingest_file(&self, path: &Path) -> Result<Option<i64>> {
        let Some(doc_type) = DocumentType::from_path(path) else {
            warn!("Unsupported document type: {}", path.display());
            return Ok(None);
        };
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                warn!("Cannot open {}: {}", path.display(), e);
                return Ok(None);
            }
        };
        let Some(text) = self.readers.read_from_input_stream(file, doc_type) else {
            info!("No text read from {}; skipped", path.display());
            return Ok(None);
        };

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown");
        self.ingest_text(&text, file_name)
    }

    /// Ingest raw text under a display file name.
    ///
    /// Identical text already in the store is rejected with `DuplicateContent`
    /// before anything is written.
    pub fn ingest_text(&self, text: &str, file_name: &str) -> Result<Option<i64>> {
        if text.trim().is_empty() {
            debug!("Empty document {}; skipped", file_name);
            return Ok(None);
        }

        let hash = content_hash(text);
        if self.store.find_document_by_hash(&hash)?.is_some() {
            debug!("Duplicate content, skipping: {}", file_name);
            return Err(Error::DuplicateContent(hash));
        }

        let chunks = create_chunks(text, self.chunk_size, self.chunk_overlap);
        let refs: Vec<&str> = chunks.iter().map(String::as_str).collect();
        let embeddings = self.encoder.encode_batch(&refs);

        let mut embedded = 0usize;
        let rows: Vec<NewChunk> = chunks
            .iter()
            .zip(embeddings)
            .enumerate()
            .map(|(i, (chunk, embedding))| {
                // A zero vector means the encoder degraded; index the chunk
                // without an embedding so it never scores as a match.
                let embedding = if lumen_core::vector::is_zero_vector(&embedding) {
                    Vec::new()
                } else {
                    embedded += 1;
                    embedding
                };
                NewChunk {
                    document_id: 0,
                    file_name: file_name.to_string(),
                    text: chunk.clone(),
                    chunk_index: i as i32,
                    embedding,
                }
            })
            .collect();

        let doc_id = self.store.add_document_with_chunks(
            text,
            file_name,
            AddDocumentOptions {
                content_hash: Some(hash),
                ..Default::default()
            },
            &rows,
        )?;

        if embedded < chunks.len() {
            warn!(
                "Document {} ({}): {} of {} chunks have no embedding",
                doc_id,
                file_name,
                chunks.len() - embedded,
                chunks.len()
            );
        }
        info!("Ingested document {} ({}) with {} chunks", doc_id, file_name, chunks.len());
        Ok(Some(doc_id))
    }
}

/// Compute SHA-256 content hash.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_infer::EmbedderBackend;
    use ndarray::Array1;
    use std::sync::Arc;
    use tempfile::TempDir;

    const DIM: usize = 8;

    struct ByteBuckets;

    impl EmbedderBackend for ByteBuckets {
        fn embed(&self, text: &str) -> Result<Array1<f32>> {
            let mut v = Array1::zeros(DIM);
            for b in text.bytes() {
                v[b as usize % DIM] += 1.0;
            }
            Ok(v)
        }

        fn dimension(&self) -> usize {
            DIM
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    fn settings() -> Settings {
        Settings {
            chunk_size: 40,
            chunk_overlap: 10,
            ..Default::default()
        }
    }

    const TEXT: &str = "Lumen indexes documents on device. Each chunk gets an embedding. \
                        Questions are answered from the closest chunks.";

    #[test]
    fn test_ingest_text_links_chunks() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(dir.path(), DIM).unwrap();
        let encoder = EmbeddingEncoder::new(Arc::new(ByteBuckets), DIM);
        let ingester = Ingester::new(&store, &encoder, &settings());

        let doc_id = ingester.ingest_text(TEXT, "about.txt").unwrap().unwrap();
        let chunks = store.get_chunks_for_document(doc_id).unwrap();
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.document_id == doc_id && c.file_name == "about.txt"));
        assert_eq!(store.get_stats().unwrap().embeddings_stored, chunks.len() as i64);
    }

    #[test]
    fn test_duplicate_rejected_without_new_chunks() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(dir.path(), DIM).unwrap();
        let encoder = EmbeddingEncoder::new(Arc::new(ByteBuckets), DIM);
        let ingester = Ingester::new(&store, &encoder, &settings());

        ingester.ingest_text(TEXT, "a.txt").unwrap();
        let before = store.count_chunks(None).unwrap();
        let result = ingester.ingest_text(TEXT, "b.txt");
        assert!(matches!(result, Err(Error::DuplicateContent(_))));
        assert_eq!(store.count_chunks(None).unwrap(), before);
        assert_eq!(store.count_documents().unwrap(), 1);
    }

    #[test]
    fn test_failed_chunk_write_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(dir.path(), DIM).unwrap();
        let encoder = EmbeddingEncoder::new(Arc::new(ByteBuckets), DIM);
        let ingester = Ingester::new(&store, &encoder, &settings());

        let side = rusqlite::Connection::open(dir.path().join("lumen.db")).unwrap();
        side.execute_batch(
            "CREATE TRIGGER fail_second_chunk BEFORE INSERT ON chunks \
             WHEN NEW.chunk_index = 1 BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
        )
        .unwrap();

        assert!(matches!(
            ingester.ingest_text(TEXT, "a.txt"),
            Err(Error::Database(_))
        ));
        assert_eq!(store.count_documents().unwrap(), 0);
        assert_eq!(store.count_chunks(None).unwrap(), 0);

        side.execute_batch("DROP TRIGGER fail_second_chunk;").unwrap();
        let doc_id = ingester.ingest_text(TEXT, "a.txt").unwrap().unwrap();
        assert!(store.count_chunks(Some(doc_id)).unwrap() > 1);
    }

    #[test]
    fn test_unready_encoder_stores_unembedded_chunks() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(dir.path(), DIM).unwrap();
        let encoder = EmbeddingEncoder::unavailable(DIM);
        let ingester = Ingester::new(&store, &encoder, &settings());

        let doc_id = ingester.ingest_text(TEXT, "a.txt").unwrap().unwrap();
        assert!(store.count_chunks(Some(doc_id)).unwrap() > 0);
        assert_eq!(store.get_stats().unwrap().embeddings_stored, 0);
    }

    #[test]
    fn test_unreadable_file_is_skipped() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(dir.path().join("db"), DIM).unwrap();
        let encoder = EmbeddingEncoder::unavailable(DIM);
        let ingester = Ingester::new(&store, &encoder, &settings());

        let pdf = dir.path().join("scan.pdf");
        std::fs::write(&pdf, b"%PDF-1.7").unwrap();
        assert_eq!(ingester.ingest_file(&pdf).unwrap(), None);

        let bin = dir.path().join("image.png");
        std::fs::write(&bin, [0u8, 1, 2]).unwrap();
        assert_eq!(ingester.ingest_file(&bin).unwrap(), None);

        assert_eq!(store.count_documents().unwrap(), 0);
    }

    #[test]
    fn test_ingest_markdown_file() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(dir.path().join("db"), DIM).unwrap();
        let encoder = EmbeddingEncoder::new(Arc::new(ByteBuckets), DIM);
        let ingester = Ingester::new(&store, &encoder, &settings());

        let md = dir.path().join("notes.md");
        std::fs::write(&md, "# Notes\n\nShort note.").unwrap();
        let doc_id = ingester.ingest_file(&md).unwrap().unwrap();
        assert_eq!(store.get_document(doc_id).unwrap().unwrap().file_name, "notes.md");
    }

    #[test]
    fn test_content_hash_stable() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
        assert_eq!(content_hash("").len(), 64);
    }
}
