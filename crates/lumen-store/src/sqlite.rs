//! SQLite-backed document, chunk, and chat store with in-memory cosine search.
//!
//! Embeddings are persisted as f32 blobs and mirrored into a row-normalized
//! matrix so a query is a single matrix-vector product. Rows are kept in
//! chunk id order, which makes ties resolve by insertion order.

use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, Axis};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::embedding::{blob_to_embedding, embedding_to_blob};
use crate::index::VectorIndex;
use crate::schema::{CHAT_SCHEMA_SQL, SCHEMA_SQL};
use crate::types::*;
use lumen_core::{Error, Result};

/// SQLite store with exact cosine vector search.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
    embedding_dim: usize,
    /// Pre-loaded normalized embedding matrix for vector search: (N, dim) float32.
    embedding_matrix: Mutex<EmbeddingMatrix>,
}

struct EmbeddingMatrix {
    /// Normalized embeddings, shape (N, dim). Zero vectors stay zero.
    matrix: Array2<f32>,
    /// Chunk IDs corresponding to each row, ascending.
    chunk_ids: Vec<i64>,
    /// Whether the matrix needs reloading.
    dirty: bool,
}

fn db_err(e: rusqlite::Error) -> Error {
    Error::Database(e.to_string())
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl SqliteStore {
    /// Open or create the SQLite store.
    ///
    /// `db_dir` is the directory (e.g., `data/vectordb/`). The file will be `db_dir/lumen.db`.
    pub fn open(db_dir: impl AsRef<Path>, embedding_dim: usize) -> Result<Self> {
        let db_dir = db_dir.as_ref();
        std::fs::create_dir_all(db_dir).map_err(|e| Error::Storage(e.to_string()))?;
        let db_path = db_dir.join("lumen.db");

        let conn = Self::create_connection(&db_path)?;
        Self::init_schema(&conn)?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path,
            embedding_dim,
            embedding_matrix: Mutex::new(EmbeddingMatrix {
                matrix: Array2::zeros((0, embedding_dim)),
                chunk_ids: Vec::new(),
                dirty: true,
            }),
        };

        store.load_embedding_matrix()?;

        info!(
            "SqliteStore initialized: {} documents, {} chunks, dim={}, path={}",
            store.count_documents()?,
            store.count_chunks(None)?,
            embedding_dim,
            store.db_path.display()
        );

        Ok(store)
    }

    fn create_connection(db_path: &Path) -> Result<Connection> {
        let conn = Connection::open(db_path).map_err(db_err)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(db_err)?;
        Ok(conn)
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        let full_schema = format!("{}\n{}", SCHEMA_SQL, CHAT_SCHEMA_SQL);
        conn.execute_batch(&full_schema)
            .map_err(|e| Error::Database(format!("Schema init failed: {}", e)))?;
        Ok(())
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    // ---------------------------------------------------------------
    // Documents
    // ---------------------------------------------------------------

    /// Insert a document. Returns the new document ID.
    pub fn add_document(&self, text: &str, file_name: &str, opts: AddDocumentOptions) -> Result<i64> {
        let conn = self.conn.lock();
        Self::insert_document_row(&conn, text, file_name, &opts)
    }

    /// Insert a document and all of its chunks in one transaction.
    ///
    /// Either everything is written or nothing is, so a failed ingestion never
    /// leaves a truncated document holding its content hash. The
    /// `document_id` of each chunk is replaced with the new document's ID.
    pub fn add_document_with_chunks(
        &self,
        text: &str,
        file_name: &str,
        opts: AddDocumentOptions,
        chunks: &[NewChunk],
    ) -> Result<i64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let doc_id = Self::insert_document_row(&tx, text, file_name, &opts)?;
        let mut indexed = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let (chunk_id, embedded) = self.insert_chunk_row(&tx, doc_id, chunk)?;
            if embedded {
                indexed.push((chunk_id, chunk.embedding.as_slice()));
            }
        }
        tx.commit().map_err(db_err)?;

        // Still under the connection lock, so no reload can interleave.
        for (chunk_id, embedding) in indexed {
            self.append_to_matrix(chunk_id, embedding)?;
        }
        Ok(doc_id)
    }

    fn insert_document_row(
        conn: &Connection,
        text: &str,
        file_name: &str,
        opts: &AddDocumentOptions,
    ) -> Result<i64> {
        let added_at = opts.added_at.unwrap_or_else(now_millis);
        conn.prepare_cached(
            "INSERT INTO documents (text, file_name, content_hash, added_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .map_err(db_err)?
        .insert(params![text, file_name, opts.content_hash, added_at])
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint") {
                Error::DuplicateContent(opts.content_hash.clone().unwrap_or_default())
            } else {
                db_err(e)
            }
        })
    }

    /// Find a document by content hash.
    pub fn find_document_by_hash(&self, content_hash: &str) -> Result<Option<Document>> {
        let conn = self.conn.lock();
        let result = conn.prepare_cached("SELECT * FROM documents WHERE content_hash = ?1")
            .map_err(db_err)?
            .query_row(params![content_hash], Self::row_to_document)
            .optional()
            .map_err(db_err);
        result
    }

    /// Get a document by ID.
    pub fn get_document(&self, doc_id: i64) -> Result<Option<Document>> {
        let conn = self.conn.lock();
        let result = conn.prepare_cached("SELECT * FROM documents WHERE id = ?1")
            .map_err(db_err)?
            .query_row(params![doc_id], Self::row_to_document)
            .optional()
            .map_err(db_err);
        result
    }

    /// Delete a document; its chunks and embeddings cascade.
    pub fn delete_document(&self, doc_id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let count = conn
            .execute("DELETE FROM documents WHERE id = ?1", params![doc_id])
            .map_err(db_err)?;
        if count > 0 {
            self.embedding_matrix.lock().dirty = true;
        }
        drop(conn);
        if count > 0 {
            info!("Deleted document {}", doc_id);
        }
        Ok(count > 0)
    }

    /// All documents ordered by time added.
    pub fn list_documents(&self, ascending: bool) -> Result<Vec<Document>> {
        let order = if ascending { "ASC" } else { "DESC" };
        let conn = self.conn.lock();
        let sql = format!("SELECT * FROM documents ORDER BY added_at {}, id {}", order, order);
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt.query_map([], Self::row_to_document).map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// Count total documents.
    pub fn count_documents(&self) -> Result<i64> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
            .map_err(db_err)
    }

    // ---------------------------------------------------------------
    // Chunks
    // ---------------------------------------------------------------

    /// Insert a chunk with its embedding. Returns the new chunk ID.
    ///
    /// An embedding whose length differs from the store dimension (including an
    /// empty one) is dropped: the chunk is kept for display but excluded from
    /// similarity queries.
    pub fn add_chunk(&self, chunk: &NewChunk) -> Result<i64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let (chunk_id, embedded) = self.insert_chunk_row(&tx, chunk.document_id, chunk)?;
        tx.commit().map_err(db_err)?;

        if embedded {
            self.append_to_matrix(chunk_id, &chunk.embedding)?;
        }
        Ok(chunk_id)
    }

    /// Write one chunk row and, when its dimension fits, its embedding.
    /// Returns the chunk ID and whether the embedding was stored.
    fn insert_chunk_row(
        &self,
        conn: &Connection,
        document_id: i64,
        chunk: &NewChunk,
    ) -> Result<(i64, bool)> {
        let embedding_ok = chunk.embedding.len() == self.embedding_dim;
        if !embedding_ok && !chunk.embedding.is_empty() {
            warn!(
                "Chunk {} of document {} has embedding dim {} (expected {}); excluded from search",
                chunk.chunk_index,
                document_id,
                chunk.embedding.len(),
                self.embedding_dim
            );
        }

        let id = conn
            .prepare_cached(
                "INSERT INTO chunks (document_id, file_name, text, chunk_index, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .map_err(db_err)?
            .insert(params![
                document_id,
                chunk.file_name,
                chunk.text,
                chunk.chunk_index,
                now_millis(),
            ])
            .map_err(db_err)?;
        if embedding_ok {
            conn.execute(
                "INSERT INTO chunk_embeddings (chunk_id, embedding, dim) VALUES (?1, ?2, ?3)",
                params![id, embedding_to_blob(&chunk.embedding), self.embedding_dim as i64],
            )
            .map_err(db_err)?;
        }
        Ok((id, embedding_ok))
    }

    /// Append a single embedding to the in-memory matrix without full reload.
    /// A dirty matrix is left alone: the next query reloads it from disk.
    /// Callers hold the connection lock so the append and the SQL write it
    /// mirrors cannot interleave with a reload.
    fn append_to_matrix(&self, chunk_id: i64, embedding: &[f32]) -> Result<()> {
        let mut mat = self.embedding_matrix.lock();
        if mat.dirty {
            return Ok(());
        }

        let row = normalize(Array1::from_vec(embedding.to_vec()));
        mat.matrix
            .push(Axis(0), row.view())
            .map_err(|e| Error::Internal(format!("Matrix append failed: {}", e)))?;
        mat.chunk_ids.push(chunk_id);
        Ok(())
    }

    /// Get all chunks for a document in chunk order.
    pub fn get_chunks_for_document(&self, doc_id: i64) -> Result<Vec<Chunk>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached("SELECT * FROM chunks WHERE document_id = ?1 ORDER BY chunk_index")
            .map_err(db_err)?;
        let rows = stmt.query_map(params![doc_id], Self::row_to_chunk).map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// Get a chunk by ID.
    pub fn get_chunk(&self, chunk_id: i64) -> Result<Option<Chunk>> {
        let conn = self.conn.lock();
        let result = conn.prepare_cached("SELECT * FROM chunks WHERE id = ?1")
            .map_err(db_err)?
            .query_row(params![chunk_id], Self::row_to_chunk)
            .optional()
            .map_err(db_err);
        result
    }

    /// Get the stored embedding for a chunk, if it has one.
    pub fn get_chunk_embedding(&self, chunk_id: i64) -> Result<Option<Vec<f32>>> {
        let conn = self.conn.lock();
        let blob: Option<Vec<u8>> = conn
            .prepare_cached("SELECT embedding FROM chunk_embeddings WHERE chunk_id = ?1")
            .map_err(db_err)?
            .query_row(params![chunk_id], |row| row.get(0))
            .optional()
            .map_err(db_err)?;
        Ok(blob.and_then(|b| blob_to_embedding(&b)))
    }

    /// Delete the chunks of a document, keeping the document row.
    pub fn delete_chunks_for_document(&self, doc_id: i64) -> Result<usize> {
        let conn = self.conn.lock();
        let count = conn
            .execute("DELETE FROM chunks WHERE document_id = ?1", params![doc_id])
            .map_err(db_err)?;
        if count > 0 {
            self.embedding_matrix.lock().dirty = true;
        }
        Ok(count)
    }

    /// Count chunks, optionally for one document.
    pub fn count_chunks(&self, doc_id: Option<i64>) -> Result<i64> {
        let conn = self.conn.lock();
        match doc_id {
            Some(id) => conn.query_row(
                "SELECT COUNT(*) FROM chunks WHERE document_id = ?1",
                params![id],
                |row| row.get(0),
            ),
            None => conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0)),
        }
        .map_err(db_err)
    }

    // ---------------------------------------------------------------
    // Vector Search
    // ---------------------------------------------------------------

    /// Load and normalize all chunk embeddings into a matrix for fast search.
    ///
    /// The connection lock is held until the matrix is swapped, so writers
    /// cannot append a row this snapshot already contains or is missing.
    fn load_embedding_matrix(&self) -> Result<()> {
        let conn = self.conn.lock();
        let mut chunk_ids = Vec::new();
        let mut embeddings: Vec<Vec<f32>> = Vec::new();

        {
            let mut stmt = conn
                .prepare(
                    "SELECT chunk_id, embedding FROM chunk_embeddings \
                     WHERE dim = ?1 ORDER BY chunk_id ASC",
                )
                .map_err(db_err)?;

            let rows = stmt
                .query_map(params![self.embedding_dim as i64], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
                })
                .map_err(db_err)?;

            for row in rows {
                let (cid, blob) = row.map_err(db_err)?;
                match blob_to_embedding(&blob) {
                    Some(emb) if emb.len() == self.embedding_dim => {
                        chunk_ids.push(cid);
                        embeddings.push(emb);
                    }
                    _ => warn!("Skipping corrupt embedding for chunk {}", cid),
                }
            }
        }

        let n = embeddings.len();
        let mut matrix = Array2::zeros((n, self.embedding_dim));
        for (i, emb) in embeddings.into_iter().enumerate() {
            matrix.row_mut(i).assign(&normalize(Array1::from_vec(emb)));
        }

        let mut mat = self.embedding_matrix.lock();
        mat.matrix = matrix;
        mat.chunk_ids = chunk_ids;
        mat.dirty = false;
        drop(mat);
        drop(conn);
        debug!("Loaded {} embeddings into matrix", n);
        Ok(())
    }

    fn ensure_matrix_loaded(&self) -> Result<()> {
        if self.embedding_matrix.lock().dirty {
            self.load_embedding_matrix()?;
        }
        Ok(())
    }

    /// Cosine similarity search using the pre-loaded normalized matrix.
    pub fn vector_search(&self, query_embedding: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        if query_embedding.len() != self.embedding_dim {
            warn!(
                "Query dim {} does not match index dim {}",
                query_embedding.len(),
                self.embedding_dim
            );
            return Ok(Vec::new());
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }
        self.ensure_matrix_loaded()?;

        let q = Array1::from_vec(query_embedding.to_vec());
        let q_norm = q.dot(&q).sqrt();
        if q_norm < 1e-9 {
            return Ok(Vec::new());
        }
        let q = q / q_norm;

        let top: Vec<(i64, f32)> = {
            let mat = self.embedding_matrix.lock();
            if mat.matrix.nrows() == 0 {
                return Ok(Vec::new());
            }

            // (N, dim) @ (dim,) -> (N,)
            let similarities = mat.matrix.dot(&q);

            let mut indexed: Vec<(usize, f32)> = similarities.iter().copied().enumerate().collect();
            // Stable sort: rows are in chunk id order, so ties keep insertion order.
            indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            indexed.truncate(top_k);
            indexed.into_iter().map(|(i, s)| (mat.chunk_ids[i], s)).collect()
        };

        let mut results = Vec::with_capacity(top.len());
        for (cid, score) in top {
            if let Some(chunk) = self.get_chunk(cid)? {
                results.push(ScoredChunk { score, chunk });
            }
        }
        Ok(results)
    }

    // ---------------------------------------------------------------
    // Chat history
    // ---------------------------------------------------------------

    /// Insert a chat message. Returns its ID.
    pub fn add_message(&self, msg: &NewChatMessage) -> Result<i64> {
        let ts = msg.timestamp.unwrap_or_else(now_millis);
        let conn = self.conn.lock();
        let result = conn.prepare_cached(
            "INSERT INTO chat_messages \
             (question, response, timestamp, is_user_message, context_used, detailed_context) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .map_err(db_err)?
        .insert(params![
            msg.question,
            msg.response,
            ts,
            msg.is_user_message,
            msg.context_used,
            msg.detailed_context,
        ])
        .map_err(db_err);
        result
    }

    /// Replace the response text of a message (streaming-update pattern).
    pub fn update_response(&self, message_id: i64, response: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let count = conn
            .execute(
                "UPDATE chat_messages SET response = ?1 WHERE id = ?2",
                params![response, message_id],
            )
            .map_err(db_err)?;
        Ok(count > 0)
    }

    /// Record the context a response was generated from.
    pub fn update_context(&self, message_id: i64, context_used: &str, detailed_context: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let count = conn
            .execute(
                "UPDATE chat_messages SET context_used = ?1, detailed_context = ?2 WHERE id = ?3",
                params![context_used, detailed_context, message_id],
            )
            .map_err(db_err)?;
        Ok(count > 0)
    }

    pub fn get_message(&self, message_id: i64) -> Result<Option<ChatMessage>> {
        let conn = self.conn.lock();
        let result = conn.prepare_cached("SELECT * FROM chat_messages WHERE id = ?1")
            .map_err(db_err)?
            .query_row(params![message_id], Self::row_to_message)
            .optional()
            .map_err(db_err);
        result
    }

    /// The most recent `limit` messages, returned oldest-first.
    pub fn recent_messages(&self, limit: usize) -> Result<Vec<ChatMessage>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT * FROM (SELECT * FROM chat_messages ORDER BY timestamp DESC, id DESC LIMIT ?1) \
                 ORDER BY timestamp ASC, id ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![limit as i64], Self::row_to_message)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// Messages whose question or response contains `needle` (case-insensitive), oldest-first.
    pub fn search_messages(&self, needle: &str) -> Result<Vec<ChatMessage>> {
        let escaped = needle
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let pattern = format!("%{}%", escaped);
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT * FROM chat_messages \
                 WHERE question LIKE ?1 ESCAPE '\\' OR response LIKE ?1 ESCAPE '\\' \
                 ORDER BY timestamp ASC, id ASC",
            )
            .map_err(db_err)?;
        let rows = stmt.query_map(params![pattern], Self::row_to_message).map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    pub fn delete_message(&self, message_id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let count = conn
            .execute("DELETE FROM chat_messages WHERE id = ?1", params![message_id])
            .map_err(db_err)?;
        Ok(count > 0)
    }

    /// Delete the whole chat history. Returns the number of rows removed.
    pub fn clear_history(&self) -> Result<usize> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM chat_messages", []).map_err(db_err)
    }

    // ---------------------------------------------------------------
    // Stats
    // ---------------------------------------------------------------

    /// Get store statistics.
    pub fn get_stats(&self) -> Result<StoreStats> {
        let total_documents = self.count_documents()?;
        let total_chunks = self.count_chunks(None)?;

        let conn = self.conn.lock();
        let embeddings_stored: i64 = conn
            .query_row("SELECT COUNT(*) FROM chunk_embeddings", [], |row| row.get(0))
            .map_err(db_err)?;
        let chat_messages: i64 = conn
            .query_row("SELECT COUNT(*) FROM chat_messages", [], |row| row.get(0))
            .map_err(db_err)?;
        drop(conn);

        self.ensure_matrix_loaded()?;
        let matrix_rows = self.embedding_matrix.lock().matrix.nrows();

        let db_size = std::fs::metadata(&self.db_path).map(|m| m.len()).unwrap_or(0);

        Ok(StoreStats {
            total_documents,
            total_chunks,
            embeddings_stored,
            embedding_dimension: self.embedding_dim,
            chat_messages,
            db_path: self.db_path.to_string_lossy().to_string(),
            db_size_mb: db_size as f64 / (1024.0 * 1024.0),
            matrix_rows,
        })
    }

    // ---------------------------------------------------------------
    // Row Mapping Helpers
    // ---------------------------------------------------------------

    fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
        Ok(Document {
            id: row.get("id")?,
            text: row.get("text")?,
            file_name: row.get("file_name")?,
            content_hash: row.get("content_hash")?,
            added_at: row.get("added_at")?,
        })
    }

    fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chunk> {
        Ok(Chunk {
            id: row.get("id")?,
            document_id: row.get("document_id")?,
            file_name: row.get("file_name")?,
            text: row.get("text")?,
            chunk_index: row.get("chunk_index")?,
        })
    }

    fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
        Ok(ChatMessage {
            id: row.get("id")?,
            question: row.get("question")?,
            response: row.get("response")?,
            timestamp: row.get("timestamp")?,
            is_user_message: row.get("is_user_message")?,
            context_used: row.get("context_used")?,
            detailed_context: row.get("detailed_context")?,
        })
    }
}

/// Scale a vector to unit length; zero vectors are returned unchanged.
fn normalize(v: Array1<f32>) -> Array1<f32> {
    let norm = v.dot(&v).sqrt();
    if norm > 1e-9 {
        v / norm
    } else {
        v
    }
}

impl VectorIndex for SqliteStore {
    fn insert(&self, chunk: NewChunk) -> Result<i64> {
        self.add_chunk(&chunk)
    }

    fn delete_by_document_id(&self, document_id: i64) -> Result<usize> {
        self.delete_chunks_for_document(document_id)
    }

    fn query_top_k(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        self.vector_search(query, k)
    }

    fn dimension(&self) -> usize {
        self.embedding_dim
    }
}
