//! Data types for documents, chunks, chat history, and search results.

use serde::{Deserialize, Serialize};

/// An ingested document. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub text: String,
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub added_at: i64,
}

/// A chunk row from the database. The embedding lives in its own table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub id: i64,
    pub document_id: i64,
    pub file_name: String,
    pub text: String,
    pub chunk_index: i32,
}

/// A chunk to be inserted, with its embedding.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub document_id: i64,
    pub file_name: String,
    pub text: String,
    pub chunk_index: i32,
    pub embedding: Vec<f32>,
}

/// A chunk returned from a similarity query, best-first.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    /// Cosine similarity to the query vector.
    pub score: f32,
    pub chunk: Chunk,
}

/// Options for adding a document.
#[derive(Debug, Clone, Default)]
pub struct AddDocumentOptions {
    pub content_hash: Option<String>,
    pub added_at: Option<i64>,
}

/// A persisted chat turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub id: i64,
    pub question: String,
    pub response: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub is_user_message: bool,
    /// Context string that was sent to the model.
    pub context_used: String,
    /// Serialized per-source context, for attribution in the UI.
    pub detailed_context: String,
}

/// A chat turn to be inserted.
#[derive(Debug, Clone, Default)]
pub struct NewChatMessage {
    pub question: String,
    pub response: String,
    pub is_user_message: bool,
    pub context_used: String,
    pub detailed_context: String,
    pub timestamp: Option<i64>,
}

impl NewChatMessage {
    /// A user turn: the question with an empty response.
    pub fn user(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            is_user_message: true,
            ..Default::default()
        }
    }

    /// An assistant turn, possibly a placeholder with an empty response.
    pub fn assistant(question: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            response: response.into(),
            is_user_message: false,
            ..Default::default()
        }
    }
}

/// Store-level statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_documents: i64,
    pub total_chunks: i64,
    pub embeddings_stored: i64,
    pub embedding_dimension: usize,
    pub chat_messages: i64,
    pub db_path: String,
    pub db_size_mb: f64,
    pub matrix_rows: usize,
}
