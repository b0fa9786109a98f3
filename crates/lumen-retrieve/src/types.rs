//! Retrieval result types.

use serde::{Deserialize, Serialize};

/// One retrieved chunk, for source attribution. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedContext {
    pub source_file_name: String,
    pub text: String,
    /// Cosine similarity to the query.
    pub score: f32,
}

/// Output of a retrieval: the joined context string plus its parts, best-first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Retrieval {
    pub context_text: String,
    pub contexts: Vec<RetrievedContext>,
}

impl Retrieval {
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// JSON form of `contexts`, as stored in a chat message's `detailed_context`.
    pub fn detailed_context_json(&self) -> String {
        serde_json::to_string(&self.contexts).unwrap_or_default()
    }
}
