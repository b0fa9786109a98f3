//! Lumen Store: SQLite documents, chunks, chat history, and exact cosine vector search.

pub mod embedding;
pub mod index;
pub mod schema;
pub mod sqlite;
pub mod types;

pub use index::VectorIndex;
pub use sqlite::SqliteStore;
pub use types::*;
