//! Lumen Ingest: document readers, text chunking, and the ingestion pipeline.

pub mod chunking;
pub mod ingest;
pub mod reader;

pub use chunking::create_chunks;
pub use ingest::{content_hash, Ingester};
pub use reader::{DocumentReaders, DocumentType, ExternalReader};
