//! Document readers keyed by document type.
//!
//! Plain text, Markdown and JSON are read in-process. PDF and DOCX need an
//! external extractor registered with [`DocumentReaders::with_external`];
//! without one they read as `None`.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

/// Supported document types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentType {
    Text,
    Markdown,
    Json,
    Pdf,
    Docx,
}

impl DocumentType {
    /// Detect document type from a file extension (without the dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "txt" | "text" | "log" | "csv" => Some(Self::Text),
            "md" | "mdx" | "markdown" => Some(Self::Markdown),
            "json" => Some(Self::Json),
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Whether the type is decoded as UTF-8 text without an external extractor.
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text | Self::Markdown | Self::Json)
    }
}

/// Text extractor for binary formats, supplied by the host.
pub trait ExternalReader: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> Option<String>;
}

/// Registry of readers by document type.
#[derive(Clone, Default)]
pub struct DocumentReaders {
    external: HashMap<DocumentType, Arc<dyn ExternalReader>>,
}

impl DocumentReaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_external(mut self, doc_type: DocumentType, reader: Arc<dyn ExternalReader>) -> Self {
        self.external.insert(doc_type, reader);
        self
    }

    /// Read a document's text. Any failure yields `None` and a log line.
    pub fn read_from_input_stream<R: Read>(&self, mut input: R, doc_type: DocumentType) -> Option<String> {
        let mut bytes = Vec::new();
        if let Err(e) = input.read_to_end(&mut bytes) {
            warn!("Failed to read {:?} document: {}", doc_type, e);
            return None;
        }

        let text = match doc_type {
            DocumentType::Text | DocumentType::Markdown => decode_utf8(bytes, doc_type)?,
            DocumentType::Json => extract_json(&decode_utf8(bytes, doc_type)?),
            DocumentType::Pdf | DocumentType::Docx => match self.external.get(&doc_type) {
                Some(reader) => reader.extract(&bytes)?,
                None => {
                    warn!("No reader registered for {:?} documents", doc_type);
                    return None;
                }
            },
        };

        if text.trim().is_empty() {
            debug!("{:?} document has no text", doc_type);
            return None;
        }
        Some(text)
    }
}

fn decode_utf8(bytes: Vec<u8>, doc_type: DocumentType) -> Option<String> {
    match String::from_utf8(bytes) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!("{:?} document is not valid UTF-8: {}", doc_type, e);
            None
        }
    }
}

/// Flatten JSON to indexable text. Chat exports (arrays of conversations with a
/// `mapping` of messages) become `[role]: text` lines; anything else is indexed as-is.
fn extract_json(content: &str) -> String {
    let Ok(conversations) = serde_json::from_str::<Vec<serde_json::Value>>(content) else {
        return content.to_string();
    };

    let mut texts = Vec::new();
    for conv in &conversations {
        if let Some(title) = conv.get("title").and_then(|v| v.as_str()) {
            texts.push(format!("# {}", title));
        }
        let Some(mapping) = conv.get("mapping").and_then(|v| v.as_object()) else {
            continue;
        };
        for node in mapping.values() {
            let Some(message) = node.get("message") else {
                continue;
            };
            let role = message
                .get("author")
                .and_then(|a| a.get("role"))
                .and_then(|r| r.as_str())
                .unwrap_or("unknown");
            let parts = message
                .get("content")
                .and_then(|c| c.get("parts"))
                .and_then(|p| p.as_array());
            for text in parts.into_iter().flatten().filter_map(|p| p.as_str()) {
                if !text.is_empty() {
                    texts.push(format!("[{}]: {}", role, text));
                }
            }
        }
    }

    if texts.is_empty() {
        content.to_string()
    } else {
        texts.join("\n\n")
    }
}
