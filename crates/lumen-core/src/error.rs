//! Error types for Lumen.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate content: hash={0}")]
    DuplicateContent(String),

    #[error("Ingest error: {0}")]
    Ingest(String),

    #[error("Inference error: {0}")]
    Inference(String),

    /// No downloaded local model could be resolved.
    #[error("No local model available")]
    ModelNotAvailable,

    /// The catalog knows the model but its file is not on disk.
    #[error("Model file missing: {}", .0.display())]
    ModelFileMissing(PathBuf),

    /// The remote provider has no API key configured.
    #[error("No credential configured")]
    NoCredential,

    /// Neither a local model nor a remote credential is available.
    #[error("No provider available: download a model or add an API key")]
    NoProviderAvailable,

    /// A generation stream terminated abnormally.
    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the user can resolve this by downloading a model or adding a key.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::ModelNotAvailable
                | Self::ModelFileMissing(_)
                | Self::NoCredential
                | Self::NoProviderAvailable
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
