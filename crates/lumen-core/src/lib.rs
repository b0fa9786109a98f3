//! Lumen core: error type, configuration, settings, vector math.

pub mod config;
pub mod error;
pub mod vector;

pub use config::{DataPaths, LumenConfig, Settings, DEFAULT_EMBEDDING_DIM};
pub use error::{Error, Result};
pub use vector::cosine_similarity;
