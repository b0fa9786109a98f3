//! Configuration, data directory management, and runtime settings.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Embedding dimension of the bundled sentence-embedding model (all-MiniLM-L6-v2).
pub const DEFAULT_EMBEDDING_DIM: usize = 384;

/// Paths to all Lumen data directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPaths {
    /// Root data directory (e.g., `data/`).
    pub root: PathBuf,
    /// SQLite database directory (`data/vectordb/`).
    pub vectordb: PathBuf,
    /// Downloaded LLM model files (`data/models/`).
    pub models: PathBuf,
    /// Writable copy of the embedding model assets (`data/embedding-model/`).
    pub embedding_model: PathBuf,
    /// Bundled, read-only embedding model assets (`data/assets/`).
    pub bundled_assets: PathBuf,
    /// Remote LLM configuration (`data/llm-config.json`).
    pub llm_config_file: PathBuf,
    /// Optional settings overrides (`data/settings.json`).
    pub settings_file: PathBuf,
}

impl DataPaths {
    /// Create data paths from a root directory. Creates directories if needed.
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        let paths = Self {
            vectordb: root.join("vectordb"),
            models: root.join("models"),
            embedding_model: root.join("embedding-model"),
            bundled_assets: root.join("assets"),
            llm_config_file: root.join("llm-config.json"),
            settings_file: root.join("settings.json"),
            root,
        };
        paths.ensure_dirs()?;
        Ok(paths)
    }

    /// Create all writable directories. The bundled assets directory is not
    /// created: it is provided by the installation.
    fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.vectordb)?;
        std::fs::create_dir_all(&self.models)?;
        Ok(())
    }
}

/// Read-only knobs consumed by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Maximum tokens a provider may generate per answer.
    pub max_tokens: usize,
    /// Number of chunks retrieved per question.
    pub retrieval_top_k: usize,
    /// Number of previous chat turns included as extra context.
    pub recent_messages: usize,
    /// Chunk window size in characters.
    pub chunk_size: usize,
    /// Overlap between consecutive chunk windows in characters.
    pub chunk_overlap: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            retrieval_top_k: 3,
            recent_messages: 0,
            chunk_size: 500,
            chunk_overlap: 50,
        }
    }
}

impl Settings {
    /// Load settings from an optional JSON file, then apply environment overrides.
    pub fn load(settings_file: &Path) -> Self {
        let mut settings: Settings = match std::fs::read_to_string(settings_file) {
            Ok(s) => serde_json::from_str(&s).unwrap_or_else(|e| {
                warn!("Ignoring malformed {}: {}", settings_file.display(), e);
                Settings::default()
            }),
            Err(_) => Settings::default(),
        };
        settings.apply_env();
        settings
    }

    fn apply_env(&mut self) {
        if let Some(v) = env_usize("LUMEN_MAX_TOKENS") {
            self.max_tokens = v;
        }
        if let Some(v) = env_usize("LUMEN_TOP_K") {
            self.retrieval_top_k = v;
        }
        if let Some(v) = env_usize("LUMEN_RECENT_MESSAGES") {
            self.recent_messages = v;
        }
        if let Some(v) = env_usize("LUMEN_CHUNK_SIZE") {
            self.chunk_size = v;
        }
        if let Some(v) = env_usize("LUMEN_CHUNK_OVERLAP") {
            self.chunk_overlap = v;
        }
        debug!("Settings resolved: {:?}", self);
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Top-level Lumen configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LumenConfig {
    /// Data directory paths.
    pub data_paths: DataPaths,
    /// Embedding dimension (384 for all-MiniLM-L6-v2).
    pub embedding_dim: usize,
    /// Engine knobs.
    pub settings: Settings,
}

impl LumenConfig {
    /// Create configuration from environment and defaults.
    pub fn from_env(data_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let data_paths = DataPaths::new(data_dir)?;
        let settings = Settings::load(&data_paths.settings_file);

        Ok(Self {
            data_paths,
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            settings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_data_paths_created() {
        let dir = TempDir::new().unwrap();
        let paths = DataPaths::new(dir.path()).unwrap();
        assert!(paths.vectordb.is_dir());
        assert!(paths.models.is_dir());
        assert!(!paths.bundled_assets.exists());
    }

    #[test]
    fn test_settings_file_partial_override() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("settings.json");
        std::fs::write(&file, r#"{"max_tokens": 256, "retrieval_top_k": 7}"#).unwrap();
        // Only this test touches this variable.
        std::env::set_var("LUMEN_RECENT_MESSAGES", "9");

        let settings = Settings::load(&file);
        std::env::remove_var("LUMEN_RECENT_MESSAGES");
        assert_eq!(settings.max_tokens, 256);
        assert_eq!(settings.retrieval_top_k, 7);
        assert_eq!(settings.recent_messages, 9);
        assert_eq!(settings.chunk_size, Settings::default().chunk_size);

        let missing = Settings::load(&dir.path().join("absent.json"));
        assert_eq!(missing.max_tokens, Settings::default().max_tokens);
    }

    #[test]
    fn test_settings_malformed_file_falls_back() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("settings.json");
        std::fs::write(&file, "{not json").unwrap();

        let settings = Settings::load(&file);
        assert!(settings.chunk_size > settings.chunk_overlap);
    }
}
