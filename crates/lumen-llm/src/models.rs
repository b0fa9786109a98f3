//! Local model catalog, discovery of downloaded models, and download progress.
//!
//! Downloading itself is done elsewhere; this module only knows what can be
//! downloaded and what is already on disk.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A static catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub filename: &'static str,
    pub url: &'static str,
    pub size_bytes: u64,
    /// Whether the download needs a signed-in account (gated repository).
    pub requires_auth: bool,
}

impl ModelInfo {
    pub fn path_in(&self, models_dir: &Path) -> PathBuf {
        models_dir.join(self.filename)
    }
}

/// Catalog order is display order and the order `first downloaded` resolves in.
pub static MODEL_CATALOG: &[ModelInfo] = &[
    ModelInfo {
        id: "qwen2.5-0.5b-instruct",
        name: "Qwen2.5 0.5B Instruct (Q4_K_M)",
        filename: "qwen2.5-0.5b-instruct-q4_k_m.gguf",
        url: "https://huggingface.co/Qwen/Qwen2.5-0.5B-Instruct-GGUF/resolve/main/qwen2.5-0.5b-instruct-q4_k_m.gguf",
        size_bytes: 491_400_032,
        requires_auth: false,
    },
    ModelInfo {
        id: "llama-3.2-1b-instruct",
        name: "Llama 3.2 1B Instruct (Q4_K_M)",
        filename: "Llama-3.2-1B-Instruct-Q4_K_M.gguf",
        url: "https://huggingface.co/bartowski/Llama-3.2-1B-Instruct-GGUF/resolve/main/Llama-3.2-1B-Instruct-Q4_K_M.gguf",
        size_bytes: 807_694_464,
        requires_auth: false,
    },
    ModelInfo {
        id: "gemma-3-1b-it",
        name: "Gemma 3 1B IT (Q4_0)",
        filename: "gemma-3-1b-it-q4_0.gguf",
        url: "https://huggingface.co/google/gemma-3-1b-it-qat-q4_0-gguf/resolve/main/gemma-3-1b-it-q4_0.gguf",
        size_bytes: 1_005_000_000,
        requires_auth: true,
    },
    ModelInfo {
        id: "phi-3.5-mini-instruct",
        name: "Phi 3.5 Mini Instruct (Q4_K_M)",
        filename: "Phi-3.5-mini-instruct-Q4_K_M.gguf",
        url: "https://huggingface.co/bartowski/Phi-3.5-mini-instruct-GGUF/resolve/main/Phi-3.5-mini-instruct-Q4_K_M.gguf",
        size_bytes: 2_393_232_672,
        requires_auth: false,
    },
];

pub fn find_model(id: &str) -> Option<&'static ModelInfo> {
    MODEL_CATALOG.iter().find(|m| m.id == id)
}

/// Catalog entries whose file is present and non-empty in `models_dir`.
pub fn downloaded_models(models_dir: &Path) -> Vec<&'static ModelInfo> {
    MODEL_CATALOG
        .iter()
        .filter(|m| {
            std::fs::metadata(m.path_in(models_dir))
                .map(|md| md.is_file() && md.len() > 0)
                .unwrap_or(false)
        })
        .collect()
}

/// Progress of a model download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDownloadState {
    pub model_id: String,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    pub paused: bool,
    pub pause_reason: Option<String>,
}

impl ModelDownloadState {
    pub fn new(model: &ModelInfo) -> Self {
        Self {
            model_id: model.id.to_string(),
            downloaded_bytes: 0,
            total_bytes: model.size_bytes,
            paused: false,
            pause_reason: None,
        }
    }

    /// Fraction downloaded in `0.0..=1.0`. Unknown totals report 0.
    pub fn progress(&self) -> f32 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.downloaded_bytes as f64 / self.total_bytes as f64).min(1.0) as f32
    }

    pub fn is_complete(&self) -> bool {
        self.total_bytes > 0 && self.downloaded_bytes >= self.total_bytes
    }

    pub fn pause(&mut self, reason: impl Into<String>) {
        self.paused = true;
        self.pause_reason = Some(reason.into());
    }

    pub fn resume(&mut self) {
        self.paused = false;
        self.pause_reason = None;
    }
}
