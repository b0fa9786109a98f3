//! Remote LLM configuration persistence and credential lookup.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::Vendor;
use lumen_core::Result;

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_GROQ_MODEL: &str = "llama-3.3-70b-versatile";

/// Stored LLM configuration (persisted to llm-config.json).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "auto" or a vendor name.
    #[serde(default = "default_preferred")]
    pub preferred_vendor: String,
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default)]
    pub anthropic_api_key: Option<String>,
    #[serde(default)]
    pub groq_api_key: Option<String>,
    #[serde(default = "default_openai_model")]
    pub openai_model: String,
    #[serde(default = "default_anthropic_model")]
    pub anthropic_model: String,
    #[serde(default = "default_groq_model")]
    pub groq_model: String,
    /// Overrides the vendor's API base URL (self-hosted gateways, tests).
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(skip)]
    pub config_path: PathBuf,
}

fn default_preferred() -> String {
    "auto".into()
}
fn default_openai_model() -> String {
    DEFAULT_OPENAI_MODEL.into()
}
fn default_anthropic_model() -> String {
    DEFAULT_ANTHROPIC_MODEL.into()
}
fn default_groq_model() -> String {
    DEFAULT_GROQ_MODEL.into()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            preferred_vendor: default_preferred(),
            openai_api_key: None,
            anthropic_api_key: None,
            groq_api_key: None,
            openai_model: default_openai_model(),
            anthropic_model: default_anthropic_model(),
            groq_model: default_groq_model(),
            base_url: None,
            config_path: PathBuf::new(),
        }
    }
}

/// A fully resolved remote endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTarget {
    pub vendor: Vendor,
    pub model: String,
    pub api_key: String,
    pub base_url: String,
}

fn non_empty(key: &Option<String>) -> Option<&String> {
    key.as_ref().filter(|k| !k.trim().is_empty())
}

impl LlmConfig {
    /// Load config from file, falling back to env vars and defaults.
    pub fn load(config_path: &Path) -> Self {
        let mut config: LlmConfig = std::fs::read_to_string(config_path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        config.config_path = config_path.to_path_buf();

        if non_empty(&config.openai_api_key).is_none() {
            config.openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        }
        if non_empty(&config.anthropic_api_key).is_none() {
            config.anthropic_api_key = std::env::var("ANTHROPIC_API_KEY").ok();
        }
        if non_empty(&config.groq_api_key).is_none() {
            config.groq_api_key = std::env::var("GROQ_API_KEY").ok();
        }
        if config.base_url.is_none() {
            config.base_url = std::env::var("LUMEN_LLM_BASE_URL").ok();
        }
        config
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.config_path, serde_json::to_string_pretty(self)?)?;
        info!("Saved LLM config to {}", self.config_path.display());
        Ok(())
    }

    pub fn set_api_key(&mut self, vendor: Vendor, key: impl Into<String>) {
        let key = Some(key.into());
        match vendor {
            Vendor::OpenAI => self.openai_api_key = key,
            Vendor::Anthropic => self.anthropic_api_key = key,
            Vendor::Groq => self.groq_api_key = key,
        }
    }

    fn key_for(&self, vendor: Vendor) -> Option<&String> {
        match vendor {
            Vendor::OpenAI => non_empty(&self.openai_api_key),
            Vendor::Anthropic => non_empty(&self.anthropic_api_key),
            Vendor::Groq => non_empty(&self.groq_api_key),
        }
    }

    fn model_for(&self, vendor: Vendor) -> &str {
        match vendor {
            Vendor::OpenAI => &self.openai_model,
            Vendor::Anthropic => &self.anthropic_model,
            Vendor::Groq => &self.groq_model,
        }
    }

    /// Resolve the vendor to use. An explicit preference is honoured only if
    /// its key is set; "auto" picks Anthropic, then Groq, then OpenAI.
    pub fn resolve_target(&self) -> Option<RemoteTarget> {
        let candidates: Vec<Vendor> = match self.preferred_vendor.parse::<Vendor>() {
            Ok(v) => vec![v],
            Err(_) => vec![Vendor::Anthropic, Vendor::Groq, Vendor::OpenAI],
        };
        candidates.into_iter().find_map(|vendor| {
            self.key_for(vendor).map(|key| RemoteTarget {
                vendor,
                model: self.model_for(vendor).to_string(),
                api_key: key.clone(),
                base_url: self
                    .base_url
                    .clone()
                    .unwrap_or_else(|| vendor.default_base_url().to_string()),
            })
        })
    }

    /// The credential the remote provider would use, if any.
    pub fn get_api_key(&self) -> Option<String> {
        self.resolve_target().map(|t| t.api_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_auto_prefers_anthropic() {
        let mut config = LlmConfig::default();
        assert!(config.resolve_target().is_none());
        assert!(config.get_api_key().is_none());

        config.set_api_key(Vendor::OpenAI, "sk-openai");
        config.set_api_key(Vendor::Anthropic, "sk-ant");
        let target = config.resolve_target().unwrap();
        assert_eq!(target.vendor, Vendor::Anthropic);
        assert_eq!(target.model, DEFAULT_ANTHROPIC_MODEL);
        assert_eq!(target.base_url, "https://api.anthropic.com/v1");
    }

    #[test]
    fn test_explicit_preference_needs_its_key() {
        let mut config = LlmConfig {
            preferred_vendor: "groq".into(),
            ..Default::default()
        };
        config.set_api_key(Vendor::OpenAI, "sk-openai");
        assert!(config.resolve_target().is_none());

        config.set_api_key(Vendor::Groq, "gsk");
        assert_eq!(config.get_api_key().as_deref(), Some("gsk"));
    }

    #[test]
    fn test_blank_key_is_no_credential() {
        let mut config = LlmConfig::default();
        config.set_api_key(Vendor::OpenAI, "   ");
        assert!(config.get_api_key().is_none());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("llm-config.json");
        let mut config = LlmConfig {
            config_path: path.clone(),
            preferred_vendor: "openai".into(),
            base_url: Some("http://localhost:9999/v1".into()),
            ..Default::default()
        };
        config.set_api_key(Vendor::OpenAI, "sk-saved");
        config.save().unwrap();

        let loaded = LlmConfig::load(&path);
        let target = loaded.resolve_target().unwrap();
        assert_eq!(target.api_key, "sk-saved");
        assert_eq!(target.base_url, "http://localhost:9999/v1");
    }
}
