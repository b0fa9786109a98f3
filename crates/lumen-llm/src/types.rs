//! Provider, vendor, and decoding types.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use lumen_core::Error;

/// Where generation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// On-device model file driven by an inference engine.
    Local,
    /// Cloud generation API.
    Remote,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Local => write!(f, "local"),
            ProviderKind::Remote => write!(f, "remote"),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            other => Err(Error::Config(format!("unknown provider kind '{}'", other))),
        }
    }
}

/// Remote API vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    OpenAI,
    Anthropic,
    Groq,
}

impl Vendor {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Vendor::OpenAI => "https://api.openai.com/v1",
            Vendor::Anthropic => "https://api.anthropic.com/v1",
            Vendor::Groq => "https://api.groq.com/openai/v1",
        }
    }

    /// Whether the vendor speaks the OpenAI chat-completions SSE format.
    pub fn is_openai_compatible(&self) -> bool {
        matches!(self, Vendor::OpenAI | Vendor::Groq)
    }
}

impl std::fmt::Display for Vendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Vendor::OpenAI => write!(f, "openai"),
            Vendor::Anthropic => write!(f, "anthropic"),
            Vendor::Groq => write!(f, "groq"),
        }
    }
}

impl FromStr for Vendor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "anthropic" => Ok(Self::Anthropic),
            "groq" => Ok(Self::Groq),
            other => Err(Error::Config(format!("unknown vendor '{}'", other))),
        }
    }
}

/// Fixed decoding parameters for remote generation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: usize,
}

impl Default for DecodingParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 1024,
        }
    }
}

/// System instruction describing the retrieval-QA role.
pub const SYSTEM_INSTRUCTION: &str = "You are a helpful assistant running on the user's own \
device. Answer questions using the context retrieved from the user's documents. If the \
context does not contain the answer, say so and answer from general knowledge only when \
you are confident. Be concise.";
