//! On-device inference engines.
//!
//! Engines are blocking and callback based: `generate` calls `on_token` for
//! each piece of text and stops as soon as it returns `false`. The local
//! provider runs them on the blocking pool.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use tracing::{debug, info};

use lumen_core::{Error, Result};

/// A loaded model that can generate text.
pub trait InferenceEngine: Send {
    fn generate(
        &mut self,
        prompt: &str,
        max_tokens: usize,
        on_token: &mut dyn FnMut(&str) -> bool,
    ) -> Result<()>;

    /// Release native resources. Called once, before the engine is dropped.
    fn close(&mut self) {}
}

/// Builds an engine for a model file.
pub trait EngineLoader: Send + Sync {
    fn load(&self, model_path: &Path) -> Result<Box<dyn InferenceEngine>>;
}

/// Runs GGUF models through the llama.cpp `llama-cli` binary, one process per
/// generation, streaming its stdout.
pub struct LlamaCliLoader {
    binary: PathBuf,
    context_size: usize,
}

impl LlamaCliLoader {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            context_size: 4096,
        }
    }

    /// Binary from `LUMEN_LLAMA_CLI`, else `llama-cli` on `PATH`.
    pub fn from_env() -> Self {
        Self::new(std::env::var("LUMEN_LLAMA_CLI").unwrap_or_else(|_| "llama-cli".into()))
    }
}

impl EngineLoader for LlamaCliLoader {
    fn load(&self, model_path: &Path) -> Result<Box<dyn InferenceEngine>> {
        if !model_path.is_file() {
            return Err(Error::ModelFileMissing(model_path.to_path_buf()));
        }
        info!("llama-cli engine ready for {}", model_path.display());
        Ok(Box::new(LlamaCliEngine {
            binary: self.binary.clone(),
            model_path: model_path.to_path_buf(),
            context_size: self.context_size,
            child: None,
        }))
    }
}

struct LlamaCliEngine {
    binary: PathBuf,
    model_path: PathBuf,
    context_size: usize,
    child: Option<Child>,
}

impl LlamaCliEngine {
    fn kill_child(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl InferenceEngine for LlamaCliEngine {
    fn generate(
        &mut self,
        prompt: &str,
        max_tokens: usize,
        on_token: &mut dyn FnMut(&str) -> bool,
    ) -> Result<()> {
        // Reap anything a previous failed generation left running.
        self.kill_child();
        let mut child = Command::new(&self.binary)
            .arg("-m")
            .arg(&self.model_path)
            .arg("-c")
            .arg(self.context_size.to_string())
            .arg("-n")
            .arg(max_tokens.to_string())
            .arg("--no-display-prompt")
            .arg("--simple-io")
            .arg("-no-cnv")
            .arg("-p")
            .arg(prompt)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Inference(format!("failed to spawn {}: {}", self.binary.display(), e)))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Inference("llama-cli stdout unavailable".into()))?;
        self.child = Some(child);

        let mut buf = [0u8; 512];
        let mut pending: Vec<u8> = Vec::new();
        loop {
            let n = match stdout.read(&mut buf) {
                Ok(n) => n,
                Err(e) => {
                    self.kill_child();
                    return Err(e.into());
                }
            };
            if n == 0 {
                break;
            }
            pending.extend_from_slice(&buf[..n]);
            // Emit only complete UTF-8; keep a split code point for the next read.
            let valid = match std::str::from_utf8(&pending) {
                Ok(s) => s.len(),
                Err(e) => e.valid_up_to(),
            };
            if valid == 0 {
                continue;
            }
            let text = String::from_utf8_lossy(&pending[..valid]).into_owned();
            pending.drain(..valid);
            if !on_token(&text) {
                debug!("Generation stopped by caller; killing llama-cli");
                self.kill_child();
                return Ok(());
            }
        }

        if let Some(mut child) = self.child.take() {
            let status = match child.wait() {
                Ok(status) => status,
                Err(e) => {
                    let _ = child.kill();
                    return Err(e.into());
                }
            };
            if !status.success() {
                return Err(Error::Inference(format!("llama-cli exited with {}", status)));
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        self.kill_child();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_loader_requires_model_file() {
        let dir = TempDir::new().unwrap();
        let loader = LlamaCliLoader::new("llama-cli");
        let missing = dir.path().join("model.gguf");
        assert!(matches!(loader.load(&missing), Err(Error::ModelFileMissing(_))));

        std::fs::write(&missing, b"gguf").unwrap();
        assert!(loader.load(&missing).is_ok());
    }

    #[test]
    fn test_missing_binary_is_inference_error() {
        let dir = TempDir::new().unwrap();
        let model = dir.path().join("model.gguf");
        std::fs::write(&model, b"gguf").unwrap();
        let mut engine = LlamaCliLoader::new(dir.path().join("no-such-binary"))
            .load(&model)
            .unwrap();
        let result = engine.generate("hi", 8, &mut |_| true);
        assert!(matches!(result, Err(Error::Inference(_))));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_leftover_child_is_reaped_before_next_generation() {
        let dir = TempDir::new().unwrap();
        let leftover = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = leftover.id();
        let mut engine = LlamaCliEngine {
            binary: dir.path().join("no-such-binary"),
            model_path: dir.path().join("model.gguf"),
            context_size: 512,
            child: Some(leftover),
        };

        assert!(engine.generate("hi", 8, &mut |_| true).is_err());
        assert!(engine.child.is_none());
        assert!(!Path::new(&format!("/proc/{}", pid)).exists());
    }
}
