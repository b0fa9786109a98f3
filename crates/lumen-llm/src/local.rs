//! On-device generation through a loaded model file.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::engine::{EngineLoader, InferenceEngine};
use crate::models::{downloaded_models, find_model};
use crate::provider::LlmProvider;
use crate::stream::{generation_channel, GenerationSlot, GenerationStream};
use crate::types::ProviderKind;
use lumen_core::{Error, Result};

type SharedEngine = Arc<Mutex<Option<Box<dyn InferenceEngine>>>>;

/// Observable provider state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalState {
    Unloaded,
    Loading,
    Ready,
    Generating,
    Closed,
}

/// Runs a catalog model through an [`InferenceEngine`].
///
/// At most one engine is live: switching models closes the current engine
/// before the next one is loaded. The engine handle is reused across
/// generations and each generation gets fresh cancellation state.
pub struct LocalProvider {
    loader: Arc<dyn EngineLoader>,
    models_dir: PathBuf,
    requested_model: Option<String>,
    max_tokens: usize,
    engine: SharedEngine,
    loaded_model: Mutex<Option<String>>,
    loading: AtomicBool,
    closed: AtomicBool,
    generation: GenerationSlot,
    switch_lock: tokio::sync::Mutex<()>,
}

impl LocalProvider {
    pub fn new(
        loader: Arc<dyn EngineLoader>,
        models_dir: impl Into<PathBuf>,
        requested_model: Option<String>,
        max_tokens: usize,
    ) -> Self {
        Self {
            loader,
            models_dir: models_dir.into(),
            requested_model,
            max_tokens,
            engine: Arc::new(Mutex::new(None)),
            loaded_model: Mutex::new(None),
            loading: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            generation: GenerationSlot::default(),
            switch_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn state(&self) -> LocalState {
        if self.closed.load(Ordering::Acquire) {
            LocalState::Closed
        } else if self.loading.load(Ordering::Acquire) {
            LocalState::Loading
        } else if self.generation.is_generating() {
            LocalState::Generating
        } else if self.loaded_model.lock().is_some() {
            LocalState::Ready
        } else {
            LocalState::Unloaded
        }
    }

    /// Make `model_id` the active model.
    ///
    /// Returns `false` without side effects when it is already loaded. Any
    /// running generation is stopped and the current engine closed first.
    pub async fn load_model(&self, model_id: &str) -> Result<bool> {
        let _switch = self.switch_lock.lock().await;
        if self.loaded_model.lock().as_deref() == Some(model_id) {
            debug!("Model {} already loaded", model_id);
            return Ok(false);
        }

        let info = find_model(model_id)
            .ok_or_else(|| Error::NotFound(format!("model '{}'", model_id)))?;
        let path = info.path_in(&self.models_dir);
        if !path.is_file() {
            return Err(Error::ModelFileMissing(path));
        }

        self.loading.store(true, Ordering::Release);
        self.closed.store(false, Ordering::Release);
        self.generation.cancel();

        let engine = Arc::clone(&self.engine);
        let loader = Arc::clone(&self.loader);
        let result = tokio::task::spawn_blocking(move || {
            // Waits for an in-flight generation to release the engine.
            let mut slot = engine.lock();
            if let Some(mut old) = slot.take() {
                old.close();
            }
            loader.load(&path).map(|new_engine| *slot = Some(new_engine))
        })
        .await
        .map_err(|e| Error::Internal(format!("model load task failed: {}", e)));
        self.loading.store(false, Ordering::Release);

        match result.and_then(|r| r) {
            Ok(()) => {
                *self.loaded_model.lock() = Some(model_id.to_string());
                info!("Loaded local model {}", model_id);
                Ok(true)
            }
            Err(e) => {
                *self.loaded_model.lock() = None;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl LlmProvider for LocalProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    fn model_id(&self) -> Option<String> {
        self.loaded_model.lock().clone()
    }

    async fn init(&self) -> Result<()> {
        if self.loaded_model.lock().is_some() {
            return Ok(());
        }
        let model_id = match &self.requested_model {
            Some(id) => id.clone(),
            None => downloaded_models(&self.models_dir)
                .first()
                .map(|m| m.id.to_string())
                .ok_or(Error::ModelNotAvailable)?,
        };
        self.load_model(&model_id).await.map(|_| ())
    }

    async fn generate_response(&self, prompt: &str) -> Result<GenerationStream> {
        let label = match self.model_id() {
            Some(id) => format!("local:{}", id),
            None => return Err(Error::ModelNotAvailable),
        };
        let (mut sink, stream) = generation_channel(self.generation.begin(), label);

        let engine = Arc::clone(&self.engine);
        let prompt = prompt.to_string();
        let max_tokens = self.max_tokens;
        tokio::task::spawn_blocking(move || {
            let mut slot = engine.lock();
            let Some(engine) = slot.as_mut() else {
                sink.blocking_fail(Error::ModelNotAvailable);
                return;
            };
            let result = engine.generate(&prompt, max_tokens, &mut |piece| {
                sink.blocking_send(piece.to_string())
            });
            if let Err(e) = result {
                sink.blocking_fail(e);
            }
        });
        Ok(stream)
    }

    fn stop_generation(&self) {
        self.generation.cancel();
    }

    fn is_generating(&self) -> bool {
        self.generation.is_generating()
    }

    async fn close(&self) {
        let _switch = self.switch_lock.lock().await;
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.generation.cancel();
        let engine = Arc::clone(&self.engine);
        let _ = tokio::task::spawn_blocking(move || {
            if let Some(mut old) = engine.lock().take() {
                old.close();
            }
        })
        .await;
        if let Some(id) = self.loaded_model.lock().take() {
            info!("Closed local model {}", id);
        }
    }
}
