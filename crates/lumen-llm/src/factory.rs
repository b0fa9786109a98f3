//! Provider construction and the availability policy.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::config::LlmConfig;
use crate::engine::EngineLoader;
use crate::local::LocalProvider;
use crate::models::downloaded_models;
use crate::provider::LlmProvider;
use crate::remote::RemoteProvider;
use crate::types::{DecodingParams, ProviderKind};
use lumen_core::{Error, Result};

/// Pick a provider kind: local when a model is downloaded, else remote when
/// a credential exists.
pub fn select_provider_kind(has_local_model: bool, has_credential: bool) -> Result<ProviderKind> {
    match (has_local_model, has_credential) {
        (true, _) => Ok(ProviderKind::Local),
        (false, true) => Ok(ProviderKind::Remote),
        (false, false) => Err(Error::NoProviderAvailable),
    }
}

pub struct LlmFactory {
    models_dir: PathBuf,
    llm_config: LlmConfig,
    loader: Arc<dyn EngineLoader>,
    params: DecodingParams,
}

impl LlmFactory {
    pub fn new(
        models_dir: impl Into<PathBuf>,
        llm_config: LlmConfig,
        loader: Arc<dyn EngineLoader>,
        max_tokens: usize,
    ) -> Self {
        Self {
            models_dir: models_dir.into(),
            llm_config,
            loader,
            params: DecodingParams {
                max_tokens,
                ..Default::default()
            },
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn has_local_model(&self) -> bool {
        !downloaded_models(&self.models_dir).is_empty()
    }

    pub fn has_credential(&self) -> bool {
        self.llm_config.get_api_key().is_some()
    }

    pub fn preferred_kind(&self) -> Result<ProviderKind> {
        select_provider_kind(self.has_local_model(), self.has_credential())
    }

    /// Build an uninitialized provider. Preconditions are checked here so
    /// callers can prompt for a model download or an API key.
    pub fn create(&self, kind: ProviderKind, model_id: Option<&str>) -> Result<Arc<dyn LlmProvider>> {
        let provider: Arc<dyn LlmProvider> = match kind {
            ProviderKind::Local => {
                if !self.has_local_model() {
                    return Err(Error::ModelNotAvailable);
                }
                Arc::new(LocalProvider::new(
                    Arc::clone(&self.loader),
                    self.models_dir.clone(),
                    model_id.map(str::to_string),
                    self.params.max_tokens,
                ))
            }
            ProviderKind::Remote => {
                let mut target = self.llm_config.resolve_target().ok_or(Error::NoCredential)?;
                if let Some(model) = model_id {
                    target.model = model.to_string();
                }
                Arc::new(RemoteProvider::new(target, self.params))
            }
        };
        info!("Created {} provider", kind);
        Ok(provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::InferenceEngine;
    use crate::models::MODEL_CATALOG;
    use crate::types::Vendor;
    use tempfile::TempDir;

    struct NeverLoader;

    impl EngineLoader for NeverLoader {
        fn load(&self, _model_path: &Path) -> Result<Box<dyn InferenceEngine>> {
            Err(Error::Inference("not in tests".into()))
        }
    }

    fn factory(dir: &TempDir, config: LlmConfig) -> LlmFactory {
        LlmFactory::new(dir.path(), config, Arc::new(NeverLoader), 256)
    }

    #[test]
    fn test_selection_policy() {
        assert_eq!(select_provider_kind(true, true).unwrap(), ProviderKind::Local);
        assert_eq!(select_provider_kind(true, false).unwrap(), ProviderKind::Local);
        assert_eq!(select_provider_kind(false, true).unwrap(), ProviderKind::Remote);
        assert!(matches!(
            select_provider_kind(false, false),
            Err(Error::NoProviderAvailable)
        ));
    }

    #[test]
    fn test_create_checks_preconditions() {
        let dir = TempDir::new().unwrap();
        let f = factory(&dir, LlmConfig::default());
        assert!(matches!(
            f.create(ProviderKind::Local, None),
            Err(Error::ModelNotAvailable)
        ));
        assert!(matches!(
            f.create(ProviderKind::Remote, None),
            Err(Error::NoCredential)
        ));
        assert!(matches!(f.preferred_kind(), Err(Error::NoProviderAvailable)));
    }

    #[test]
    fn test_create_available_providers() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(MODEL_CATALOG[0].filename), b"gguf").unwrap();
        let mut config = LlmConfig::default();
        config.set_api_key(Vendor::Groq, "gsk-test");
        let f = factory(&dir, config);

        assert_eq!(f.preferred_kind().unwrap(), ProviderKind::Local);
        assert_eq!(f.create(ProviderKind::Local, None).unwrap().kind(), ProviderKind::Local);

        let remote = f.create(ProviderKind::Remote, Some("llama-3.1-8b-instant")).unwrap();
        assert_eq!(remote.kind(), ProviderKind::Remote);
        assert_eq!(remote.model_id().as_deref(), Some("llama-3.1-8b-instant"));
    }
}
