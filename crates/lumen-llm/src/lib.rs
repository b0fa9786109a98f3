//! LLM generation for Lumen: local and remote providers behind one streaming
//! interface, the model catalog, and the lifecycle manager that owns the
//! active provider.

pub mod config;
pub mod engine;
pub mod factory;
pub mod local;
pub mod manager;
pub mod models;
pub mod provider;
pub mod remote;
pub mod stream;
pub mod types;

pub use config::{LlmConfig, RemoteTarget};
pub use engine::{EngineLoader, InferenceEngine, LlamaCliLoader};
pub use factory::{select_provider_kind, LlmFactory};
pub use local::{LocalProvider, LocalState};
pub use manager::{LifecycleOutcome, ModelLifecycleManager};
pub use models::{downloaded_models, find_model, ModelDownloadState, ModelInfo, MODEL_CATALOG};
pub use provider::LlmProvider;
pub use remote::RemoteProvider;
pub use stream::{generation_channel, Generation, GenerationSlot, GenerationStream, TokenSink};
pub use types::*;
