//! The streaming LLM provider interface.

use async_trait::async_trait;

use crate::stream::GenerationStream;
use crate::types::ProviderKind;
use lumen_core::Result;

/// A text generator with streaming output and cooperative cancellation.
///
/// Callers must let one stream close (finish or be cancelled) before calling
/// `generate_response` again on the same provider. Providers do not queue.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Identifier of the model in use, once known.
    fn model_id(&self) -> Option<String>;

    /// Prepare the provider. A no-op when already initialized.
    async fn init(&self) -> Result<()>;

    /// Start generating. Chunks arrive in production order; the stream ends
    /// on completion or cancellation, and carries an `Err` item on failure.
    async fn generate_response(&self, prompt: &str) -> Result<GenerationStream>;

    /// Stop the running generation. Safe from any task, and a no-op when idle.
    fn stop_generation(&self);

    fn is_generating(&self) -> bool;

    /// Release engine or client resources. Idempotent.
    async fn close(&self);
}
