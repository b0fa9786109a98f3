//! Owner of the single active LLM provider.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Notify, RwLock};
use tracing::{debug, info};

use crate::factory::LlmFactory;
use crate::provider::LlmProvider;
use crate::stream::GenerationStream;
use crate::types::ProviderKind;
use lumen_core::{Error, Result};

/// Result of an [`ModelLifecycleManager::initialize`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleOutcome {
    /// A new provider is active.
    Ready { kind: ProviderKind, model_id: Option<String> },
    /// The requested provider was already active.
    Unchanged,
    /// Another initialize or switch was in flight; this call was dropped.
    Busy,
}

struct ActiveProvider {
    kind: ProviderKind,
    provider: Arc<dyn LlmProvider>,
}

/// Clears the busy flag when an initialize call ends, however it ends, and
/// wakes callers waiting for it to settle.
struct BusyGuard<'a>(&'a ModelLifecycleManager);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.busy.store(false, Ordering::Release);
        self.0.settled.notify_waiters();
    }
}

/// Serializes initialize, switch and close of the active provider.
///
/// Only one provider is live at a time. Reentrant initialize calls while one
/// is running return [`LifecycleOutcome::Busy`] instead of queueing.
pub struct ModelLifecycleManager {
    factory: LlmFactory,
    active: RwLock<Option<ActiveProvider>>,
    busy: AtomicBool,
    settled: Notify,
}

impl ModelLifecycleManager {
    pub fn new(factory: LlmFactory) -> Self {
        Self {
            factory,
            active: RwLock::new(None),
            busy: AtomicBool::new(false),
            settled: Notify::new(),
        }
    }

    pub fn factory(&self) -> &LlmFactory {
        &self.factory
    }

    /// Activate a provider. `kind` defaults to the availability policy and
    /// `model_id` to the provider's own default.
    pub async fn initialize(
        &self,
        kind: Option<ProviderKind>,
        model_id: Option<&str>,
    ) -> Result<LifecycleOutcome> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Lifecycle change already in flight; dropping request");
            return Ok(LifecycleOutcome::Busy);
        }
        let _busy = BusyGuard(self);

        let kind = match kind {
            Some(k) => k,
            None => self.factory.preferred_kind()?,
        };

        let mut active = self.active.write().await;
        if let Some(current) = active.as_ref() {
            let same_model = match model_id {
                None => true,
                Some(id) => current.provider.model_id().as_deref() == Some(id),
            };
            if current.kind == kind && same_model {
                return Ok(LifecycleOutcome::Unchanged);
            }
        }

        if let Some(old) = active.take() {
            old.provider.stop_generation();
            old.provider.close().await;
            info!("Closed {} provider", old.kind);
        }

        let provider = self.factory.create(kind, model_id)?;
        provider.init().await?;
        let model_id = provider.model_id();
        info!(
            "Active provider: {} ({})",
            kind,
            model_id.as_deref().unwrap_or("default")
        );
        *active = Some(ActiveProvider { kind, provider });
        Ok(LifecycleOutcome::Ready { kind, model_id })
    }

    /// Make sure some provider is active, activating the preferred one when
    /// none is. An initialize already in flight is waited out rather than
    /// reported as a missing provider.
    pub async fn ensure_active(&self) -> Result<()> {
        loop {
            if self.active.read().await.is_some() {
                return Ok(());
            }
            let settled = self.settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();
            match self.initialize(None, None).await? {
                LifecycleOutcome::Busy => {
                    debug!("Waiting for in-flight provider initialization");
                    settled.await;
                }
                LifecycleOutcome::Ready { .. } | LifecycleOutcome::Unchanged => return Ok(()),
            }
        }
    }

    /// Kind and model of the active provider.
    pub async fn current(&self) -> Option<(ProviderKind, Option<String>)> {
        self.active
            .read()
            .await
            .as_ref()
            .map(|a| (a.kind, a.provider.model_id()))
    }

    pub async fn is_generating(&self) -> bool {
        match self.active.read().await.as_ref() {
            Some(a) => a.provider.is_generating(),
            None => false,
        }
    }

    /// Generate with the active provider.
    pub async fn generate(&self, prompt: &str) -> Result<GenerationStream> {
        let provider = self
            .active
            .read()
            .await
            .as_ref()
            .map(|a| Arc::clone(&a.provider))
            .ok_or(Error::NoProviderAvailable)?;
        provider.generate_response(prompt).await
    }

    /// Stop the active generation. Never waits on a lifecycle change.
    pub fn stop_generation(&self) {
        if let Ok(active) = self.active.try_read() {
            if let Some(a) = active.as_ref() {
                a.provider.stop_generation();
            }
        }
    }

    /// Tear down the active provider. Safe to call repeatedly.
    pub async fn close(&self) {
        if let Some(old) = self.active.write().await.take() {
            old.provider.stop_generation();
            old.provider.close().await;
            info!("Closed {} provider", old.kind);
        }
    }
}
