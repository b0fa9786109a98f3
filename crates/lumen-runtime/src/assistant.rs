//! Assistant: action-vs-chat routing over the engine components.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::prompt::build_prompt;
use crate::types::{Answer, AnswerStream};
use lumen_actions::{default_catalog, ActionMatcher};
use lumen_core::{LumenConfig, Result, Settings};
use lumen_infer::EmbeddingEncoder;
use lumen_ingest::Ingester;
use lumen_llm::{EngineLoader, LlmConfig, LlmFactory, ModelLifecycleManager};
use lumen_retrieve::RetrievalEngine;
use lumen_store::{ChatMessage, Document, NewChatMessage, SqliteStore, StoreStats, VectorIndex};

/// Owns the store, encoder, action matcher, retrieval engine and model
/// lifecycle manager for one session.
pub struct Assistant {
    store: Arc<SqliteStore>,
    encoder: Arc<EmbeddingEncoder>,
    matcher: Arc<ActionMatcher>,
    retrieval: RetrievalEngine,
    llm: Arc<ModelLifecycleManager>,
    settings: Settings,
}

impl Assistant {
    pub fn new(
        store: Arc<SqliteStore>,
        encoder: Arc<EmbeddingEncoder>,
        matcher: Arc<ActionMatcher>,
        llm: Arc<ModelLifecycleManager>,
        settings: Settings,
    ) -> Self {
        let index: Arc<dyn VectorIndex> = store.clone();
        let retrieval = RetrievalEngine::new(Arc::clone(&encoder), index);
        Self {
            store,
            encoder,
            matcher,
            retrieval,
            llm,
            settings,
        }
    }

    /// Wire up every component from the data directory. Action embeddings are
    /// computed in the background, so this must run inside a Tokio runtime.
    pub fn open(config: &LumenConfig, loader: Arc<dyn EngineLoader>) -> Result<Self> {
        let paths = &config.data_paths;
        let store = Arc::new(SqliteStore::open(&paths.vectordb, config.embedding_dim)?);
        let encoder = Arc::new(EmbeddingEncoder::initialize(
            &paths.bundled_assets,
            &paths.embedding_model,
            config.embedding_dim,
        ));

        let matcher = Arc::new(ActionMatcher::new(default_catalog(), Arc::clone(&encoder)));
        // Detached: matching works on exact phrases until embeddings settle.
        drop(matcher.initialize_embeddings());

        let factory = LlmFactory::new(
            &paths.models,
            LlmConfig::load(&paths.llm_config_file),
            loader,
            config.settings.max_tokens,
        );
        let llm = Arc::new(ModelLifecycleManager::new(factory));

        info!(
            "Assistant ready: data={} encoder_ready={}",
            paths.root.display(),
            encoder.is_ready()
        );
        Ok(Self::new(store, encoder, matcher, llm, config.settings.clone()))
    }

    pub fn store(&self) -> &Arc<SqliteStore> {
        &self.store
    }

    pub fn encoder(&self) -> &Arc<EmbeddingEncoder> {
        &self.encoder
    }

    pub fn matcher(&self) -> &Arc<ActionMatcher> {
        &self.matcher
    }

    pub fn llm(&self) -> &Arc<ModelLifecycleManager> {
        &self.llm
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn ingester(&self) -> Ingester<'_> {
        Ingester::new(&self.store, &self.encoder, &self.settings)
    }

    /// Ingest a file. `Ok(None)` when nothing could be read from it.
    pub fn ingest_file(&self, path: &Path) -> Result<Option<i64>> {
        self.ingester().ingest_file(path)
    }

    pub fn ingest_text(&self, text: &str, file_name: &str) -> Result<Option<i64>> {
        self.ingester().ingest_text(text, file_name)
    }

    /// Delete a document and its chunks.
    pub fn delete_document(&self, doc_id: i64) -> Result<bool> {
        self.store.delete_document(doc_id)
    }

    /// Documents, oldest first.
    pub fn list_documents(&self) -> Result<Vec<Document>> {
        self.store.list_documents(true)
    }

    /// Chat history, oldest first, optionally filtered by substring.
    pub fn history(&self, query: Option<&str>) -> Result<Vec<ChatMessage>> {
        self.store.search_messages(query.unwrap_or(""))
    }

    pub fn clear_history(&self) -> Result<usize> {
        self.store.clear_history()
    }

    pub fn stats(&self) -> Result<StoreStats> {
        self.store.get_stats()
    }

    /// Answer a query: run a matching device action, or retrieve context and
    /// stream an answer from the active provider.
    ///
    /// The provider is initialized on first use following the availability
    /// policy. Precondition failures (no model, no credential) are returned
    /// before anything is persisted.
    pub async fn ask(&self, query: &str) -> Result<Answer> {
        if let Some(action) = self.matcher.find_best_action(query) {
            let response = self.matcher.execute_action(action, query);
            debug!("Query routed to action {}", action.id);
            let message_id = if action.show_in_chat {
                self.store.add_message(&NewChatMessage::user(query))?;
                Some(
                    self.store
                        .add_message(&NewChatMessage::assistant(query, response.clone()))?,
                )
            } else {
                None
            };
            return Ok(Answer::Action {
                action_id: action.id.clone(),
                response,
                message_id,
            });
        }

        self.llm.ensure_active().await?;

        let history = if self.settings.recent_messages > 0 {
            self.store.recent_messages(self.settings.recent_messages * 2)?
        } else {
            Vec::new()
        };
        let retrieval = self.retrieval.retrieve(query, self.settings.retrieval_top_k)?;
        let prompt = build_prompt(&retrieval.context_text, &history, query);

        let stream = self.llm.generate(&prompt).await?;

        self.store.add_message(&NewChatMessage::user(query))?;
        let message_id = self.store.add_message(&NewChatMessage::assistant(query, ""))?;
        self.store.update_context(
            message_id,
            &retrieval.context_text,
            &retrieval.detailed_context_json(),
        )?;
        debug!(
            "Chat answer {} with {} contexts",
            message_id,
            retrieval.contexts.len()
        );

        Ok(Answer::Chat {
            retrieval,
            stream: AnswerStream::new(stream, Arc::clone(&self.store), message_id),
        })
    }

    /// Stop the answer currently streaming, if any.
    pub fn stop(&self) {
        self.llm.stop_generation();
    }

    /// Release the active provider. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.llm.close().await;
    }
}
