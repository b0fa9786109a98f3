//! Action descriptors.

use std::sync::Arc;

/// Handler invoked with the raw query. `None` means "use the static response".
pub type ActionHandler = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// An immutable catalog entry. Its embedding lives in the matcher, keyed by `id`.
#[derive(Clone)]
pub struct AppAction {
    pub id: String,
    /// Trigger phrases, most representative first. The first one is embedded.
    pub descriptions: Vec<String>,
    pub handler: ActionHandler,
    /// Whether the exchange is recorded in chat history.
    pub show_in_chat: bool,
    pub static_response: String,
}

impl AppAction {
    pub fn new(id: impl Into<String>, descriptions: &[&str], static_response: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            descriptions: descriptions.iter().map(|d| d.to_string()).collect(),
            handler: Arc::new(|_| None),
            show_in_chat: true,
            static_response: static_response.into(),
        }
    }

    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.handler = Arc::new(handler);
        self
    }

    pub fn hidden_from_chat(mut self) -> Self {
        self.show_in_chat = false;
        self
    }

    /// The phrase embedded for semantic matching.
    pub fn primary_description(&self) -> Option<&str> {
        self.descriptions.first().map(String::as_str)
    }
}

impl std::fmt::Debug for AppAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppAction")
            .field("id", &self.id)
            .field("descriptions", &self.descriptions)
            .field("show_in_chat", &self.show_in_chat)
            .field("static_response", &self.static_response)
            .finish()
    }
}
