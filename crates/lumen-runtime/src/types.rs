//! Answer types returned by the assistant.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tracing::warn;

use lumen_core::Result;
use lumen_llm::GenerationStream;
use lumen_retrieve::Retrieval;
use lumen_store::SqliteStore;

/// Outcome of [`crate::Assistant::ask`].
pub enum Answer {
    /// The query was routed to a device action.
    Action {
        action_id: String,
        response: String,
        /// Assistant message id, when the action is shown in chat.
        message_id: Option<i64>,
    },
    /// The query goes to the language model.
    Chat {
        retrieval: Retrieval,
        stream: AnswerStream,
    },
}

/// A generation stream that persists the growing response.
///
/// Every chunk is appended to the assistant message identified by
/// `message_id`, so the stored answer always matches what was streamed.
pub struct AnswerStream {
    inner: GenerationStream,
    store: Arc<SqliteStore>,
    message_id: i64,
    text: String,
}

impl AnswerStream {
    pub(crate) fn new(inner: GenerationStream, store: Arc<SqliteStore>, message_id: i64) -> Self {
        Self {
            inner,
            store,
            message_id,
            text: String::new(),
        }
    }

    pub fn message_id(&self) -> i64 {
        self.message_id
    }

    /// Text received so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Drain the stream and return the full answer.
    pub async fn collect_text(mut self) -> Result<String> {
        use futures::StreamExt;
        while let Some(chunk) = self.next().await {
            chunk?;
        }
        Ok(self.text)
    }
}

impl Stream for AnswerStream {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let item = match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(item) => item,
            Poll::Pending => return Poll::Pending,
        };
        match &item {
            Some(Ok(chunk)) => {
                self.text.push_str(chunk);
                if let Err(e) = self.store.update_response(self.message_id, &self.text) {
                    warn!("Failed to persist partial response {}: {}", self.message_id, e);
                }
            }
            Some(Err(_)) if self.text.is_empty() => {
                // Nothing was generated; drop the empty placeholder.
                if let Err(e) = self.store.delete_message(self.message_id) {
                    warn!("Failed to remove placeholder {}: {}", self.message_id, e);
                }
            }
            _ => {}
        }
        Poll::Ready(item)
    }
}
