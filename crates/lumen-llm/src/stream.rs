//! Channel-backed generation streams with cooperative cancellation.
//!
//! A producer (native engine callback or network task) pushes text chunks
//! through a [`TokenSink`]; the consumer pulls them from a
//! [`GenerationStream`]. Both sides share one [`Generation`]. Once it is
//! cancelled the producer's next push fails and the stream ends without an error.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{info, warn};

use lumen_core::{Error, Result};

/// Chunks buffered between producer and consumer.
const CHANNEL_CAPACITY: usize = 64;

const FULL_BUFFER_BACKOFF: Duration = Duration::from_millis(5);

/// State owned by exactly one generation.
#[derive(Default)]
pub struct Generation {
    token: CancellationToken,
    active: AtomicBool,
}

impl Generation {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether the producer of this generation is still alive.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// A provider's current generation.
///
/// Each call to [`GenerationSlot::begin`] installs fresh state, so neither a
/// stop nor a late producer shutdown from one generation touches the next.
#[derive(Default)]
pub struct GenerationSlot {
    current: Mutex<Arc<Generation>>,
}

impl GenerationSlot {
    /// Install and return a fresh, uncancelled generation.
    pub fn begin(&self) -> Arc<Generation> {
        let fresh = Arc::new(Generation::default());
        *self.current.lock() = Arc::clone(&fresh);
        fresh
    }

    /// Cancel the current generation. A no-op when none is running.
    pub fn cancel(&self) {
        self.current.lock().cancel();
    }

    pub fn is_generating(&self) -> bool {
        self.current.lock().is_active()
    }
}

/// Consumer side: a pull-based stream of text chunks, best consumed with
/// `futures::StreamExt::next`.
///
/// Ends when the producer finishes or the generation is cancelled. A
/// cancel wakes a consumer already waiting for the next chunk. A producer
/// failure arrives as one `Err` item, after which the stream ends.
pub struct GenerationStream {
    rx: mpsc::Receiver<Result<String>>,
    generation: Arc<Generation>,
    on_cancel: Pin<Box<WaitForCancellationFutureOwned>>,
}

/// Producer side of a [`GenerationStream`].
pub struct TokenSink {
    tx: mpsc::Sender<Result<String>>,
    generation: Arc<Generation>,
    label: String,
    emitted: usize,
    started: Instant,
}

/// Create a connected sink and stream. The generation is active from now
/// until the sink is dropped.
pub fn generation_channel(
    generation: Arc<Generation>,
    label: impl Into<String>,
) -> (TokenSink, GenerationStream) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    generation.active.store(true, Ordering::Release);
    let on_cancel = Box::pin(generation.token.clone().cancelled_owned());
    (
        TokenSink {
            tx,
            generation: Arc::clone(&generation),
            label: label.into(),
            emitted: 0,
            started: Instant::now(),
        },
        GenerationStream {
            rx,
            generation,
            on_cancel,
        },
    )
}

impl TokenSink {
    /// Whether the consumer cancelled or went away.
    pub fn is_cancelled(&self) -> bool {
        self.generation.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves once the generation is cancelled or the consumer is gone.
    pub async fn cancelled(&self) {
        tokio::select! {
            _ = self.generation.token.cancelled() => {}
            _ = self.tx.closed() => {}
        }
    }

    /// Push a chunk from async code. Returns false once the producer should stop.
    pub async fn send(&mut self, chunk: String) -> bool {
        if self.is_cancelled() {
            return false;
        }
        let ok = tokio::select! {
            sent = self.tx.send(Ok(chunk)) => sent.is_ok(),
            _ = self.generation.token.cancelled() => false,
        };
        self.emitted += ok as usize;
        ok
    }

    /// Push a chunk from a blocking thread (engine callbacks).
    ///
    /// Waits for buffer space, but gives up as soon as the generation is
    /// cancelled even if the consumer never polls again.
    pub fn blocking_send(&mut self, chunk: String) -> bool {
        let mut item = Ok(chunk);
        loop {
            if self.is_cancelled() {
                return false;
            }
            match self.tx.try_send(item) {
                Ok(()) => {
                    self.emitted += 1;
                    return true;
                }
                Err(mpsc::error::TrySendError::Full(back)) => {
                    item = back;
                    std::thread::sleep(FULL_BUFFER_BACKOFF);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return false,
            }
        }
    }

    /// Terminate the stream with an error, unless it was cancelled.
    pub async fn fail(self, error: Error) {
        if self.is_cancelled() {
            return;
        }
        warn!("{} generation failed: {}", self.label, error);
        self.generation.active.store(false, Ordering::Release);
        let _ = self.tx.send(Err(error)).await;
    }

    pub fn blocking_fail(self, error: Error) {
        if self.is_cancelled() {
            return;
        }
        warn!("{} generation failed: {}", self.label, error);
        self.generation.active.store(false, Ordering::Release);
        let _ = self.tx.blocking_send(Err(error));
    }
}

impl Drop for TokenSink {
    fn drop(&mut self) {
        self.generation.active.store(false, Ordering::Release);
        info!(
            "{} generation finished: {} chunks in {} ms{}",
            self.label,
            self.emitted,
            self.started.elapsed().as_millis(),
            if self.generation.is_cancelled() {
                " (cancelled)"
            } else {
                ""
            }
        );
    }
}

impl GenerationStream {
    /// Drain the stream into one string, stopping at the first error.
    pub async fn collect_text(mut self) -> Result<String> {
        let mut text = String::new();
        while let Some(chunk) = self.next().await {
            text.push_str(&chunk?);
        }
        Ok(text)
    }
}

impl Stream for GenerationStream {
    type Item = Result<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.generation.is_cancelled() || this.on_cancel.as_mut().poll(cx).is_ready() {
            // Discard anything still buffered and let the producer see a closed channel.
            this.rx.close();
            return Poll::Ready(None);
        }
        this.rx.poll_recv(cx)
    }
}
