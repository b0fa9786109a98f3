//! Cloud generation over server-sent events.
//!
//! OpenAI and Groq use the chat-completions format. Anthropic uses the
//! Messages API format.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use parking_lot::Mutex;
use reqwest::Client;
use serde_json::json;
use tokio_stream::StreamExt;
use tracing::{debug, error, info};

use crate::config::RemoteTarget;
use crate::provider::LlmProvider;
use crate::stream::{generation_channel, GenerationSlot, GenerationStream};
use crate::types::{DecodingParams, ProviderKind, Vendor, SYSTEM_INSTRUCTION};
use lumen_core::{Error, Result};

/// Raw upstream deltas, before cancellation is applied.
type DeltaStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Streams from a remote vendor with fixed decoding parameters.
pub struct RemoteProvider {
    target: RemoteTarget,
    params: DecodingParams,
    system_instruction: String,
    client: Mutex<Option<Client>>,
    generation: GenerationSlot,
}

impl RemoteProvider {
    pub fn new(target: RemoteTarget, params: DecodingParams) -> Self {
        Self {
            target,
            params,
            system_instruction: SYSTEM_INSTRUCTION.to_string(),
            client: Mutex::new(None),
            generation: GenerationSlot::default(),
        }
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = instruction.into();
        self
    }

    pub fn vendor(&self) -> Vendor {
        self.target.vendor
    }
}

#[async_trait]
impl LlmProvider for RemoteProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Remote
    }

    fn model_id(&self) -> Option<String> {
        Some(self.target.model.clone())
    }

    async fn init(&self) -> Result<()> {
        let mut client = self.client.lock();
        if client.is_none() {
            *client = Some(
                Client::builder()
                    .build()
                    .map_err(|e| Error::Http(e.to_string()))?,
            );
            info!(
                "Remote provider ready: {} / {}",
                self.target.vendor, self.target.model
            );
        }
        Ok(())
    }

    async fn generate_response(&self, prompt: &str) -> Result<GenerationStream> {
        let client = self
            .client
            .lock()
            .clone()
            .ok_or_else(|| Error::Generation("remote provider not initialized".into()))?;

        let mut deltas: DeltaStream = if self.target.vendor.is_openai_compatible() {
            Box::pin(stream_openai_compat(
                client,
                self.target.clone(),
                self.params,
                self.system_instruction.clone(),
                prompt.to_string(),
            ))
        } else {
            Box::pin(stream_anthropic(
                client,
                self.target.clone(),
                self.params,
                self.system_instruction.clone(),
                prompt.to_string(),
            ))
        };

        let label = format!("{}:{}", self.target.vendor, self.target.model);
        let (mut sink, stream) = generation_channel(self.generation.begin(), label);

        tokio::spawn(async move {
            loop {
                // A stop drops the upstream connection without waiting for its next byte.
                let delta = tokio::select! {
                    _ = sink.cancelled() => {
                        debug!("Remote stream cancelled; dropping upstream");
                        return;
                    }
                    delta = deltas.next() => delta,
                };
                let Some(delta) = delta else {
                    return;
                };
                match delta {
                    Ok(text) => {
                        if !sink.send(text).await {
                            debug!("Remote stream cancelled; dropping upstream");
                            return;
                        }
                    }
                    Err(e) => {
                        sink.fail(e).await;
                        return;
                    }
                }
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
        self.generation.cancel();
        if self.client.lock().take().is_some() {
            info!("Closed remote provider {}", self.target.vendor);
        }
    }
}

/// Split complete SSE lines off the front of `buffer`.
fn drain_lines(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = buffer.drain(..=pos).collect();
        lines.push(String::from_utf8_lossy(&line).trim().to_string());
    }
    lines
}

async fn send_checked(request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
    let response = request
        .send()
        .await
        .map_err(|e| Error::Http(format!("Request failed: {}", e)))?;
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Generation(format!("API error {}: {}", status, body)));
    }
    Ok(response)
}

/// Stream from OpenAI-compatible APIs (OpenAI, Groq).
fn stream_openai_compat(
    client: Client,
    target: RemoteTarget,
    params: DecodingParams,
    system: String,
    prompt: String,
) -> impl Stream<Item = Result<String>> + Send + 'static {
    async_stream::stream! {
        let url = format!("{}/chat/completions", target.base_url.trim_end_matches('/'));
        let body = json!({
            "model": target.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt},
            ],
            "temperature": params.temperature,
            "top_p": params.top_p,
            "max_tokens": params.max_tokens,
            "stream": true,
        });

        debug!("Streaming from {} with model {}", url, target.model);

        let request = client
            .post(&url)
            .header("Authorization", format!("Bearer {}", target.api_key))
            .header("Content-Type", "application/json")
            .json(&body);
        let response = match send_checked(request).await {
            Ok(r) => r,
            Err(e) => {
                yield Err(e);
                return;
            }
        };

        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => buffer.extend_from_slice(&bytes),
                Err(e) => {
                    yield Err(Error::Generation(format!("Stream read error: {}", e)));
                    return;
                }
            }

            for line in drain_lines(&mut buffer) {
                let Some(data) = line.strip_prefix("data:").map(str::trim) else {
                    continue;
                };
                if data == "[DONE]" {
                    return;
                }
                if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(data) {
                    if let Some(content) = parsed["choices"][0]["delta"]["content"].as_str() {
                        if !content.is_empty() {
                            yield Ok(content.to_string());
                        }
                    }
                }
            }
        }
    }
}

/// Stream from Anthropic's Messages API.
fn stream_anthropic(
    client: Client,
    target: RemoteTarget,
    params: DecodingParams,
    system: String,
    prompt: String,
) -> impl Stream<Item = Result<String>> + Send + 'static {
    async_stream::stream! {
        let url = format!("{}/messages", target.base_url.trim_end_matches('/'));
        let body = json!({
            "model": target.model,
            "system": system,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": params.temperature,
            "top_p": params.top_p,
            "max_tokens": params.max_tokens,
            "stream": true,
        });

        debug!("Streaming from Anthropic with model {}", target.model);

        let request = client
            .post(&url)
            .header("x-api-key", &target.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&body);
        let response = match send_checked(request).await {
            Ok(r) => r,
            Err(e) => {
                yield Err(e);
                return;
            }
        };

        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => buffer.extend_from_slice(&bytes),
                Err(e) => {
                    yield Err(Error::Generation(format!("Stream read error: {}", e)));
                    return;
                }
            }

            // "event:" lines are redundant with the payload's "type" field.
            for line in drain_lines(&mut buffer) {
                let Some(data) = line.strip_prefix("data:").map(str::trim) else {
                    continue;
                };
                let Ok(parsed) = serde_json::from_str::<serde_json::Value>(data) else {
                    continue;
                };
                match parsed["type"].as_str() {
                    Some("content_block_delta") => {
                        if let Some(text) = parsed["delta"]["text"].as_str() {
                            if !text.is_empty() {
                                yield Ok(text.to_string());
                            }
                        }
                    }
                    Some("message_stop") => return,
                    Some("error") => {
                        let msg = parsed["error"]["message"]
                            .as_str()
                            .unwrap_or("Unknown error")
                            .to_string();
                        error!("Anthropic error: {}", msg);
                        yield Err(Error::Generation(msg));
                        return;
                    }
                    _ => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::Router;
    use std::time::{Duration, Instant};

    async fn openai_sse() -> impl IntoResponse {
        let body = concat!(
            ": keep-alive\n\n",
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\", caf\u{e9}\"}}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
        );
        ([(header::CONTENT_TYPE, "text/event-stream")], body)
    }

    async fn anthropic_sse() -> impl IntoResponse {
        let body = concat!(
            "event: message_start\n",
            "data: {\"type\":\"message_start\"}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"Paris\"}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\" is the capital.\"}}\n\n",
            "event: message_stop\n",
            "data: {\"type\":\"message_stop\"}\n\n",
        );
        ([(header::CONTENT_TYPE, "text/event-stream")], body)
    }

    /// One delta, then the upstream goes quiet.
    async fn stalled_sse() -> impl IntoResponse {
        let body = async_stream::stream! {
            yield Ok::<_, std::io::Error>(
                "data: {\"choices\":[{\"delta\":{\"content\":\"first\"}}]}\n\n".to_string(),
            );
            tokio::time::sleep(Duration::from_secs(30)).await;
        };
        (
            [(header::CONTENT_TYPE, "text/event-stream")],
            Body::from_stream(body),
        )
    }

    async fn failing() -> impl IntoResponse {
        (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded")
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn target(vendor: Vendor, base_url: String) -> RemoteTarget {
        RemoteTarget {
            vendor,
            model: "test-model".into(),
            api_key: "sk-test".into(),
            base_url,
        }
    }

    async fn provider(vendor: Vendor, router: Router) -> RemoteProvider {
        let base = serve(router).await;
        let p = RemoteProvider::new(target(vendor, base), DecodingParams::default());
        p.init().await.unwrap();
        p
    }

    #[tokio::test]
    async fn test_openai_deltas_in_order() {
        let p = provider(
            Vendor::OpenAI,
            Router::new().route("/chat/completions", post(openai_sse)),
        )
        .await;
        let stream = p.generate_response("hi").await.unwrap();
        assert_eq!(stream.collect_text().await.unwrap(), "Hello, café");
    }

    #[tokio::test]
    async fn test_anthropic_content_block_deltas() {
        let p = provider(
            Vendor::Anthropic,
            Router::new().route("/messages", post(anthropic_sse)),
        )
        .await;
        let stream = p.generate_response("capital of France?").await.unwrap();
        assert_eq!(
            stream.collect_text().await.unwrap(),
            "Paris is the capital."
        );
    }

    #[tokio::test]
    async fn test_http_error_terminates_with_error() {
        let p = provider(
            Vendor::Groq,
            Router::new().route("/chat/completions", post(failing)),
        )
        .await;
        let stream = p.generate_response("hi").await.unwrap();
        let err = stream.collect_text().await.unwrap_err();
        assert!(matches!(err, Error::Generation(ref m) if m.contains("500")));
        assert!(!p.is_generating());
    }

    #[tokio::test]
    async fn test_stop_suppresses_remaining_deltas() {
        let p = provider(
            Vendor::OpenAI,
            Router::new().route("/chat/completions", post(openai_sse)),
        )
        .await;
        let mut stream = p.generate_response("hi").await.unwrap();
        p.stop_generation();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_stop_ends_stream_while_upstream_is_stalled() {
        let p = provider(
            Vendor::OpenAI,
            Router::new().route("/chat/completions", post(stalled_sse)),
        )
        .await;
        let mut stream = p.generate_response("hi").await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), "first");

        let started = Instant::now();
        let (next, _) = tokio::join!(
            tokio::time::timeout(Duration::from_secs(5), stream.next()),
            async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                p.stop_generation();
            }
        );
        assert!(matches!(next, Ok(None)));
        assert!(started.elapsed() < Duration::from_secs(2));

        // The pump drops the upstream and releases the generation.
        for _ in 0..100 {
            if !p.is_generating() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!p.is_generating());
    }

    #[tokio::test]
    async fn test_generate_before_init_fails() {
        let p = RemoteProvider::new(
            target(Vendor::OpenAI, "http://127.0.0.1:9".into()),
            DecodingParams::default(),
        );
        assert!(p.generate_response("hi").await.is_err());
        p.close().await;
        p.close().await;
    }

    #[test]
    fn test_drain_lines_keeps_partial_tail() {
        let mut buf = b"data: a\n\ndata: b".to_vec();
        assert_eq!(drain_lines(&mut buf), vec!["data: a".to_string(), String::new()]);
        assert_eq!(buf, b"data: b");
    }
}
