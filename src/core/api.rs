use anyhow::{anyhow, Result};
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::context::TokenUsage;
use super::ChatMessage;
use crate::config::settings::ProviderConfig;

// ── Types ───────────────────────────────────────────────────────────────

/// Request quota as reported by `x-ratelimit-*` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub remaining: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, Default)]
pub struct StreamResult {
    pub content: String,
    /// Absent when the provider does not report usage.
    pub usage: Option<TokenUsage>,
    pub finish_reason: String,
    pub rate_limit: Option<RateLimit>,
    pub cancelled: bool,
}

/// Events emitted during streaming.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    ContentChunk(String),
    Error(String),
}

// ── Client ──────────────────────────────────────────────────────────────

/// Client for any OpenAI-compatible `/chat/completions` endpoint.
#[derive(Clone)]
pub struct ProviderClient {
    http: reqwest::Client,
    name: String,
    api_key: String,
    base_url: String,
}

impl ProviderClient {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        if config.base_url.is_empty() {
            return Err(anyhow!("provider \"{}\" has no baseUrl", config.name));
        }
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            http,
            name: config.name.clone(),
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if !self.api_key.is_empty() {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", self.api_key))?,
            );
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    /// Stream a chat completion, sending events to the provided channel.
    /// Returns the final accumulated result; a cancelled stream returns what
    /// arrived so far with `cancelled` set.
    pub async fn stream_chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        event_tx: Option<mpsc::UnboundedSender<StreamEvent>>,
        cancel: CancellationToken,
    ) -> Result<StreamResult> {
        let body = serde_json::json!({
            "model": model,
            "messages": messages,
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        let url = format!("{}/chat/completions", self.base_url);
        tracing::debug!(provider = %self.name, model, messages = messages.len(), "sending chat request");

        let request = self.http.post(&url).headers(self.headers()?).json(&body);
        let response = tokio::select! {
            _ = cancel.cancelled() => {
                return Ok(StreamResult { cancelled: true, ..Default::default() });
            }
            resp = request.send() => resp?,
        };

        let rate_limit = parse_rate_limit(response.headers());

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            if let Ok(json) = serde_json::from_str::<Value>(&text) {
                if let Some(mapped) = parse_error(&json) {
                    return Err(anyhow!("API error {}: {}", status, mapped));
                }
            }
            return Err(anyhow!("API error {}: {}", status, text));
        }

        let mut result = StreamResult {
            rate_limit,
            ..Default::default()
        };
        let mut chunk_count: u64 = 0;
        let mut stream = response.bytes_stream();

        // Raw bytes of the trailing partial line; a UTF-8 sequence may span reads
        let mut line_buffer: Vec<u8> = Vec::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    result.cancelled = true;
                    break;
                }
                chunk = stream.next() => {
                    match chunk {
                        Some(Ok(bytes)) => {
                            line_buffer.extend_from_slice(&bytes);
                            for data in drain_sse_data(&mut line_buffer) {
                                if let Ok(chunk_json) = serde_json::from_str::<Value>(&data) {
                                    chunk_count += 1;
                                    process_chunk(&chunk_json, &mut result, &event_tx);
                                }
                            }
                        }
                        Some(Err(e)) => {
                            let msg = format!("Stream error: {}", e);
                            if let Some(tx) = &event_tx {
                                let _ = tx.send(StreamEvent::Error(msg.clone()));
                            }
                            return Err(anyhow!(msg));
                        }
                        None => break, // Stream ended
                    }
                }
            }
        }

        if chunk_count == 0 && !result.cancelled {
            return Err(anyhow!("No response received from {} (0 chunks)", self.name));
        }

        Ok(result)
    }
}

/// Pop complete lines off `buffer` and return the `data:` payloads,
/// skipping comments and the `[DONE]` sentinel.
fn drain_sse_data(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut out = Vec::new();
    while let Some(line_end) = buffer.iter().position(|b| *b == b'\n') {
        let raw: Vec<u8> = buffer.drain(..=line_end).collect();
        let decoded = String::from_utf8_lossy(&raw[..line_end]);
        let line = decoded.trim_end_matches('\r');

        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(data) = line.strip_prefix("data:") {
            let data = data.trim();
            if data != "[DONE]" {
                out.push(data.to_string());
            }
        }
    }
    out
}

pub fn parse_rate_limit(headers: &HeaderMap) -> Option<RateLimit> {
    let read = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
    };
    let remaining = read("x-ratelimit-remaining-requests")?;
    let limit = read("x-ratelimit-limit-requests")?;
    Some(RateLimit { remaining, limit })
}

fn parse_error(data: &Value) -> Option<String> {
    let error = data.get("error")?;
    if let Some(msg) = error.as_str() {
        return Some(msg.to_string());
    }
    let msg = error.get("message").and_then(|v| v.as_str())?;
    match error.get("type").and_then(|v| v.as_str()) {
        Some(kind) => Some(format!("{} ({})", msg, kind)),
        None => Some(msg.to_string()),
    }
}

fn process_chunk(
    chunk: &Value,
    result: &mut StreamResult,
    event_tx: &Option<mpsc::UnboundedSender<StreamEvent>>,
) {
    // Usage
    if let Some(u) = chunk.get("usage").filter(|u| u.is_object()) {
        let read = |key: &str| u.get(key).and_then(|v| v.as_u64()).unwrap_or(0);
        let input_tokens = read("prompt_tokens");
        let output_tokens = read("completion_tokens");
        let total = read("total_tokens");
        result.usage = Some(TokenUsage {
            input_tokens,
            output_tokens,
            total_tokens: if total == 0 {
                input_tokens + output_tokens
            } else {
                total
            },
        });
    }

    // API-level error
    if let Some(msg) = parse_error(chunk) {
        if let Some(tx) = event_tx {
            let _ = tx.send(StreamEvent::Error(format!("API error: {}", msg)));
        }
        return;
    }

    let choice = match chunk.get("choices").and_then(|c| c.get(0)) {
        Some(c) => c,
        None => return,
    };

    if let Some(fr) = choice.get("finish_reason").and_then(|v| v.as_str()) {
        result.finish_reason = fr.to_string();
    }

    if let Some(c) = choice
        .get("delta")
        .and_then(|d| d.get("content"))
        .and_then(|v| v.as_str())
    {
        result.content.push_str(c);
        if let Some(tx) = event_tx {
            let _ = tx.send(StreamEvent::ContentChunk(c.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_content_chunk() {
        let chunk = serde_json::json!({
            "choices": [{ "delta": { "content": "Hello" } }]
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut result = StreamResult::default();
        process_chunk(&chunk, &mut result, &Some(tx));

        assert_eq!(result.content, "Hello");
        match rx.try_recv().unwrap() {
            StreamEvent::ContentChunk(c) => assert_eq!(c, "Hello"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn usage_extraction() {
        let chunk = serde_json::json!({
            "usage": { "prompt_tokens": 100, "completion_tokens": 50, "total_tokens": 150 },
            "choices": [{ "delta": {}, "finish_reason": "stop" }]
        });
        let mut result = StreamResult::default();
        process_chunk(&chunk, &mut result, &None);

        let usage = result.usage.unwrap();
        assert_eq!(usage.input_tokens, 100);
        assert_eq!(usage.output_tokens, 50);
        assert_eq!(usage.total_tokens, 150);
        assert_eq!(result.finish_reason, "stop");
    }

    #[test]
    fn null_usage_is_ignored() {
        let chunk = serde_json::json!({
            "usage": null,
            "choices": [{ "delta": { "content": "x" } }]
        });
        let mut result = StreamResult::default();
        process_chunk(&chunk, &mut result, &None);
        assert!(result.usage.is_none());
    }

    #[test]
    fn error_chunk_is_reported() {
        let chunk = serde_json::json!({
            "error": { "message": "model overloaded", "type": "server_error" }
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut result = StreamResult::default();
        process_chunk(&chunk, &mut result, &Some(tx));
        match rx.try_recv().unwrap() {
            StreamEvent::Error(e) => assert_eq!(e, "API error: model overloaded (server_error)"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn sse_lines_split_across_reads() {
        let mut buffer = b": keep-alive\ndata: {\"a\":1}\r\ndata: {\"b\"".to_vec();
        assert_eq!(drain_sse_data(&mut buffer), vec!["{\"a\":1}"]);
        assert_eq!(buffer, b"data: {\"b\"");

        buffer.extend_from_slice(b":2}\n\ndata: [DONE]\n");
        assert_eq!(drain_sse_data(&mut buffer), vec!["{\"b\":2}"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn rate_limit_headers() {
        let mut headers = HeaderMap::new();
        assert!(parse_rate_limit(&headers).is_none());

        headers.insert("x-ratelimit-remaining-requests", HeaderValue::from_static("42"));
        assert!(parse_rate_limit(&headers).is_none());

        headers.insert("x-ratelimit-limit-requests", HeaderValue::from_static("60"));
        assert_eq!(
            parse_rate_limit(&headers),
            Some(RateLimit {
                remaining: 42,
                limit: 60
            })
        );
    }

    #[test]
    fn error_body_shapes() {
        let nested = serde_json::json!({ "error": { "message": "bad key" } });
        assert_eq!(parse_error(&nested).as_deref(), Some("bad key"));
        let flat = serde_json::json!({ "error": "not found" });
        assert_eq!(parse_error(&flat).as_deref(), Some("not found"));
        assert!(parse_error(&serde_json::json!({ "ok": true })).is_none());
    }

    #[tokio::test]
    async fn multibyte_text_split_across_reads() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let body = format!(
            "data: {}\n\ndata: [DONE]\n\n",
            serde_json::json!({ "choices": [{ "delta": { "content": "héllo 🦀" } }] })
        )
        .into_bytes();
        let crab = body.windows(4).position(|w| w == "🦀".as_bytes()).unwrap();
        let (first, second) = body.split_at(crab + 2);
        let (first, second) = (first.to_vec(), second.to_vec());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            // drain the whole request so closing doesn't reset the connection
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                let Some(head_end) = text.find("\r\n\r\n") else {
                    if n == 0 {
                        break;
                    }
                    continue;
                };
                let length = text[..head_end]
                    .lines()
                    .find_map(|l| {
                        let (k, v) = l.split_once(':')?;
                        k.eq_ignore_ascii_case("content-length")
                            .then(|| v.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if n == 0 || request.len() >= head_end + 4 + length {
                    break;
                }
            }
            let head = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\n\
                 content-length: {}\r\nconnection: close\r\n\r\n",
                first.len() + second.len()
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(&first).await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            socket.write_all(&second).await.unwrap();
            socket.shutdown().await.unwrap();
        });

        let mut config = ProviderConfig::ollama();
        config.base_url = format!("http://{}/v1", addr);
        let client = ProviderClient::new(&config).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = client
            .stream_chat("llama3.2", &[], Some(tx), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.content, "héllo 🦀");
        match rx.try_recv().unwrap() {
            StreamEvent::ContentChunk(c) => assert_eq!(c, "héllo 🦀"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn client_requires_base_url() {
        let mut config = ProviderConfig::ollama();
        assert!(ProviderClient::new(&config).is_ok());
        config.base_url.clear();
        assert!(ProviderClient::new(&config).is_err());
    }
}
