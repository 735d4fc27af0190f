//! OpenAI provider implementation.
//!
//! Speaks the `/v1/chat/completions` wire format, both the single-response
//! form and the `stream: true` server-sent-events form.

use super::{ChatRequest, ChatResponse, FragmentStream, Message, Provider, ProviderError, TokenUsage};
use async_trait::async_trait;
use futures_util::StreamExt;
use relay_common::config::UpstreamConfig;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};

const PROVIDER_NAME: &str = "openai";

/// OpenAI API provider.
pub struct OpenAIProvider {
    client: reqwest::Client,
    base_url: String,
}

impl OpenAIProvider {
    /// Create with an explicit base URL (for compatible APIs or test servers).
    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let api_key = api_key.into();
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key))
                .unwrap_or_else(|_| HeaderValue::from_static("")),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Create from the upstream section of the relay config.
    pub fn from_config(config: &UpstreamConfig) -> Self {
        Self::with_base_url(
            config.api_key.clone().unwrap_or_default(),
            config.base_url.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    fn error(model: &str, message: String, status_code: Option<u16>) -> ProviderError {
        ProviderError {
            provider: PROVIDER_NAME.into(),
            model: model.to_string(),
            message,
            status_code,
        }
    }

    /// POST the request and reject non-2xx responses.
    async fn send(&self, body: &OpenAIRequest<'_>) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .client
            .post(self.completions_url())
            .json(body)
            .send()
            .await
            .map_err(|e| Self::error(body.model, format!("Request failed: {}", e), None))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Self::error(
                body.model,
                format!("API error: {}", text),
                Some(status.as_u16()),
            ));
        }

        Ok(response)
    }
}

#[async_trait]
impl Provider for OpenAIProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let start = Instant::now();
        let body = OpenAIRequest {
            model: &request.model,
            messages: &request.messages,
            stream: false,
        };

        let response = self.send(&body).await?;
        let latency_ms = start.elapsed().as_millis() as u64;

        let openai_response: OpenAIResponse = response.json().await.map_err(|e| {
            Self::error(&request.model, format!("Failed to parse response: {}", e), None)
        })?;

        let choice = openai_response.choices.into_iter().next().ok_or_else(|| {
            Self::error(&request.model, "Response contained no choices".into(), None)
        })?;

        let usage = openai_response.usage.unwrap_or_default();

        Ok(ChatResponse {
            provider: PROVIDER_NAME.into(),
            model: openai_response.model.unwrap_or(request.model),
            content: choice.message.content.unwrap_or_default(),
            usage: TokenUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            },
            finish_reason: choice.finish_reason,
            latency_ms,
        })
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<FragmentStream, ProviderError> {
        let body = OpenAIRequest {
            model: &request.model,
            messages: &request.messages,
            stream: true,
        };

        let response = self.send(&body).await?;
        let model = request.model;

        let fragments = response
            .bytes_stream()
            .scan(SseDecoder::default(), move |decoder, chunk| {
                if decoder.is_done() {
                    return std::future::ready(None);
                }
                let items: Vec<Result<String, ProviderError>> = match chunk {
                    Ok(bytes) => decoder
                        .feed(&bytes)
                        .into_iter()
                        .map(|event| match event {
                            SseEvent::Delta(text) => Ok(text),
                            SseEvent::Error(message) => Err(Self::error(
                                &model,
                                format!("Stream error: {}", message),
                                None,
                            )),
                        })
                        .collect(),
                    Err(e) => vec![Err(Self::error(
                        &model,
                        format!("Stream read failed: {}", e),
                        None,
                    ))],
                };
                std::future::ready(Some(items))
            })
            .flat_map(futures_util::stream::iter);

        Ok(fragments.boxed())
    }
}

// ============================================================================
// SSE decoding
// ============================================================================

/// Event decoded from the completion stream.
#[derive(Debug, PartialEq, Eq)]
enum SseEvent {
    Delta(String),
    Error(String),
}

/// Incremental `data:` line decoder.
///
/// Network chunks can split a line (and a multi-byte character) anywhere,
/// so bytes are buffered until a `\n` arrives. A `\n` byte never occurs
/// inside a UTF-8 sequence, which makes line splitting on raw bytes safe.
#[derive(Debug, Default)]
struct SseDecoder {
    buf: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    fn is_done(&self) -> bool {
        self.done
    }

    fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buf.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if self.done {
                continue;
            }
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            match parse_data_line(line) {
                Some(DataLine::Done) => self.done = true,
                Some(DataLine::Event(event)) => events.push(event),
                None => {}
            }
        }
        events
    }
}

enum DataLine {
    Event(SseEvent),
    Done,
}

/// Parse one complete SSE line.
///
/// Returns `None` for blank lines, comments, non-`data` fields, chunks
/// without text content, and unparseable payloads.
fn parse_data_line(line: &str) -> Option<DataLine> {
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(DataLine::Done);
    }

    let value: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "Skipping unparseable stream line");
            return None;
        }
    };

    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        return Some(DataLine::Event(SseEvent::Error(message)));
    }

    value["choices"][0]["delta"]["content"]
        .as_str()
        .filter(|text| !text.is_empty())
        .map(|text| DataLine::Event(SseEvent::Delta(text.to_string())))
}

// ============================================================================
// OpenAI API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAIUsage {
    #[serde(default)]
    prompt_tokens: i64,
    #[serde(default)]
    completion_tokens: i64,
    #[serde(default)]
    total_tokens: i64,
}
