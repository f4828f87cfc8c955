//! Anthropic Messages API gateway implementation.
//!
//! Connects to the Anthropic streaming endpoint and translates its SSE
//! events into gateway [`StreamEvent`]s. The flattened instruction string
//! from the request is sent as a single user message.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::{Client, Response, header};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{GatewayError, Result, parse_retry_after_header};
use crate::gateway::{BlockStart, ContentDelta, EventStream, ModelGateway, StreamEvent};
use crate::types::{GenerationRequest, StopReason, ToolDefinition, Usage};

/// Default API base URL.
const DEFAULT_API_BASE: &str = "https://api.anthropic.com";

/// Default API version.
const DEFAULT_API_VERSION: &str = "2023-06-01";

/// Default timeout for requests.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for the Anthropic gateway.
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    /// API key for authentication.
    pub api_key: String,

    /// Base URL for the API.
    pub base_url: String,

    /// API version header.
    pub api_version: String,

    /// Request timeout.
    pub timeout: Duration,
}

impl AnthropicConfig {
    /// Create a new config with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_API_BASE.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Create config from environment variables.
    ///
    /// Checks `STEWARD_API_KEY` first, then `ANTHROPIC_API_KEY`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("STEWARD_API_KEY")
            .or_else(|_| std::env::var("ANTHROPIC_API_KEY"))
            .map_err(|_| {
                GatewayError::Config(
                    "neither STEWARD_API_KEY nor ANTHROPIC_API_KEY is set".to_string(),
                )
            })?;
        Ok(Self::new(api_key))
    }

    /// Set a custom base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Anthropic Gateway
// ─────────────────────────────────────────────────────────────────────────────

/// Anthropic API gateway.
pub struct AnthropicGateway {
    client: Client,
    config: AnthropicConfig,
}

impl AnthropicGateway {
    /// Create a new Anthropic gateway with the given configuration.
    pub fn new(config: AnthropicConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Create a gateway from environment configuration.
    pub fn from_env() -> Result<Self> {
        Self::new(AnthropicConfig::from_env()?)
    }

    /// Build the messages endpoint URL.
    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.config.base_url)
    }

    /// Add authentication and API headers to a request.
    fn add_headers(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", &self.config.api_version)
            .header(header::CONTENT_TYPE, "application/json")
    }

    /// Handle an error response.
    async fn handle_error_response(response: Response) -> GatewayError {
        let status = response.status();

        // Extract Retry-After header before consuming the response
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after_header);

        let body = response.text().await.unwrap_or_default();

        if let Ok(error) = serde_json::from_str::<ApiError>(&body) {
            match status.as_u16() {
                401 => GatewayError::Auth(format!(
                    "Authentication failed: {}",
                    error.error.message
                )),
                429 => GatewayError::RateLimit {
                    message: error.error.message,
                    retry_after,
                },
                500..=599 => {
                    GatewayError::Backend(format!("Server error: {}", error.error.message))
                }
                _ => GatewayError::Backend(error.error.message),
            }
        } else {
            GatewayError::Backend(format!("HTTP {}: {}", status, body))
        }
    }
}

#[async_trait]
impl ModelGateway for AnthropicGateway {
    async fn generate_stream(&self, request: GenerationRequest) -> Result<EventStream> {
        let body = ApiRequest::from_generation(&request);

        let response = self
            .add_headers(self.client.post(self.messages_url()))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::handle_error_response(response).await);
        }

        Ok(parse_sse_stream(response.bytes_stream()))
    }

    fn name(&self) -> &str {
        "anthropic"
    }

    async fn health_check(&self) -> Result<()> {
        if self.config.api_key.trim().is_empty() {
            return Err(GatewayError::Config("API key is empty".to_string()));
        }
        Ok(())
    }
}

/// Create a shared Anthropic gateway.
pub fn create_shared_gateway(config: AnthropicConfig) -> Result<Arc<dyn ModelGateway>> {
    Ok(Arc::new(AnthropicGateway::new(config)?))
}

// ─────────────────────────────────────────────────────────────────────────────
// API Request Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, serde::Serialize)]
struct ApiRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolDefinition>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<String>,
}

#[derive(Debug, serde::Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

impl ApiRequest {
    fn from_generation(request: &GenerationRequest) -> Self {
        Self {
            model: request.model.clone(),
            max_tokens: request.max_tokens,
            messages: vec![ApiMessage {
                role: "user",
                content: request.instructions.clone(),
            }],
            tools: request.tools.clone(),
            stream: true,
            temperature: request.temperature,
            stop_sequences: request.stop_sequences.clone(),
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, serde::Deserialize)]
struct ApiErrorDetail {
    #[serde(rename = "type")]
    #[allow(dead_code)]
    error_type: String,
    message: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// SSE Stream Parsing
// ─────────────────────────────────────────────────────────────────────────────

/// Parse SSE events from a byte stream and convert to StreamEvents.
fn parse_sse_stream(
    byte_stream: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
) -> EventStream {
    Box::pin(futures::stream::unfold(
        SseState {
            byte_stream: Box::pin(byte_stream),
            buffer: String::new(),
            current_event: None,
            input_tokens: 0,
            done: false,
        },
        |mut state| async move {
            if state.done {
                return None;
            }

            loop {
                // Process any complete lines already buffered
                while let Some(line_end) = state.buffer.find('\n') {
                    let line = state.buffer[..line_end].trim().to_string();
                    state.buffer = state.buffer[line_end + 1..].to_string();

                    if line.is_empty() {
                        // Empty line marks end of event
                        state.current_event = None;
                        continue;
                    }

                    if let Some((key, value)) = parse_sse_line(&line) {
                        match key {
                            "event" => {
                                state.current_event = Some(value.to_string());
                            }
                            "data" => {
                                if let Some(event_type) = state.current_event.clone()
                                    && let Some(parsed) =
                                        parse_stream_event(&event_type, value, &mut state)
                                {
                                    match parsed {
                                        Ok(event) => {
                                            if matches!(event, StreamEvent::MessageStop) {
                                                state.done = true;
                                            }
                                            return Some((Ok(event), state));
                                        }
                                        Err(e) => {
                                            // A recognized event with an
                                            // unparsable payload is fatal.
                                            state.done = true;
                                            return Some((Err(e), state));
                                        }
                                    }
                                }
                            }
                            _ => {}
                        }
                    }
                }

                // Need more data from the byte stream
                match state.byte_stream.next().await {
                    Some(Ok(bytes)) => {
                        let text = String::from_utf8_lossy(&bytes);
                        state.buffer.push_str(&text);
                    }
                    Some(Err(e)) => {
                        let mut final_state = state;
                        final_state.done = true;
                        return Some((Err(GatewayError::Network(e.to_string())), final_state));
                    }
                    None => {
                        return None;
                    }
                }
            }
        },
    ))
}

struct SseState {
    byte_stream: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    buffer: String,
    current_event: Option<String>,
    /// Input token count from message_start, carried into the final usage.
    input_tokens: u32,
    done: bool,
}

fn parse_sse_line(line: &str) -> Option<(&str, &str)> {
    if let Some(value) = line.strip_prefix("event: ") {
        Some(("event", value))
    } else if let Some(value) = line.strip_prefix("data: ") {
        Some(("data", value))
    } else {
        None
    }
}

/// Translate one SSE event into a gateway event.
///
/// Returns `None` for event types this client does not know (the protocol
/// adds new ones over time). A recognized event whose payload fails to
/// parse yields an error: the stream can no longer be trusted.
fn parse_stream_event(
    event_type: &str,
    data: &str,
    state: &mut SseState,
) -> Option<Result<StreamEvent>> {
    let event = match event_type {
        "message_start" => decode::<MessageStartEvent>(event_type, data).map(|parsed| {
            if let Some(usage) = parsed.message.usage {
                state.input_tokens = usage.input_tokens.unwrap_or(0);
            }
            StreamEvent::MessageStart {
                id: parsed.message.id,
                model: parsed.message.model,
            }
        }),
        "content_block_start" => decode::<ContentBlockStartEvent>(event_type, data).map(|parsed| {
            let block = match parsed.content_block.block_type.as_str() {
                "tool_use" => BlockStart::ToolUse {
                    id: parsed.content_block.id.unwrap_or_default(),
                    name: parsed.content_block.name.unwrap_or_default(),
                },
                _ => BlockStart::Text,
            };
            StreamEvent::ContentBlockStart {
                index: parsed.index,
                block,
            }
        }),
        "content_block_delta" => decode::<ContentBlockDeltaEvent>(event_type, data).map(|parsed| {
            let delta = match parsed.delta {
                DeltaContent::TextDelta { text } => ContentDelta::TextDelta(text),
                DeltaContent::InputJsonDelta { partial_json } => {
                    ContentDelta::InputJsonDelta(partial_json)
                }
            };
            StreamEvent::ContentBlockDelta {
                index: parsed.index,
                delta,
            }
        }),
        "content_block_stop" => {
            decode::<ContentBlockStopEvent>(event_type, data).map(|parsed| {
                StreamEvent::ContentBlockStop {
                    index: parsed.index,
                }
            })
        }
        "message_delta" => decode::<MessageDeltaEvent>(event_type, data).map(|parsed| {
            let stop_reason = match parsed.delta.stop_reason.as_deref() {
                Some("tool_use") => StopReason::ToolUse,
                Some("max_tokens") => StopReason::MaxTokens,
                Some("stop_sequence") => StopReason::StopSequence,
                _ => StopReason::EndTurn,
            };
            StreamEvent::MessageDelta {
                stop_reason,
                usage: Usage::new(state.input_tokens, parsed.usage.output_tokens),
            }
        }),
        "message_stop" => Ok(StreamEvent::MessageStop),
        "ping" => Ok(StreamEvent::Ping),
        "error" => {
            let message = serde_json::from_str::<StreamErrorEvent>(data)
                .map(|parsed| parsed.error.message)
                .unwrap_or_else(|_| "Unknown streaming error".to_string());
            Ok(StreamEvent::Error { message })
        }
        _ => return None,
    };
    Some(event)
}

fn decode<T: serde::de::DeserializeOwned>(event_type: &str, data: &str) -> Result<T> {
    serde_json::from_str::<T>(data).map_err(|e| {
        GatewayError::Serialization(format!(
            "malformed '{}' event from upstream: {}",
            event_type, e
        ))
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// SSE Event Structures
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, serde::Deserialize)]
struct MessageStartEvent {
    message: MessageStartMessage,
}

#[derive(Debug, serde::Deserialize)]
struct MessageStartMessage {
    id: String,
    model: String,
    usage: Option<MessageStartUsage>,
}

#[derive(Debug, serde::Deserialize)]
struct MessageStartUsage {
    input_tokens: Option<u32>,
}

#[derive(Debug, serde::Deserialize)]
struct ContentBlockStartEvent {
    index: usize,
    content_block: ContentBlockHeader,
}

#[derive(Debug, serde::Deserialize)]
struct ContentBlockHeader {
    #[serde(rename = "type")]
    block_type: String,
    id: Option<String>,
    name: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct ContentBlockDeltaEvent {
    index: usize,
    delta: DeltaContent,
}

#[derive(Debug, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum DeltaContent {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
}

#[derive(Debug, serde::Deserialize)]
struct ContentBlockStopEvent {
    index: usize,
}

#[derive(Debug, serde::Deserialize)]
struct MessageDeltaEvent {
    delta: MessageDelta,
    usage: MessageDeltaUsage,
}

#[derive(Debug, serde::Deserialize)]
struct MessageDelta {
    stop_reason: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct MessageDeltaUsage {
    output_tokens: u32,
}

#[derive(Debug, serde::Deserialize)]
struct StreamErrorEvent {
    error: StreamErrorDetail,
}

#[derive(Debug, serde::Deserialize)]
struct StreamErrorDetail {
    #[serde(rename = "type")]
    #[allow(dead_code)]
    error_type: String,
    message: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
