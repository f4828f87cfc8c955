//! Model gateway trait and streaming event model.
//!
//! A gateway wraps one upstream model provider and exposes a single
//! streaming operation. Events arrive in generation order: content blocks
//! are announced, their deltas streamed, then closed, and the message ends
//! with usage accounting. Tool-use blocks carry their identity up front so
//! callers can key in-flight calls by output position.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::{GatewayError, Result};
use crate::types::{GenerationRequest, StopReason, Usage};

// ─────────────────────────────────────────────────────────────────────────────
// Streaming Types
// ─────────────────────────────────────────────────────────────────────────────

/// A streaming response from a model gateway.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send + 'static>>;

/// Events emitted during streaming generation.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Message started.
    MessageStart { id: String, model: String },
    /// Content block started at an output position.
    ContentBlockStart { index: usize, block: BlockStart },
    /// Delta within a content block.
    ContentBlockDelta { index: usize, delta: ContentDelta },
    /// Content block finished.
    ContentBlockStop { index: usize },
    /// Message finishing with final usage stats.
    MessageDelta {
        stop_reason: StopReason,
        usage: Usage,
    },
    /// Message complete.
    MessageStop,
    /// Ping to keep the connection alive.
    Ping,
    /// Error reported in-band by the provider.
    Error { message: String },
}

/// The identity of a content block as announced at its start.
#[derive(Debug, Clone)]
pub enum BlockStart {
    /// A text block.
    Text,
    /// A tool-use block. The id/name arrive here, before any arguments.
    ToolUse { id: String, name: String },
}

/// Delta content in a streaming response.
#[derive(Debug, Clone)]
pub enum ContentDelta {
    /// Text being streamed.
    TextDelta(String),
    /// Partial JSON for tool input.
    InputJsonDelta(String),
}

impl StreamEvent {
    /// Returns true if this is an error event.
    pub fn is_error(&self) -> bool {
        matches!(self, StreamEvent::Error { .. })
    }

    /// Returns true if this is the final event in a message.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::MessageStop | StreamEvent::Error { .. })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Model Gateway Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Trait for model gateway providers.
///
/// Implementations connect to an upstream model service and stream
/// generation events back in order. The gateway is consumed by the loop
/// controller; one stream is opened per loop iteration.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Execute a generation request and return a stream of events.
    async fn generate_stream(&self, request: GenerationRequest) -> Result<EventStream>;

    /// Get the name of this gateway.
    fn name(&self) -> &str;

    /// Check if the gateway is available and properly configured.
    async fn health_check(&self) -> Result<()>;
}

/// A gateway that can be shared across tasks.
pub type SharedGateway = Arc<dyn ModelGateway>;

// ─────────────────────────────────────────────────────────────────────────────
// Mock Gateway
// ─────────────────────────────────────────────────────────────────────────────

/// A mock gateway for testing purposes.
///
/// Each scripted turn is a full event sequence returned by one
/// `generate_stream` call, in order. Requesting more turns than were
/// scripted returns an error.
#[derive(Debug)]
pub struct MockGateway {
    name: String,
    turns: std::sync::Mutex<Vec<Vec<Result<StreamEvent>>>>,
    request_log: std::sync::Mutex<Vec<GenerationRequest>>,
}

impl MockGateway {
    /// Create a mock gateway with the given scripted turns.
    pub fn new(turns: Vec<Vec<Result<StreamEvent>>>) -> Self {
        Self {
            name: "mock".to_string(),
            turns: std::sync::Mutex::new(turns),
            request_log: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Create a mock gateway that streams a single text response.
    pub fn with_text(text: impl Into<String>) -> Self {
        Self::new(vec![text_turn(text)])
    }

    /// Get all requests that were made to this gateway.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.request_log.lock().unwrap().clone()
    }

    /// Get the number of requests made.
    pub fn request_count(&self) -> usize {
        self.request_log.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelGateway for MockGateway {
    async fn generate_stream(&self, request: GenerationRequest) -> Result<EventStream> {
        self.request_log.lock().unwrap().push(request);

        let mut turns = self.turns.lock().unwrap();
        if turns.is_empty() {
            return Err(GatewayError::Backend(
                "MockGateway: no more scripted turns available".to_string(),
            ));
        }
        let events = turns.remove(0);

        Ok(Box::pin(futures::stream::iter(events)))
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Build the event sequence for a plain text turn.
pub fn text_turn(text: impl Into<String>) -> Vec<Result<StreamEvent>> {
    vec![
        Ok(StreamEvent::MessageStart {
            id: "mock_msg_1".to_string(),
            model: "mock-model".to_string(),
        }),
        Ok(StreamEvent::ContentBlockStart {
            index: 0,
            block: BlockStart::Text,
        }),
        Ok(StreamEvent::ContentBlockDelta {
            index: 0,
            delta: ContentDelta::TextDelta(text.into()),
        }),
        Ok(StreamEvent::ContentBlockStop { index: 0 }),
        Ok(StreamEvent::MessageDelta {
            stop_reason: StopReason::EndTurn,
            usage: Usage::new(10, 20),
        }),
        Ok(StreamEvent::MessageStop),
    ]
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_mock_gateway_text_turn() {
        let gateway = MockGateway::with_text("Hello!");

        let request = GenerationRequest::new("test-model", "User: hi", 100);
        let mut stream = gateway.generate_stream(request).await.unwrap();

        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event.unwrap());
        }

        assert_eq!(events.len(), 6);
        assert!(matches!(events[0], StreamEvent::MessageStart { .. }));
        assert!(matches!(events[5], StreamEvent::MessageStop));
        assert_eq!(gateway.request_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_gateway_exhausted() {
        let gateway = MockGateway::new(vec![]);

        let request = GenerationRequest::new("test-model", "User: hi", 100);
        let result = gateway.generate_stream(request).await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_mock_gateway_scripted_turns_in_order() {
        let gateway = MockGateway::new(vec![text_turn("First"), text_turn("Second")]);

        for expected in ["First", "Second"] {
            let request = GenerationRequest::new("test-model", "User: hi", 100);
            let mut stream = gateway.generate_stream(request).await.unwrap();

            let mut text = String::new();
            while let Some(event) = stream.next().await {
                if let StreamEvent::ContentBlockDelta {
                    delta: ContentDelta::TextDelta(t),
                    ..
                } = event.unwrap()
                {
                    text.push_str(&t);
                }
            }
            assert_eq!(text, expected);
        }
    }

    #[tokio::test]
    async fn test_mock_gateway_health_check() {
        let gateway = MockGateway::with_text("test");
        assert!(gateway.health_check().await.is_ok());
    }

    #[test]
    fn test_stream_event_is_terminal() {
        assert!(StreamEvent::MessageStop.is_terminal());
        assert!(
            StreamEvent::Error {
                message: "err".to_string()
            }
            .is_terminal()
        );
        assert!(!StreamEvent::Ping.is_terminal());
        assert!(!StreamEvent::ContentBlockStop { index: 0 }.is_terminal());
    }

    #[test]
    fn test_stream_event_is_error() {
        assert!(
            StreamEvent::Error {
                message: "oops".to_string()
            }
            .is_error()
        );
        assert!(!StreamEvent::MessageStop.is_error());
    }
}
