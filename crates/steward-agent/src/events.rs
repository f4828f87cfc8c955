//! Wire protocol events and the ordered event emitter.
//!
//! [`AgentEvent`] is the only artifact that crosses the system boundary.
//! Events are pushed into an unbounded channel by the loop controller and
//! serialized line-by-line by the transport, preserving arrival order.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

// ─────────────────────────────────────────────────────────────────────────────
// Agent Event
// ─────────────────────────────────────────────────────────────────────────────

/// An event on the outward stream, discriminated by its `kind` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Stream opened.
    Init {
        /// Trace id for this request.
        trace_id: String,
        /// Session this request belongs to.
        session_id: String,
        /// Model that will serve the request.
        model: String,
    },
    /// Optional pre-processing notice (e.g. attachment analysis).
    Thinking {
        /// Free-text status.
        status: String,
    },
    /// A new loop iteration begins.
    LoopStart {
        /// 1-based iteration number.
        iteration: u32,
        /// The iteration bound.
        max_iterations: u32,
    },
    /// About to stream from the model gateway.
    ModelCall {
        /// Model name.
        model: String,
    },
    /// Incremental answer text.
    #[serde(rename = "t")]
    Text {
        /// The text fragment.
        text: String,
    },
    /// About to execute one or more tool calls this iteration.
    ToolsStart,
    /// About to invoke one tool.
    ToolExecuting {
        /// Tool name.
        tool: String,
        /// Tool category.
        category: String,
        /// Parsed arguments.
        args: serde_json::Value,
    },
    /// Tool succeeded.
    ToolResult {
        /// Tool name.
        tool: String,
        /// Tool category.
        category: String,
        /// Result value.
        result: serde_json::Value,
    },
    /// Tool failed (non-fatal).
    ToolError {
        /// Tool name.
        tool: String,
        /// Tool category.
        category: String,
        /// Error message.
        error: String,
    },
    /// All tool calls for this iteration finished.
    ToolsEnd,
    /// Token accounting from the model, if available.
    Usage {
        /// Input token count.
        input_tokens: u32,
        /// Output token count.
        output_tokens: u32,
    },
    /// Terminal success.
    Done {
        /// Full accumulated answer text.
        text: String,
        /// Session this request belonged to.
        session_id: String,
        /// Number of tool calls made.
        tool_calls: u32,
        /// Number of loop iterations used.
        iterations: u32,
        /// Model that served the request.
        model: String,
    },
    /// Terminal failure.
    #[serde(rename = "err")]
    Error {
        /// Error message.
        error: String,
    },
}

impl AgentEvent {
    /// Create a text-fragment event.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create a thinking event.
    pub fn thinking(status: impl Into<String>) -> Self {
        Self::Thinking {
            status: status.into(),
        }
    }

    /// Create a terminal error event.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    /// Returns true if this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    /// The wire value of this event's `kind` discriminant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::Thinking { .. } => "thinking",
            Self::LoopStart { .. } => "loop_start",
            Self::ModelCall { .. } => "model_call",
            Self::Text { .. } => "t",
            Self::ToolsStart => "tools_start",
            Self::ToolExecuting { .. } => "tool_executing",
            Self::ToolResult { .. } => "tool_result",
            Self::ToolError { .. } => "tool_error",
            Self::ToolsEnd => "tools_end",
            Self::Usage { .. } => "usage",
            Self::Done { .. } => "done",
            Self::Error { .. } => "err",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Event Emitter
// ─────────────────────────────────────────────────────────────────────────────

/// Ordered writer from the loop controller to the transport.
///
/// Guarantees:
/// - events are delivered in emit order (single unbounded channel);
/// - at most one terminal event passes through; everything after it is
///   refused;
/// - once the consumer side is gone, emits become no-ops and
///   [`EventEmitter::is_open`] turns false so the controller can stop.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: mpsc::UnboundedSender<AgentEvent>,
    finished: Arc<AtomicBool>,
}

impl EventEmitter {
    /// Create an emitter and the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                finished: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    /// Emit one event. Returns true if the event was accepted.
    pub fn emit(&self, event: AgentEvent) -> bool {
        if self.finished.load(Ordering::Acquire) {
            return false;
        }

        let terminal = event.is_terminal();
        if self.tx.send(event).is_err() {
            // Consumer dropped: the connection is gone, go inert.
            self.finished.store(true, Ordering::Release);
            return false;
        }
        if terminal {
            self.finished.store(true, Ordering::Release);
        }
        true
    }

    /// Whether the emitter will still accept events.
    pub fn is_open(&self) -> bool {
        !self.finished.load(Ordering::Acquire) && !self.tx.is_closed()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_names() {
        assert_eq!(AgentEvent::text("x").kind(), "t");
        assert_eq!(AgentEvent::error("x").kind(), "err");
        assert_eq!(AgentEvent::ToolsStart.kind(), "tools_start");
        assert_eq!(
            AgentEvent::LoopStart {
                iteration: 1,
                max_iterations: 5
            }
            .kind(),
            "loop_start"
        );
    }

    #[test]
    fn test_event_serialization_uses_kind_tag() {
        let json = serde_json::to_string(&AgentEvent::text("hello")).unwrap();
        assert!(json.contains("\"kind\":\"t\""));
        assert!(json.contains("\"text\":\"hello\""));

        let json = serde_json::to_string(&AgentEvent::error("boom")).unwrap();
        assert!(json.contains("\"kind\":\"err\""));

        let json = serde_json::to_string(&AgentEvent::ToolExecuting {
            tool: "list_users".to_string(),
            category: "admin".to_string(),
            args: serde_json::json!({"org": "acme"}),
        })
        .unwrap();
        assert!(json.contains("\"kind\":\"tool_executing\""));
        assert!(json.contains("\"org\":\"acme\""));
    }

    #[test]
    fn test_event_roundtrip() {
        let event = AgentEvent::Done {
            text: "done".to_string(),
            session_id: "s1".to_string(),
            tool_calls: 3,
            iterations: 2,
            model: "m".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let restored: AgentEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            restored,
            AgentEvent::Done { tool_calls: 3, iterations: 2, .. }
        ));
    }

    #[test]
    fn test_is_terminal() {
        assert!(AgentEvent::error("x").is_terminal());
        assert!(
            AgentEvent::Done {
                text: String::new(),
                session_id: String::new(),
                tool_calls: 0,
                iterations: 1,
                model: String::new(),
            }
            .is_terminal()
        );
        assert!(!AgentEvent::text("x").is_terminal());
        assert!(!AgentEvent::ToolsEnd.is_terminal());
    }

    #[tokio::test]
    async fn test_emitter_preserves_order() {
        let (emitter, mut rx) = EventEmitter::channel();
        assert!(emitter.emit(AgentEvent::text("a")));
        assert!(emitter.emit(AgentEvent::text("b")));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(matches!(first, AgentEvent::Text { text } if text == "a"));
        assert!(matches!(second, AgentEvent::Text { text } if text == "b"));
    }

    #[tokio::test]
    async fn test_emitter_refuses_after_terminal() {
        let (emitter, mut rx) = EventEmitter::channel();
        assert!(emitter.emit(AgentEvent::error("fatal")));
        assert!(!emitter.emit(AgentEvent::text("late")));
        assert!(!emitter.emit(AgentEvent::error("second terminal")));
        assert!(!emitter.is_open());

        let only = rx.recv().await.unwrap();
        assert!(matches!(only, AgentEvent::Error { .. }));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_emitter_inert_after_receiver_dropped() {
        let (emitter, rx) = EventEmitter::channel();
        drop(rx);

        assert!(!emitter.emit(AgentEvent::text("into the void")));
        assert!(!emitter.is_open());
    }
}
