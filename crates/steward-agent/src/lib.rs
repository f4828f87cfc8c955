//! Agent core for Steward.
//!
//! This crate implements the tool-calling orchestration loop behind the
//! streaming chat endpoint: the loop controller ([`Turn`]), the streaming
//! argument accumulator, the outward wire-event model ([`AgentEvent`]),
//! and the tool registry consumed by the loop.
//!
//! The controller is transport-agnostic: it pushes events through an
//! [`EventEmitter`] channel and the hosting transport serializes them.

pub mod accumulator;
pub mod audit;
pub mod context;
pub mod error;
pub mod events;
pub mod media;
pub mod tool;
pub mod transcript;
pub mod turn;
pub mod types;

pub use accumulator::{PendingToolCall, ResolvedToolCall, ToolCallAssembler, parse_fragments};
pub use audit::{AuditError, AuditSink, ToolInvocationRecord};
pub use context::{BlockKind, ContextBlock, ConversationContext};
pub use error::{AgentError, Result};
pub use events::{AgentEvent, EventEmitter};
pub use media::{MediaAnalyzer, NoopMediaAnalyzer};
pub use tool::{Tool, ToolContext, ToolError, ToolRegistry};
pub use turn::{AgentStream, Turn, TurnOutcome, TurnRequest, stream_turn};
pub use types::{
    AgentConfig, Attachment, ChatMessage, ChatRole, DEFAULT_MAX_LOOPS, SessionId, TraceId,
};
