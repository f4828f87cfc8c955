//! Model gateway abstraction for Steward.
//!
//! This crate defines the contract between the orchestration loop and an
//! upstream language model: a [`ModelGateway`] streams structured
//! generation events (text fragments, tool-call lifecycle events, usage
//! accounting) for a single flattened instruction string plus a tool
//! manifest.
//!
//! Provided implementations:
//! - [`AnthropicGateway`] — streaming client for the Anthropic Messages API
//! - [`MockGateway`] — scripted gateway for deterministic tests

pub mod anthropic;
pub mod error;
pub mod gateway;
pub mod types;

pub use anthropic::{AnthropicConfig, AnthropicGateway, create_shared_gateway};
pub use error::{GatewayError, Result};
pub use gateway::{
    BlockStart, ContentDelta, EventStream, MockGateway, ModelGateway, SharedGateway, StreamEvent,
    text_turn,
};
pub use types::{GenerationRequest, StopReason, ToolDefinition, Usage};
