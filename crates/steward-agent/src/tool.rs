//! Tool framework for host-supplied capabilities.
//!
//! The loop controller treats tools as opaque async capabilities: a name,
//! a category, a JSON-schema parameter description, and an `invoke` that
//! either returns a JSON value or fails with a [`ToolError`]. Tool
//! semantics are the host's business; the controller performs no
//! validation, assumes no idempotency, and never retries.
//!
//! # Example
//!
//! ```rust,ignore
//! use steward_agent::{Tool, ToolContext, ToolError, ToolRegistry};
//!
//! struct ListUsers;
//!
//! #[async_trait]
//! impl Tool for ListUsers {
//!     fn name(&self) -> &str { "list_users" }
//!     fn category(&self) -> &str { "users" }
//!     fn description(&self) -> &str { "List users in an organization" }
//!     fn parameters(&self) -> Value { json!({"type": "object"}) }
//!
//!     async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
//!         Ok(json!([]))
//!     }
//! }
//!
//! let mut registry = ToolRegistry::new();
//! registry.register(ListUsers);
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::types::{SessionId, TraceId};

// ─────────────────────────────────────────────────────────────────────────────
// Tool Error
// ─────────────────────────────────────────────────────────────────────────────

/// Failure of a single tool invocation.
///
/// All failure modes — unknown tool, invalid arguments, downstream
/// exceptions — are represented uniformly; the loop treats each as a
/// recoverable per-call error.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ToolError {
    /// Human-readable failure description.
    pub message: String,
}

impl ToolError {
    /// Create a new tool error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Trait for host-supplied tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the unique name of this tool.
    fn name(&self) -> &str;

    /// Get the category of this tool (opaque string surfaced in events).
    fn category(&self) -> &str {
        "general"
    }

    /// Get a human-readable description of what this tool does.
    fn description(&self) -> &str;

    /// Get the JSON Schema for this tool's parameters.
    fn parameters(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> std::result::Result<serde_json::Value, ToolError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool Context
// ─────────────────────────────────────────────────────────────────────────────

/// Context provided to tools during execution.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Session this invocation belongs to.
    pub session_id: SessionId,
    /// Trace id of the request driving the invocation.
    pub trace_id: TraceId,
    /// Token to check for cancellation.
    pub cancellation: CancellationToken,
}

impl ToolContext {
    /// Create a new tool context.
    pub fn new(session_id: SessionId, trace_id: TraceId) -> Self {
        Self {
            session_id,
            trace_id,
            cancellation: CancellationToken::new(),
        }
    }

    /// Create a context with a cancellation token.
    pub fn with_cancellation(
        session_id: SessionId,
        trace_id: TraceId,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            session_id,
            trace_id,
            cancellation,
        }
    }

    /// Check if execution has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

impl Default for ToolContext {
    fn default() -> Self {
        Self::new(SessionId::new(), TraceId::new())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Registry mapping tool names to invocation capabilities.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool.
    ///
    /// If a tool with the same name already exists, it will be replaced.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    /// Register a tool from an Arc.
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Check if a tool exists.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Get all tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Get the number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// The category of a tool, or "unknown" for unregistered names.
    pub fn category_of(&self, name: &str) -> String {
        self.tools
            .get(name)
            .map(|tool| tool.category().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Convert all tools to a gateway tool manifest.
    pub fn manifest(&self) -> Vec<steward_llm::ToolDefinition> {
        self.tools
            .values()
            .map(|tool| {
                steward_llm::ToolDefinition::new(tool.name(), tool.description(), tool.parameters())
            })
            .collect()
    }

    /// Invoke a tool by name.
    ///
    /// An unknown tool name fails the same way any tool failure does.
    pub async fn invoke(
        &self,
        name: &str,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> std::result::Result<serde_json::Value, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::new(format!("unknown tool: {}", name)))?;

        tool.execute(args, ctx).await
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Mock Tool (for testing)
// ─────────────────────────────────────────────────────────────────────────────

/// A mock tool for testing.
///
/// Returns a configurable response and tracks calls for verification.
#[cfg(test)]
pub(crate) struct MockTool {
    name: String,
    category: String,
    response: std::sync::Mutex<std::result::Result<serde_json::Value, ToolError>>,
    calls: std::sync::Mutex<Vec<serde_json::Value>>,
}

#[cfg(test)]
impl MockTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: "mock".to_string(),
            response: std::sync::Mutex::new(Ok(serde_json::json!({"ok": true}))),
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_response(self, response: serde_json::Value) -> Self {
        *self.response.lock().unwrap() = Ok(response);
        self
    }

    pub fn with_failure(self, message: impl Into<String>) -> Self {
        *self.response.lock().unwrap() = Err(ToolError::new(message));
        self
    }

    pub fn calls(&self) -> Vec<serde_json::Value> {
        self.calls.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl Tool for MockTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn category(&self) -> &str {
        &self.category
    }

    fn description(&self) -> &str {
        "A mock tool for testing"
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ToolContext,
    ) -> std::result::Result<serde_json::Value, ToolError> {
        self.calls.lock().unwrap().push(args);
        self.response.lock().unwrap().clone()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
