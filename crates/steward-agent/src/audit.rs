//! Audit collaborator contract.
//!
//! Every tool invocation is reported to an [`AuditSink`] as a detached
//! task. The main control flow never awaits the sink's success; failures
//! are logged and dropped.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::SessionId;

/// Failure reported by an audit sink.
#[derive(Debug, Error)]
#[error("audit sink error: {0}")]
pub struct AuditError(pub String);

/// One recorded tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocationRecord {
    /// Session the invocation belongs to.
    pub session_id: SessionId,
    /// Tool name.
    pub tool: String,
    /// Tool category.
    pub category: String,
    /// Arguments the tool was invoked with.
    pub args: serde_json::Value,
    /// Result value, if the call succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error message, if the call failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock duration of the invocation in milliseconds.
    pub duration_ms: u64,
    /// Whether the call succeeded.
    pub success: bool,
}

/// External collaborator recording tool invocations.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record one tool invocation.
    async fn record_tool_invocation(
        &self,
        record: ToolInvocationRecord,
    ) -> std::result::Result<(), AuditError>;
}
