//! Streaming tool-call argument accumulation.
//!
//! While the model is streaming, a tool call's arguments arrive as partial
//! JSON fragments keyed by the call's output position. The call's id and
//! name are announced before any fragments, so in-flight calls are keyed by
//! position rather than identity. The arena is private to one loop
//! iteration and discarded at its end.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A tool call still being assembled from stream fragments.
#[derive(Debug, Clone)]
pub struct PendingToolCall {
    /// Output position of the call within the model turn.
    pub position: usize,
    /// Provider-assigned call id.
    pub call_id: String,
    /// Name of the requested tool.
    pub name: String,
    /// Argument fragments in arrival order.
    fragments: Vec<String>,
}

impl PendingToolCall {
    fn new(position: usize, call_id: String, name: String) -> Self {
        Self {
            position,
            call_id,
            name,
            fragments: Vec::new(),
        }
    }

    /// The fragments accumulated so far.
    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }
}

/// A tool call whose arguments have been fully reassembled and parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedToolCall {
    /// Provider-assigned call id.
    pub call_id: String,
    /// Name of the requested tool.
    pub name: String,
    /// Parsed argument object.
    pub arguments: serde_json::Value,
    /// Execution result, set after a successful invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Execution error, set after a failed invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResolvedToolCall {
    /// Whether the call executed successfully.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.result.is_some()
    }
}

/// Position-keyed arena of in-flight tool calls for one loop iteration.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    pending: BTreeMap<usize, PendingToolCall>,
}

impl ToolCallAssembler {
    /// Create an empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin assembling a call at the given output position.
    ///
    /// A second start at the same position replaces the first.
    pub fn start(&mut self, position: usize, call_id: impl Into<String>, name: impl Into<String>) {
        let call = PendingToolCall::new(position, call_id.into(), name.into());
        if self.pending.insert(position, call).is_some() {
            tracing::warn!(position, "Replacing in-flight tool call at same position");
        }
    }

    /// Append an argument fragment to the call at the given position.
    ///
    /// Returns false (and logs) if no call is in flight at that position;
    /// the fragment is dropped rather than failing the stream.
    pub fn append_fragment(&mut self, position: usize, fragment: impl Into<String>) -> bool {
        match self.pending.get_mut(&position) {
            Some(call) => {
                call.fragments.push(fragment.into());
                true
            }
            None => {
                tracing::warn!(
                    position,
                    "Dropping argument fragment with no in-flight tool call"
                );
                false
            }
        }
    }

    /// Finish the call at the given position, parsing its arguments.
    ///
    /// Returns `None` if no call is in flight at that position (e.g. the
    /// position belonged to a text block).
    pub fn complete(&mut self, position: usize) -> Option<ResolvedToolCall> {
        let call = self.pending.remove(&position)?;
        let arguments = parse_fragments(&call.fragments);
        Some(ResolvedToolCall {
            call_id: call.call_id,
            name: call.name,
            arguments,
            result: None,
            error: None,
        })
    }

    /// Number of calls still in flight.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no calls are in flight.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop all in-flight calls.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Parse concatenated argument fragments into a JSON object.
///
/// An empty fragment list parses to `{}`. Malformed JSON, or JSON that is
/// not an object, also yields `{}` (logged) — argument reconstruction must
/// never fail the request. The function is pure: the same fragments always
/// produce the same value.
pub fn parse_fragments(fragments: &[String]) -> serde_json::Value {
    let raw: String = fragments.concat();
    if raw.trim().is_empty() {
        return serde_json::Value::Object(serde_json::Map::new());
    }

    match serde_json::from_str::<serde_json::Value>(&raw) {
        Ok(value) if value.is_object() => value,
        Ok(value) => {
            tracing::warn!(
                json_type = %json_type_name(&value),
                "Tool arguments parsed to a non-object value, substituting empty object"
            );
            serde_json::Value::Object(serde_json::Map::new())
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to parse tool arguments, substituting empty object");
            serde_json::Value::Object(serde_json::Map::new())
        }
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
