//! In-memory audit log.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::RwLock;

use steward_agent::{AuditError, AuditSink, ToolInvocationRecord};

/// Default bound on retained audit records.
pub const DEFAULT_MAX_RECORDS: usize = 10_000;

/// In-memory ring of tool invocation records.
///
/// Oldest records are dropped once the bound is reached. Intended for
/// local deployments and tests; production hosts supply their own sink.
pub struct MemoryAuditLog {
    records: RwLock<VecDeque<ToolInvocationRecord>>,
    max_records: usize,
}

impl MemoryAuditLog {
    /// Create a log with the default bound.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_RECORDS)
    }

    /// Create a log retaining at most `max_records` entries.
    pub fn with_capacity(max_records: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::new()),
            max_records: max_records.max(1),
        }
    }

    /// Snapshot of all retained records, oldest first.
    pub fn records(&self) -> Vec<ToolInvocationRecord> {
        self.records.read().iter().cloned().collect()
    }

    /// Number of retained records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl Default for MemoryAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditLog {
    async fn record_tool_invocation(
        &self,
        record: ToolInvocationRecord,
    ) -> std::result::Result<(), AuditError> {
        let mut records = self.records.write();
        if records.len() >= self.max_records {
            records.pop_front();
        }
        records.push_back(record);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use steward_agent::SessionId;

    fn record(tool: &str, success: bool) -> ToolInvocationRecord {
        ToolInvocationRecord {
            session_id: SessionId::new(),
            tool: tool.to_string(),
            category: "admin".to_string(),
            args: serde_json::json!({}),
            result: success.then(|| serde_json::json!({"ok": true})),
            error: (!success).then(|| "boom".to_string()),
            duration_ms: 12,
            success,
        }
    }

    #[tokio::test]
    async fn test_records_in_order() {
        let log = MemoryAuditLog::new();
        log.record_tool_invocation(record("list_users", true))
            .await
            .unwrap();
        log.record_tool_invocation(record("revoke_token", false))
            .await
            .unwrap();

        let records = log.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].tool, "list_users");
        assert!(records[0].success);
        assert_eq!(records[1].tool, "revoke_token");
        assert_eq!(records[1].error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_ring_drops_oldest() {
        let log = MemoryAuditLog::with_capacity(2);
        for name in ["a", "b", "c"] {
            log.record_tool_invocation(record(name, true)).await.unwrap();
        }

        let records = log.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].tool, "b");
        assert_eq!(records[1].tool, "c");
    }
}
