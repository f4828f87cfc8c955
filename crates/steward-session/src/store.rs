//! Session store with LRU eviction and TTL support.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use steward_agent::{ChatRole, SessionId};

use crate::error::{Result, SessionError};

/// Default maximum number of sessions to cache.
pub const DEFAULT_MAX_SESSIONS: usize = 10_000;

/// Default per-session message history bound.
pub const DEFAULT_MAX_MESSAGES: usize = 200;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for the in-memory session store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum number of sessions before LRU eviction.
    pub max_sessions: usize,

    /// Optional time-to-live for idle sessions.
    pub ttl: Option<Duration>,

    /// Maximum messages retained per session (oldest dropped first).
    pub max_messages: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_sessions: DEFAULT_MAX_SESSIONS,
            ttl: None,
            max_messages: DEFAULT_MAX_MESSAGES,
        }
    }
}

impl StoreConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of sessions to cache.
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    /// Set the TTL for idle sessions.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Set the per-session message bound.
    pub fn with_max_messages(mut self, max: usize) -> Self {
        self.max_messages = max;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Store Trait
// ─────────────────────────────────────────────────────────────────────────────

/// A message retained in a session's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Author role.
    pub role: ChatRole,
    /// Message text.
    pub content: String,
    /// Optional structured metadata (tool-call counts, trace ids, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// When the message was recorded.
    pub recorded_at: DateTime<Utc>,
}

/// External collaborator owning conversation sessions.
///
/// Calls are fire-and-forget from the orchestrator's point of view:
/// failures are logged by the caller, never surfaced to the client.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Resolve a session id, creating or adopting one as needed.
    async fn ensure_session(&self, actor: Option<&str>, existing: Option<SessionId>) -> SessionId;

    /// Append one message to a session's history.
    async fn record_message(
        &self,
        session_id: SessionId,
        role: ChatRole,
        content: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory implementation
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct SessionEntry {
    actor: Option<String>,
    messages: Vec<StoredMessage>,
    last_touched: Instant,
}

impl SessionEntry {
    fn new(actor: Option<&str>) -> Self {
        Self {
            actor: actor.map(String::from),
            messages: Vec::new(),
            last_touched: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Option<Duration>) -> bool {
        match ttl {
            Some(ttl) => self.last_touched.elapsed() > ttl,
            None => false,
        }
    }
}

/// In-memory session store with LRU eviction and optional TTL.
pub struct MemorySessionStore {
    inner: Arc<RwLock<LruCache<SessionId, SessionEntry>>>,
    config: StoreConfig,
}

impl MemorySessionStore {
    /// Create a new store with the given configuration.
    pub fn new(config: StoreConfig) -> Self {
        let cap =
            NonZeroUsize::new(config.max_sessions).unwrap_or_else(|| NonZeroUsize::new(1).unwrap());
        Self {
            inner: Arc::new(RwLock::new(LruCache::new(cap))),
            config,
        }
    }

    /// The store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Current number of cached sessions.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Whether the store holds no sessions.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Snapshot of a session's history, if present.
    pub async fn history(&self, session_id: SessionId) -> Option<Vec<StoredMessage>> {
        self.inner
            .read()
            .await
            .peek(&session_id)
            .map(|entry| entry.messages.clone())
    }

    /// The actor associated with a session, if any.
    pub async fn actor(&self, session_id: SessionId) -> Option<String> {
        self.inner
            .read()
            .await
            .peek(&session_id)
            .and_then(|entry| entry.actor.clone())
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn ensure_session(&self, actor: Option<&str>, existing: Option<SessionId>) -> SessionId {
        let mut inner = self.inner.write().await;

        if let Some(id) = existing {
            let expired = inner
                .peek(&id)
                .map(|entry| entry.is_expired(self.config.ttl))
                .unwrap_or(false);
            if expired {
                debug!(session_id = %id, "Session expired, starting a fresh entry under the same id");
                inner.pop(&id);
            }

            match inner.get_mut(&id) {
                Some(entry) => {
                    entry.last_touched = Instant::now();
                    trace!(session_id = %id, "Existing session touched");
                }
                None => {
                    // Adopt the caller-provided id: history lives elsewhere.
                    inner.put(id, SessionEntry::new(actor));
                    debug!(session_id = %id, "Adopted caller-provided session id");
                }
            }
            return id;
        }

        let id = SessionId::new();
        inner.put(id, SessionEntry::new(actor));
        debug!(session_id = %id, cache_size = inner.len(), "Created session");
        id
    }

    async fn record_message(
        &self,
        session_id: SessionId,
        role: ChatRole,
        content: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;

        if !inner.contains(&session_id) {
            // The session may have been evicted between ensure and
            // record; recreate rather than lose the message.
            debug!(session_id = %session_id, "Recording into a session not in cache, recreating");
            inner.put(session_id, SessionEntry::new(None));
        }
        let entry = inner
            .get_mut(&session_id)
            .ok_or_else(|| SessionError::Internal("session vanished after insert".into()))?;

        entry.last_touched = Instant::now();
        entry.messages.push(StoredMessage {
            role,
            content: content.to_string(),
            metadata,
            recorded_at: Utc::now(),
        });

        let overflow = entry.messages.len().saturating_sub(self.config.max_messages);
        if overflow > 0 {
            entry.messages.drain(..overflow);
        }

        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ensure_session_creates_and_reuses() {
        let store = MemorySessionStore::default();

        let id = store.ensure_session(Some("ops@acme"), None).await;
        assert_eq!(store.len().await, 1);
        assert_eq!(store.actor(id).await.as_deref(), Some("ops@acme"));

        let same = store.ensure_session(None, Some(id)).await;
        assert_eq!(id, same);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_ensure_session_adopts_unknown_id() {
        let store = MemorySessionStore::default();
        let foreign = SessionId::new();

        let id = store.ensure_session(None, Some(foreign)).await;
        assert_eq!(id, foreign);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_record_message_appends_in_order() {
        let store = MemorySessionStore::default();
        let id = store.ensure_session(None, None).await;

        store
            .record_message(id, ChatRole::User, "list users", None)
            .await
            .unwrap();
        store
            .record_message(
                id,
                ChatRole::Assistant,
                "There are 3 users.",
                Some(serde_json::json!({"tool_calls": 1})),
            )
            .await
            .unwrap();

        let history = store.history(id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, ChatRole::User);
        assert_eq!(history[1].content, "There are 3 users.");
        assert!(history[1].metadata.is_some());
    }

    #[tokio::test]
    async fn test_record_message_bounds_history() {
        let store = MemorySessionStore::new(StoreConfig::new().with_max_messages(2));
        let id = store.ensure_session(None, None).await;

        for i in 0..5 {
            store
                .record_message(id, ChatRole::User, &format!("msg {}", i), None)
                .await
                .unwrap();
        }

        let history = store.history(id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "msg 3");
        assert_eq!(history[1].content, "msg 4");
    }

    #[tokio::test]
    async fn test_lru_eviction_at_capacity() {
        let store = MemorySessionStore::new(StoreConfig::new().with_max_sessions(2));

        let first = store.ensure_session(None, None).await;
        let _second = store.ensure_session(None, None).await;
        let _third = store.ensure_session(None, None).await;

        assert_eq!(store.len().await, 2);
        assert!(store.history(first).await.is_none());
    }

    #[tokio::test]
    async fn test_ttl_expiry_resets_session() {
        let store = MemorySessionStore::new(StoreConfig::new().with_ttl(Duration::from_millis(10)));
        let id = store.ensure_session(None, None).await;
        store
            .record_message(id, ChatRole::User, "hello", None)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;

        let same = store.ensure_session(None, Some(id)).await;
        assert_eq!(same, id);
        // Expired entry was dropped; the adopted one starts empty
        assert!(store.history(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_into_evicted_session_recreates() {
        let store = MemorySessionStore::new(StoreConfig::new().with_max_sessions(1));
        let first = store.ensure_session(None, None).await;
        let _second = store.ensure_session(None, None).await; // evicts first

        store
            .record_message(first, ChatRole::Assistant, "late write", None)
            .await
            .unwrap();
        assert_eq!(store.history(first).await.unwrap().len(), 1);
    }
}
