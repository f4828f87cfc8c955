//! Conversation context handling.
//!
//! The context is an ordered, append-only list of text blocks flattened
//! into one instruction string per model call. It is never mutated in
//! place: each loop iteration derives a new value via [`ConversationContext::with_block`].

use crate::types::{ChatMessage, ChatRole};

/// The kind of a context block, used to label it in the flattened string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// System instructions from the inbound history.
    System,
    /// A user turn.
    User,
    /// An assistant turn.
    Assistant,
    /// A synthesized transcript of tool results from one loop iteration.
    ToolTranscript,
    /// A media-derived description of an attachment.
    Media,
}

impl BlockKind {
    fn label(&self) -> &'static str {
        match self {
            BlockKind::System => "System",
            BlockKind::User => "User",
            BlockKind::Assistant => "Assistant",
            BlockKind::ToolTranscript => "Tool results",
            BlockKind::Media => "Attachment description",
        }
    }
}

/// One block of context text.
#[derive(Debug, Clone)]
pub struct ContextBlock {
    /// What kind of block this is.
    pub kind: BlockKind,
    /// The block text, carried verbatim.
    pub text: String,
}

/// An ordered, append-only conversation context.
#[derive(Debug, Clone, Default)]
pub struct ConversationContext {
    blocks: Vec<ContextBlock>,
}

impl ConversationContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self { blocks: Vec::new() }
    }

    /// Build a context from an inbound message history.
    pub fn from_history(messages: &[ChatMessage]) -> Self {
        let blocks = messages
            .iter()
            .map(|message| ContextBlock {
                kind: match message.role {
                    ChatRole::System => BlockKind::System,
                    ChatRole::User => BlockKind::User,
                    ChatRole::Assistant => BlockKind::Assistant,
                },
                text: message.content.clone(),
            })
            .collect();
        Self { blocks }
    }

    /// Derive a new context with one more block appended.
    pub fn with_block(&self, kind: BlockKind, text: impl Into<String>) -> Self {
        let mut blocks = self.blocks.clone();
        blocks.push(ContextBlock {
            kind,
            text: text.into(),
        });
        Self { blocks }
    }

    /// The blocks in order.
    pub fn blocks(&self) -> &[ContextBlock] {
        &self.blocks
    }

    /// Number of blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the context has no blocks.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Flatten the context into a single instruction string.
    ///
    /// Blocks appear in order, each under its role label.
    pub fn flatten(&self) -> String {
        let mut out = String::new();
        for block in &self.blocks {
            if !out.is_empty() {
                out.push_str("\n\n");
            }
            out.push_str(block.kind.label());
            out.push_str(":\n");
            out.push_str(&block.text);
        }
        out
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
