//! Error types for the agent crate.

use thiserror::Error;

/// Result type alias using the agent error type.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Error type for agent operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Model gateway error.
    #[error("Gateway error: {0}")]
    Gateway(#[from] steward_llm::GatewayError),

    /// Tool execution error.
    #[error("Tool error: {0}")]
    Tool(String),

    /// Context building error.
    #[error("Context error: {0}")]
    Context(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// The client disconnected and the turn was abandoned.
    #[error("Turn cancelled")]
    Cancelled,
}

impl AgentError {
    /// Create a tool error.
    pub fn tool(msg: impl Into<String>) -> Self {
        Self::Tool(msg.into())
    }

    /// Create a context error.
    pub fn context(msg: impl Into<String>) -> Self {
        Self::Context(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AgentError::tool("revoke_token failed");
        assert!(err.to_string().contains("Tool error"));
        assert!(err.to_string().contains("revoke_token failed"));
    }

    #[test]
    fn test_gateway_error_conversion() {
        let err: AgentError = steward_llm::GatewayError::Network("timeout".to_string()).into();
        assert!(matches!(err, AgentError::Gateway(_)));
        assert!(err.to_string().contains("timeout"));
    }
}
