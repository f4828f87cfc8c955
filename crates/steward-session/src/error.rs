//! Error types for session store operations.

/// Error type for session store operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Session was not found.
    #[error("Session not found: {0}")]
    NotFound(String),

    /// Internal store error.
    #[error("Session store error: {0}")]
    Internal(String),
}

/// Result type for session store operations.
pub type Result<T> = std::result::Result<T, SessionError>;
