//! HTTP route handlers.

pub mod chat;
pub mod health;

pub use chat::{ChatStreamRequest, chat_stream_handler};
pub use health::{HealthResponse, health_routes};
