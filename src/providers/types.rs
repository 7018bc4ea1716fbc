use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Role, StreamStats};

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Cannot reach {endpoint}: {reason}")]
    ConnectionUnreachable { endpoint: String, reason: String },

    #[error("HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Response has no readable body")]
    EmptyResponseBody,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("A response is already being generated")]
    Busy,
}

impl ChatError {
    /// Failures that happened before any byte of the answer arrived.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            ChatError::ConnectionUnreachable { .. } | ChatError::HttpStatus { .. }
        )
    }

    /// Failures that cut a stream short once it was open.
    pub fn is_interruption(&self) -> bool {
        matches!(
            self,
            ChatError::StreamInterrupted(_) | ChatError::EmptyResponseBody
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl From<Role> for ChatRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => ChatRole::User,
            Role::Assistant => ChatRole::Assistant,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }
}

/// Result of draining a stream to completion.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub content: String,
    pub stats: StreamStats,
}
