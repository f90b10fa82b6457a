//! Model provider interface.
//!
//! The provider call is a remote RPC boundary with latency and failure modes
//! of its own, so it lives behind the [`ModelProvider`] capability trait; the
//! repair loop and the tests substitute deterministic stubs for it.

pub mod openai;

use thiserror::Error;

/// Errors that can occur while talking to the model provider.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Error returned by the provider's API.
    #[error("API error: {0}")]
    Api(String),
    /// Error during network communication.
    #[error("network error: {0}")]
    Network(String),
    /// The request exceeded the configured timeout.
    #[error("provider request timed out after {0}s")]
    Timeout(u64),
    /// Missing provider configuration or API key.
    #[error("missing provider configuration: {0}")]
    MissingConfig(String),
    /// The provider answered with no usable content.
    #[error("empty response from model")]
    EmptyReply,
}

impl LlmError {
    /// Transport-level failures are never retried by the repair loop;
    /// re-asking the model cannot make the network work.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }
}

/// A message in a model conversation.
#[derive(Debug, Clone)]
pub struct Message {
    /// Role of the message sender (system, user, assistant).
    pub role: String,
    /// Text content of the message.
    pub content: String,
}

impl Message {
    /// Create a new system message.
    #[must_use]
    pub fn system(content: &str) -> Self {
        Self {
            role: "system".to_string(),
            content: content.to_string(),
        }
    }

    /// Create a new user message.
    #[must_use]
    pub fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: content.to_string(),
        }
    }

    /// Create a new assistant message.
    #[must_use]
    pub fn assistant(content: &str) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.to_string(),
        }
    }
}

/// Interface to a chat-completion model provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ModelProvider: Send + Sync {
    /// Send a conversation and return the model's raw text reply.
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;
}
