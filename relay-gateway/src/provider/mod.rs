//! Completion provider abstraction.
//!
//! The relay talks to the upstream completion API only through [`Provider`],
//! so handlers can be exercised against scripted providers in tests.

mod openai;

pub use openai::OpenAIProvider;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use relay_common::Error;
use serde::{Deserialize, Serialize};

// ============================================================================
// Provider Trait
// ============================================================================

/// Incremental reply fragments, in arrival order.
pub type FragmentStream = BoxStream<'static, Result<String, ProviderError>>;

/// Unified interface for completion providers.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &str;

    /// Send a chat completion request and wait for the full reply.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError>;

    /// Send a chat completion request and receive the reply incrementally.
    ///
    /// Errors that happen before the upstream accepted the request are
    /// returned directly; later failures arrive as stream items.
    async fn chat_stream(&self, request: ChatRequest) -> Result<FragmentStream, ProviderError>;
}

/// Error from a provider.
#[derive(Debug, Clone)]
pub struct ProviderError {
    pub provider: String,
    pub model: String,
    pub message: String,
    pub status_code: Option<u16>,
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}:{}] {}", self.provider, self.model, self.message)
    }
}

impl std::error::Error for ProviderError {}

impl From<ProviderError> for Error {
    fn from(err: ProviderError) -> Self {
        Error::Upstream {
            status: err.status_code,
            message: err.to_string(),
        }
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }
}

/// Unified chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Model to use
    pub model: String,
    /// Messages in the conversation, system prompt included
    pub messages: Vec<Message>,
}

/// Unified chat response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Provider name
    pub provider: String,
    /// Model used
    pub model: String,
    /// Response content
    pub content: String,
    /// Token usage
    pub usage: TokenUsage,
    /// Finish reason
    pub finish_reason: Option<String>,
    /// Response latency in milliseconds
    pub latency_ms: u64,
}

/// Token usage information.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
}
