//! LLM Client Module
//!
//! A deliberately small surface over chat-completion providers:
//! - `ChatProvider`: the provider trait (one non-streaming call)
//! - `client`: OpenAI-compatible HTTP implementation
//! - `service`: bounded retry/timeout/arbiter wrapper with a hard call budget
//! - `mock`: scripted provider for tests and offline runs
//!
//! No vendor is special-cased. Behavior is specified by inputs, outputs,
//! budgets, and intent; prompt wording lives with the stages that call in.

pub mod client;
pub mod mock;
pub mod service;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::instrument::TokenUsage;

pub use client::OpenAiCompatProvider;
pub use mock::ScriptedProvider;
pub use service::{LlmService, LlmServiceConfig};

// ============================================================================
// Message Types
// ============================================================================

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// Request for a chat completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }
}

/// Response from a chat completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
    pub latency_ms: u64,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("model returned empty content")]
    EmptyResponse,

    #[error("call timed out after {0}s")]
    Timeout(u64),

    #[error("stage call budget exhausted ({0} calls)")]
    BudgetExhausted(u32),

    #[error("AI assistance disabled")]
    Disabled,
}

pub type Result<T> = std::result::Result<T, LlmError>;

// ============================================================================
// Provider Trait
// ============================================================================

/// A chat-completion provider. Implementations live behind an `Arc` and
/// must be safe to call concurrently.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn id(&self) -> &str;

    fn model(&self) -> &str;

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;
}
