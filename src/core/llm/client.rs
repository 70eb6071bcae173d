//! OpenAI-Compatible Chat Provider
//!
//! Speaks the `/chat/completions` dialect most gateways expose. The
//! pipeline treats the endpoint as a commodity: base URL, API key, model
//! name. Nothing vendor-specific leaks past this file.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Instant;

use super::{ChatProvider, ChatRequest, ChatResponse, LlmError, Result};
use crate::core::instrument::TokenUsage;

/// Chat provider for any OpenAI-compatible endpoint.
pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(
        id: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Same endpoint and key, different model — used for arbiter escalation.
    pub fn with_model(&self, model: impl Into<String>) -> Self {
        Self {
            id: self.id.clone(),
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            model: model.into(),
            client: self.client.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompletionEnvelope {
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<UsageEnvelope>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageEnvelope {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[async_trait]
impl ChatProvider for OpenAiCompatProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut body = json!({
            "model": self.model,
            "messages": request.messages,
        });
        if let Some(t) = request.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(m) = request.max_tokens {
            body["max_tokens"] = json!(m);
        }

        let started = Instant::now();
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: CompletionEnvelope = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let content = envelope
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }

        Ok(ChatResponse {
            content,
            model: self.model.clone(),
            usage: envelope
                .usage
                .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens)),
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }
}
