//! Scripted Provider
//!
//! Returns canned responses in order; records every request it saw. Used by
//! unit/integration tests and by offline recipe runs that want the AI code
//! paths exercised without a live endpoint. When the script runs out it
//! reports an empty response, which the service layer treats as a transient
//! failure.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Instant;

use super::{ChatProvider, ChatRequest, ChatResponse, LlmError, Result};

pub struct ScriptedProvider {
    id: String,
    responses: Mutex<std::collections::VecDeque<String>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    pub fn new(id: impl Into<String>, responses: Vec<String>) -> Self {
        Self {
            id: id.into(),
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests received so far, in order.
    pub fn seen_requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().expect("mock lock").clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().expect("mock lock").len()
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let started = Instant::now();
        self.requests.lock().expect("mock lock").push(request);
        let next = self.responses.lock().expect("mock lock").pop_front();
        match next {
            Some(content) if !content.trim().is_empty() => Ok(ChatResponse {
                content,
                model: "scripted".to_string(),
                usage: None,
                latency_ms: started.elapsed().as_millis() as u64,
            }),
            _ => Err(LlmError::EmptyResponse),
        }
    }
}
