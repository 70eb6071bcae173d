//! Bounded LLM Service
//!
//! The one way stages talk to a model. Enforces, per stage:
//! - a hard `max_calls` budget (exhaustion is an expected error, the
//!   caller falls back to its deterministic path),
//! - a per-call timeout,
//! - one automatic retry on empty or malformed output,
//! - at most one arbiter escalation to a stronger model,
//! - a concurrency cap for fan-out over independent items.
//!
//! JSON extraction tolerates code fences and leading prose; the schema the
//! caller expects is expressed as the `serde` target type.

use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::{ChatProvider, ChatRequest, ChatResponse, LlmError, Result};
use crate::core::instrument::StageMeter;

/// Tunables for one stage's service handle.
#[derive(Debug, Clone)]
pub struct LlmServiceConfig {
    pub max_calls: u32,
    pub call_timeout_secs: u64,
    pub concurrency: usize,
}

impl Default for LlmServiceConfig {
    fn default() -> Self {
        Self {
            max_calls: 64,
            call_timeout_secs: 120,
            concurrency: 4,
        }
    }
}

/// Bounded, retried access to a primary provider with an optional arbiter.
pub struct LlmService {
    primary: Arc<dyn ChatProvider>,
    arbiter: Option<Arc<dyn ChatProvider>>,
    config: LlmServiceConfig,
    calls_made: AtomicU32,
    semaphore: Semaphore,
}

impl LlmService {
    pub fn new(
        primary: Arc<dyn ChatProvider>,
        arbiter: Option<Arc<dyn ChatProvider>>,
        config: LlmServiceConfig,
    ) -> Self {
        let permits = config.concurrency.max(1);
        Self {
            primary,
            arbiter,
            config,
            calls_made: AtomicU32::new(0),
            semaphore: Semaphore::new(permits),
        }
    }

    /// Calls made so far (primary + arbiter).
    pub fn calls_made(&self) -> u32 {
        self.calls_made.load(Ordering::Relaxed)
    }

    pub fn remaining_budget(&self) -> u32 {
        self.config.max_calls.saturating_sub(self.calls_made())
    }

    /// One raw call against a provider, budget- and timeout-guarded.
    async fn call(
        &self,
        provider: &Arc<dyn ChatProvider>,
        request: ChatRequest,
    ) -> Result<ChatResponse> {
        let max_calls = self.config.max_calls;
        let allowed = self
            .calls_made
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |count| {
                (count < max_calls).then_some(count + 1)
            })
            .is_ok();
        if !allowed {
            return Err(LlmError::BudgetExhausted(max_calls));
        }
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| LlmError::Disabled)?;
        let timeout = Duration::from_secs(self.config.call_timeout_secs);
        match tokio::time::timeout(timeout, provider.chat(request)).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout(self.config.call_timeout_secs)),
        }
    }

    /// Ask for a JSON document matching `T`.
    ///
    /// Retry ladder: primary → primary once more (on empty/malformed) →
    /// arbiter once (if configured) → error. The caller is expected to fall
    /// back deterministically on any error.
    pub async fn complete_json<T: DeserializeOwned>(
        &self,
        request: ChatRequest,
        meter: &StageMeter,
    ) -> Result<T> {
        let mut last_err = None;

        for attempt in 0..2u8 {
            match self.call(&self.primary, request.clone()).await {
                Ok(resp) => {
                    meter.record_call(resp.usage, attempt > 0);
                    match parse_json_content::<T>(&resp.content) {
                        Ok(parsed) => return Ok(parsed),
                        Err(e) => {
                            debug!(attempt, error = %e, "model output failed to parse");
                            last_err = Some(e);
                        }
                    }
                }
                Err(e @ LlmError::BudgetExhausted(_)) | Err(e @ LlmError::Disabled) => {
                    return Err(e);
                }
                Err(e) => {
                    meter.record_call(None, attempt > 0);
                    debug!(attempt, error = %e, "model call failed");
                    last_err = Some(e);
                }
            }
        }

        if let Some(arbiter) = &self.arbiter {
            warn!(model = arbiter.model(), "escalating to arbiter model");
            match self.call(arbiter, request).await {
                Ok(resp) => {
                    meter.record_call(resp.usage, true);
                    if let Ok(parsed) = parse_json_content::<T>(&resp.content) {
                        return Ok(parsed);
                    }
                    last_err = Some(LlmError::InvalidResponse(
                        "arbiter output failed to parse".to_string(),
                    ));
                }
                Err(e) => {
                    meter.record_call(None, true);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or(LlmError::EmptyResponse))
    }
}

/// Pull a JSON value out of model text: raw JSON, fenced JSON, or JSON
/// embedded after prose. The first `{` or `[` to the matching close wins.
pub fn parse_json_content<T: DeserializeOwned>(content: &str) -> Result<T> {
    let trimmed = content.trim();

    // Fast path: the whole message is JSON.
    if let Ok(parsed) = serde_json::from_str(trimmed) {
        return Ok(parsed);
    }

    // Fenced block.
    if let Some(inner) = extract_fenced(trimmed) {
        if let Ok(parsed) = serde_json::from_str(inner.trim()) {
            return Ok(parsed);
        }
    }

    // First balanced JSON object/array in the text.
    if let Some(slice) = first_json_slice(trimmed) {
        if let Ok(parsed) = serde_json::from_str(slice) {
            return Ok(parsed);
        }
    }

    Err(LlmError::InvalidResponse(format!(
        "no parseable JSON in {} chars of model output",
        content.len()
    )))
}

fn extract_fenced(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    let body_start = after.find('\n')? + 1;
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(&body[..end])
}

fn first_json_slice(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let bytes = text.as_bytes();
    let open = bytes[start];
    let close = if open == b'{' { b'}' } else { b']' };
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b if b == open => depth += 1,
            b if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::llm::mock::ScriptedProvider;
    use crate::core::llm::ChatMessage;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        ok: bool,
    }

    fn request() -> ChatRequest {
        ChatRequest::new(vec![ChatMessage::user("classify")])
    }

    #[test]
    fn test_parse_raw_json() {
        let v: Verdict = parse_json_content("{\"ok\": true}").unwrap();
        assert!(v.ok);
    }

    #[test]
    fn test_parse_fenced_json() {
        let content = "Here you go:\n```json\n{\"ok\": false}\n```\nDone.";
        let v: Verdict = parse_json_content(content).unwrap();
        assert!(!v.ok);
    }

    #[test]
    fn test_parse_embedded_json_with_nested_braces() {
        let content = "Result: {\"ok\": true} trailing {junk";
        let v: Verdict = parse_json_content(content).unwrap();
        assert!(v.ok);
    }

    #[test]
    fn test_parse_json_inside_string_braces() {
        #[derive(Deserialize)]
        struct S {
            text: String,
        }
        let content = "{\"text\": \"a } inside\"}";
        let s: S = parse_json_content::<S>(content).unwrap();
        assert_eq!(s.text, "a } inside");
    }

    #[test]
    fn test_parse_rejects_prose() {
        assert!(parse_json_content::<Verdict>("no json here").is_err());
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let provider = Arc::new(ScriptedProvider::new(
            "mock",
            vec!["not json".to_string(), "{\"ok\": true}".to_string()],
        ));
        let service = LlmService::new(provider, None, LlmServiceConfig::default());
        let meter = StageMeter::new();
        let v: Verdict = service.complete_json(request(), &meter).await.unwrap();
        assert!(v.ok);
        assert_eq!(service.calls_made(), 2);
    }

    #[tokio::test]
    async fn test_arbiter_used_after_two_primary_failures() {
        let primary = Arc::new(ScriptedProvider::new(
            "mock",
            vec!["garbage".to_string(), "garbage".to_string()],
        ));
        let arbiter = Arc::new(ScriptedProvider::new(
            "arbiter",
            vec!["{\"ok\": true}".to_string()],
        ));
        let service = LlmService::new(primary, Some(arbiter), LlmServiceConfig::default());
        let meter = StageMeter::new();
        let v: Verdict = service.complete_json(request(), &meter).await.unwrap();
        assert!(v.ok);
        assert_eq!(service.calls_made(), 3);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_is_expected_error() {
        let provider = Arc::new(ScriptedProvider::new(
            "mock",
            vec!["{\"ok\": true}".to_string(); 4],
        ));
        let config = LlmServiceConfig {
            max_calls: 1,
            ..Default::default()
        };
        let service = LlmService::new(provider, None, config);
        let meter = StageMeter::new();
        let _: Verdict = service.complete_json(request(), &meter).await.unwrap();
        let err = service
            .complete_json::<Verdict>(request(), &meter)
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::BudgetExhausted(1)));
    }
}
