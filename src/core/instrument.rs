//! Pipeline Instrumentation
//!
//! Per-stage timings and AI usage, accumulated into `instrumentation.json`
//! incrementally as stages finish — never recomputed downstream.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

use super::artifact::{self, Result};

// ============================================================================
// Token Usage
// ============================================================================

/// Token usage for one request/response, when the provider reports it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

// ============================================================================
// Stage Metrics
// ============================================================================

/// What one stage execution cost.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageMetrics {
    pub duration_ms: u64,
    pub api_calls: u32,
    pub api_retries: u32,
    pub usage: TokenUsage,
    pub items_processed: u64,
    pub warnings: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Thread-safe per-stage accumulator handed to a running stage.
#[derive(Debug, Default)]
pub struct StageMeter {
    inner: Mutex<StageMetrics>,
}

impl StageMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_call(&self, usage: Option<TokenUsage>, retried: bool) {
        let mut m = self.inner.lock().expect("meter lock");
        m.api_calls += 1;
        if retried {
            m.api_retries += 1;
        }
        if let Some(u) = usage {
            m.usage.add(&u);
        }
    }

    pub fn record_items(&self, count: u64) {
        self.inner.lock().expect("meter lock").items_processed += count;
    }

    pub fn record_warning(&self) {
        self.inner.lock().expect("meter lock").warnings += 1;
    }

    /// Snapshot with the final duration filled in.
    pub fn finish(&self, duration_ms: u64) -> StageMetrics {
        let mut m = self.inner.lock().expect("meter lock").clone();
        m.duration_ms = duration_ms;
        m.finished_at = Some(Utc::now());
        m
    }
}

// ============================================================================
// Cumulative Instrumentation File
// ============================================================================

/// The `instrumentation.json` document. Stage order is insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Instrumentation {
    #[serde(default)]
    pub stages: IndexMap<String, StageMetrics>,
}

impl Instrumentation {
    /// Load the existing file (or empty), merge one stage's metrics, and
    /// write it back atomically.
    pub fn record(path: &Path, stage_id: &str, metrics: StageMetrics) -> Result<()> {
        let mut doc = if path.exists() {
            artifact::read_json::<Instrumentation>(path)?
        } else {
            Instrumentation::default()
        };
        doc.stages.insert(stage_id.to_string(), metrics);
        artifact::write_json(path, &doc)
    }

    pub fn total_api_calls(&self) -> u32 {
        self.stages.values().map(|m| m.api_calls).sum()
    }

    pub fn total_usage(&self) -> TokenUsage {
        let mut total = TokenUsage::default();
        for m in self.stages.values() {
            total.add(&m.usage);
        }
        total
    }
}

// ============================================================================
// Tests
// ============================================================================
