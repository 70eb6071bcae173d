//! Stage Trait and Execution Context
//!
//! Every pipeline module implements `PipelineStage`: a pure function from
//! named input artifacts to named output artifacts on disk. The context
//! carries everything a stage may touch — parameter bag, artifact store,
//! input resolver, optional LLM service, and the instrumentation meter.
//! Stages never see the driver's state files and never mutate inputs.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::core::artifact::{ArtifactError, ArtifactStore};
use crate::core::instrument::StageMeter;
use crate::core::llm::LlmService;

// ============================================================================
// Errors & Outcome
// ============================================================================

#[derive(Error, Debug)]
pub enum StageError {
    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error("invalid input: {0}")]
    Input(String),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type StageResult<T> = std::result::Result<T, StageError>;

/// How a stage execution ended.
///
/// `GateFailed` is the "exit 1 but artifacts are valid" signal: the stage
/// is recorded `done`, the run `failed`, and the pipeline keeps whatever
/// was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Done,
    GateFailed,
}

// ============================================================================
// Parameters & Book Config
// ============================================================================

/// Per-stage parameter bag from the recipe, with typed accessors.
#[derive(Debug, Clone, Default)]
pub struct StageParams(pub serde_json::Map<String, Value>);

impl StageParams {
    pub fn get_u32(&self, key: &str, default: u32) -> u32 {
        self.0
            .get(key)
            .and_then(Value::as_u64)
            .map(|v| v as u32)
            .unwrap_or(default)
    }

    pub fn get_usize(&self, key: &str, default: usize) -> usize {
        self.0
            .get(key)
            .and_then(Value::as_u64)
            .map(|v| v as usize)
            .unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.0.get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }
}

/// Book-level facts every stage may consult.
#[derive(Debug, Clone)]
pub struct BookConfig {
    pub expected_range: (u32, u32),
    pub known_missing_sections: Vec<u32>,
    pub title: Option<String>,
}

impl Default for BookConfig {
    fn default() -> Self {
        Self {
            expected_range: (1, crate::model::DEFAULT_SECTION_MAX),
            known_missing_sections: Vec::new(),
            title: None,
        }
    }
}

impl BookConfig {
    pub fn is_known_missing(&self, id: u32) -> bool {
        self.known_missing_sections.contains(&id)
    }
}

// ============================================================================
// Input Resolution
// ============================================================================

/// Maps artifact names to concrete paths. The driver seeds it with recipe
/// `inputs` entries (external collaborator artifacts) and with every file
/// upstream stages produced.
#[derive(Debug, Clone, Default)]
pub struct InputResolver {
    by_name: HashMap<String, PathBuf>,
}

impl InputResolver {
    pub fn register(&mut self, name: &str, path: PathBuf) {
        self.by_name.insert(name.to_string(), path);
    }

    /// Resolve a named input; stages treat a miss as an input format error.
    pub fn require(&self, name: &str) -> StageResult<&Path> {
        self.by_name
            .get(name)
            .map(PathBuf::as_path)
            .ok_or_else(|| StageError::Input(format!("no upstream artifact named {name}")))
    }

    pub fn get(&self, name: &str) -> Option<&Path> {
        self.by_name.get(name).map(PathBuf::as_path)
    }
}

// ============================================================================
// Context
// ============================================================================

/// Everything one stage execution may touch.
pub struct StageContext {
    pub run_id: String,
    pub stage_id: String,
    pub module_id: String,
    pub params: StageParams,
    pub book: BookConfig,
    pub store: ArtifactStore,
    pub inputs: InputResolver,
    pub llm: Option<Arc<LlmService>>,
    pub meter: StageMeter,
}

impl StageContext {
    /// The LLM service, when this run has AI enabled.
    pub fn llm(&self) -> Option<&Arc<LlmService>> {
        self.llm.as_ref()
    }
}

// ============================================================================
// Stage Trait
// ============================================================================

/// A pipeline module. Implementations are stateless; all inputs arrive
/// through the context.
#[async_trait]
pub trait PipelineStage: Send + Sync {
    /// Stable module id referenced by recipes.
    fn module_id(&self) -> &'static str;

    /// Schema version stamped onto this stage's outputs.
    fn output_schema(&self) -> &'static str {
        "1.0.0"
    }

    async fn run(&self, ctx: &StageContext) -> StageResult<StageOutcome>;
}
