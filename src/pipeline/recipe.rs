//! Recipe Loading and Planning
//!
//! A recipe is the declarative run description: book facts, AI settings,
//! external input artifacts, and the ordered stage list with `needs`
//! edges. JSON and TOML are both accepted (by extension). Planning is a
//! stable topological sort — recipe order is kept wherever `needs` allows
//! — and cycles are refused outright.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::model::DEFAULT_SECTION_MAX;

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug)]
pub enum RecipeError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error in {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid recipe: {0}")]
    Invalid(String),

    #[error("stage dependency cycle involving {0}")]
    Cycle(String),
}

pub type Result<T> = std::result::Result<T, RecipeError>;

// ============================================================================
// Recipe Shape
// ============================================================================

/// Book-level facts supplied per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BookSettings {
    pub title: Option<String>,
    pub expected_range: (u32, u32),
    pub known_missing_sections: Vec<u32>,
}

impl Default for BookSettings {
    fn default() -> Self {
        Self {
            title: None,
            expected_range: (1, DEFAULT_SECTION_MAX),
            known_missing_sections: Vec::new(),
        }
    }
}

/// AI gateway settings. `api_key_env` names the environment variable
/// holding the key; the key itself never appears in a recipe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiSettings {
    pub enabled: bool,
    pub base_url: String,
    pub api_key_env: String,
    pub model: String,
    pub arbiter_model: Option<String>,
    pub max_calls_per_stage: u32,
    pub call_timeout_secs: u64,
    pub concurrency: usize,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: String::new(),
            api_key_env: "GAMEBOOK_FORGE_API_KEY".to_string(),
            model: String::new(),
            arbiter_model: None,
            max_calls_per_stage: 64,
            call_timeout_secs: 120,
            concurrency: 4,
        }
    }
}

/// One stage record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSpec {
    pub id: String,
    pub module_id: String,
    #[serde(default)]
    pub needs: Vec<String>,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub output_schema: Option<String>,
}

/// The whole run description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    #[serde(default)]
    pub book: BookSettings,
    #[serde(default)]
    pub ai: AiSettings,
    /// External collaborator artifacts by name (e.g. `elements.jsonl`).
    #[serde(default)]
    pub inputs: HashMap<String, PathBuf>,
    pub stages: Vec<StageSpec>,
}

impl Recipe {
    /// Load from JSON or TOML, by extension.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| RecipeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let recipe: Recipe = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&contents).map_err(|e| RecipeError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?,
            _ => serde_json::from_str(&contents).map_err(|e| RecipeError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?,
        };
        recipe.validate()?;
        Ok(recipe)
    }

    /// Structural validation: non-empty, unique ids, known `needs`.
    pub fn validate(&self) -> Result<()> {
        if self.stages.is_empty() {
            return Err(RecipeError::Invalid("recipe has no stages".to_string()));
        }
        let mut ids = HashSet::new();
        for stage in &self.stages {
            if !ids.insert(stage.id.as_str()) {
                return Err(RecipeError::Invalid(format!(
                    "duplicate stage id {}",
                    stage.id
                )));
            }
        }
        for stage in &self.stages {
            for need in &stage.needs {
                if !ids.contains(need.as_str()) {
                    return Err(RecipeError::Invalid(format!(
                        "stage {} needs unknown stage {need}",
                        stage.id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Stable topological order over `needs`. Ties break by recipe order.
    pub fn plan(&self) -> Result<Vec<&StageSpec>> {
        let index: HashMap<&str, usize> = self
            .stages
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.as_str(), i))
            .collect();
        let mut in_degree = vec![0usize; self.stages.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.stages.len()];
        for (i, stage) in self.stages.iter().enumerate() {
            for need in &stage.needs {
                let from = index[need.as_str()];
                dependents[from].push(i);
                in_degree[i] += 1;
            }
        }

        let mut ready: VecDeque<usize> = (0..self.stages.len())
            .filter(|i| in_degree[*i] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.stages.len());
        while let Some(i) = ready.pop_front() {
            order.push(&self.stages[i]);
            for &next in &dependents[i] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    // Keep recipe order among newly-ready stages.
                    let pos = ready
                        .iter()
                        .position(|&r| r > next)
                        .unwrap_or(ready.len());
                    ready.insert(pos, next);
                }
            }
        }

        if order.len() != self.stages.len() {
            let stuck = self
                .stages
                .iter()
                .enumerate()
                .find(|(i, _)| in_degree[*i] > 0)
                .map(|(_, s)| s.id.clone())
                .unwrap_or_default();
            return Err(RecipeError::Cycle(stuck));
        }
        Ok(order)
    }

    /// The standard full pipeline over the implemented stage set.
    pub fn standard() -> Self {
        fn stage(id: &str, needs: &[&str]) -> StageSpec {
            StageSpec {
                id: id.to_string(),
                module_id: id.to_string(),
                needs: needs.iter().map(|s| s.to_string()).collect(),
                params: serde_json::Map::new(),
                output_schema: None,
            }
        }
        Recipe {
            book: BookSettings::default(),
            ai: AiSettings::default(),
            inputs: HashMap::new(),
            stages: vec![
                stage("reduce_elements", &[]),
                stage("classify_headers", &["reduce_elements"]),
                stage("structure_sections", &["classify_headers"]),
                stage("assemble_boundaries", &["structure_sections"]),
                stage("verify_boundaries", &["assemble_boundaries"]),
                stage("extract_sections", &["assemble_boundaries"]),
                stage("order_sequences", &["extract_sections"]),
                stage("repair_choices", &["order_sequences"]),
                stage("build_gamebook", &["repair_choices"]),
                stage("validate_gamebook", &["build_gamebook"]),
                stage("validate_forensics", &["validate_gamebook"]),
                stage("validate_game_ready", &["validate_gamebook", "repair_choices"]),
            ],
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
