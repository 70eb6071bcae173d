//! Run State and Event Log
//!
//! The driver is the sole writer of `pipeline_state.json` and
//! `pipeline_events.jsonl`; stages never touch them. State is replaced
//! atomically on every transition; the event log is append-only for the
//! life of the run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::core::artifact::{self, ArtifactError, Result};

pub const PIPELINE_STATE: &str = "pipeline_state.json";
pub const PIPELINE_EVENTS: &str = "pipeline_events.jsonl";

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Running,
    Done,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageState {
    pub id: String,
    pub status: StageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    pub run_id: String,
    pub run_status: RunStatus,
    pub stages: Vec<StageState>,
}

impl PipelineState {
    pub fn new(run_id: &str, stage_ids: &[&str]) -> Self {
        Self {
            run_id: run_id.to_string(),
            run_status: RunStatus::Running,
            stages: stage_ids
                .iter()
                .map(|id| StageState {
                    id: id.to_string(),
                    status: StageStatus::Pending,
                    started_at: None,
                    ended_at: None,
                })
                .collect(),
        }
    }

    pub fn load(run_dir: &Path) -> Result<Self> {
        artifact::read_json(&run_dir.join(PIPELINE_STATE))
    }

    pub fn save(&self, run_dir: &Path) -> Result<()> {
        artifact::write_json(&run_dir.join(PIPELINE_STATE), self)
    }

    pub fn stage(&self, id: &str) -> Option<&StageState> {
        self.stages.iter().find(|s| s.id == id)
    }

    pub fn mark(&mut self, id: &str, status: StageStatus) {
        let now = Utc::now();
        if let Some(stage) = self.stages.iter_mut().find(|s| s.id == id) {
            match status {
                StageStatus::Running => stage.started_at = Some(now),
                StageStatus::Done | StageStatus::Failed => stage.ended_at = Some(now),
                _ => {}
            }
            stage.status = status;
        }
    }

    /// Reset the named stage and everything after it (plan order) back to
    /// pending — the `--start-from` semantics.
    pub fn reset_from(&mut self, stage_id: &str) -> Vec<String> {
        let Some(pos) = self.stages.iter().position(|s| s.id == stage_id) else {
            return Vec::new();
        };
        let mut reset = Vec::new();
        for stage in self.stages.iter_mut().skip(pos) {
            stage.status = StageStatus::Pending;
            stage.started_at = None;
            stage.ended_at = None;
            reset.push(stage.id.clone());
        }
        self.run_status = RunStatus::Running;
        reset
    }
}

// ============================================================================
// Event Log
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_id: Option<String>,
    pub message: String,
}

/// Append-only event log, driver-owned.
#[derive(Debug)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(run_dir: &Path) -> Self {
        Self {
            path: run_dir.join(PIPELINE_EVENTS),
        }
    }

    pub fn record(&self, kind: &str, stage_id: Option<&str>, message: impl Into<String>) -> Result<()> {
        let event = PipelineEvent {
            id: Uuid::new_v4(),
            at: Utc::now(),
            kind: kind.to_string(),
            stage_id: stage_id.map(str::to_string),
            message: message.into(),
        };
        let line = serde_json::to_string(&event).map_err(|e| ArtifactError::Json {
            path: self.path.clone(),
            line: 0,
            source: e,
        })?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| ArtifactError::Io {
                path: self.path.clone(),
                source: e,
            })?;
        writeln!(file, "{line}").map_err(|e| ArtifactError::Io {
            path: self.path.clone(),
            source: e,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
