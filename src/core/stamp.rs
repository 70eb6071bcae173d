//! Artifact Stamping
//!
//! Every record a stage writes is stamped with provenance metadata after
//! the stage finishes: `{schema_version, module_id, run_id, created_at}`.
//! The driver is the only component that stamps; stages write clean
//! records and never see the fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stamping metadata attached to every output record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stamp {
    pub schema_version: String,
    pub module_id: String,
    pub run_id: String,
    pub created_at: DateTime<Utc>,
}

impl Stamp {
    pub fn new(schema_version: &str, module_id: &str, run_id: &str) -> Self {
        Self {
            schema_version: schema_version.to_string(),
            module_id: module_id.to_string(),
            run_id: run_id.to_string(),
            created_at: Utc::now(),
        }
    }

    /// Inject the stamp fields into a JSON object. Non-object values are
    /// left untouched (a JSONL line must be an object to be stamped).
    pub fn apply(&self, value: &mut Value) {
        if let Value::Object(map) = value {
            map.insert(
                "schema_version".to_string(),
                Value::String(self.schema_version.clone()),
            );
            map.insert("module_id".to_string(), Value::String(self.module_id.clone()));
            map.insert("run_id".to_string(), Value::String(self.run_id.clone()));
            map.insert(
                "created_at".to_string(),
                Value::String(self.created_at.to_rfc3339()),
            );
        }
    }

    /// Remove stamp fields from a JSON object, for byte-level comparison of
    /// deterministic stage outputs across runs.
    pub fn strip(value: &mut Value) {
        if let Value::Object(map) = value {
            for key in ["schema_version", "module_id", "run_id", "created_at"] {
                map.remove(key);
            }
        }
    }
}
