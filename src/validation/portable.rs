//! Portable Validator Entry (pipeline stage + CLI core)
//!
//! The independently-shippable check: schema pass over the raw JSON, logic
//! pass over the typed document, one combined report. The
//! `gamebook-validator` binary wraps exactly this and nothing else, so the
//! same verdict is reproducible engine-side without the pipeline.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::artifact;
use crate::gamebook::builder::GAMEBOOK_JSON;
use crate::model::Gamebook;
use crate::pipeline::stage::{PipelineStage, StageContext, StageOutcome, StageResult};

use super::logic::validate_logic;
use super::report::Report;
use super::schema::validate_schema;

pub const GAMEBOOK_VALIDATION: &str = "gamebook_validation.json";

/// Combined verdict, serialized as the validation artifact and printed by
/// the portable CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortableReport {
    pub status: String,
    pub schema: Report,
    pub logic: Report,
}

impl PortableReport {
    pub fn passed(&self) -> bool {
        self.status == "pass"
    }

    pub fn error_count(&self) -> usize {
        self.schema.errors.len() + self.logic.errors.len()
    }

    pub fn warning_count(&self) -> usize {
        self.schema.warnings.len() + self.logic.warnings.len()
    }
}

/// Validate a raw gamebook document: schema always, logic when the
/// document deserializes. Pass means zero errors across both passes;
/// warnings (version mismatch included) never fail.
pub fn validate_document(doc: &Value, extra_allowlist: &[u32]) -> PortableReport {
    let schema = validate_schema(doc);

    let logic = match serde_json::from_value::<Gamebook>(doc.clone()) {
        Ok(gamebook) => validate_logic(&gamebook, extra_allowlist),
        Err(e) => {
            let mut r = Report::default();
            if schema.passed() {
                r.error("schema", None, format!("document failed to deserialize: {e}"));
            }
            r
        }
    };

    let status = if schema.passed() && logic.passed() {
        "pass"
    } else {
        "fail"
    };
    PortableReport {
        status: status.to_string(),
        schema,
        logic,
    }
}

/// Pipeline stage wrapper. The stage itself completes either way; the
/// game-ready gate downstream consumes the report.
pub struct ValidateGamebook;

#[async_trait]
impl PipelineStage for ValidateGamebook {
    fn module_id(&self) -> &'static str {
        "validate_gamebook"
    }

    async fn run(&self, ctx: &StageContext) -> StageResult<StageOutcome> {
        let doc: Value = artifact::read_json(ctx.inputs.require(GAMEBOOK_JSON)?)?;
        let report = validate_document(&doc, &ctx.book.known_missing_sections);

        tracing::info!(
            status = %report.status,
            errors = report.error_count(),
            warnings = report.warning_count(),
            "gamebook validated"
        );
        if !report.passed() {
            ctx.meter.record_warning();
        }
        ctx.store.write_json(GAMEBOOK_VALIDATION, &report)?;
        Ok(StageOutcome::Done)
    }
}

// ============================================================================
// Tests
// ============================================================================
