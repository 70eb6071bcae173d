//! Forensics Validator (pipeline stage)
//!
//! The human-facing diagnostic report (`validation_report.json`, routed to
//! the run's `output/`). Richer and noisier than the portable verdict:
//! per-section text quality, stub counts, boundary ordering conflicts,
//! choice/text alignment flags, and the orphan trace. Never gates engine
//! readiness.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::artifact;
use crate::escalation::REPAIR_REPORT;
use crate::gamebook::builder::GAMEBOOK_JSON;
use crate::ingestion::boundary_assembler::ORDERING_CONFLICTS;
use crate::model::{Gamebook, OrderingConflicts};
use crate::pipeline::stage::{PipelineStage, StageContext, StageOutcome, StageResult};

use super::logic::validate_logic;

pub const VALIDATION_REPORT: &str = "validation_report.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionQuality {
    pub id: String,
    pub text_chars: usize,
    pub sequence_events: usize,
    pub stub: bool,
    pub empty: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForensicsReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub section_count: usize,
    pub stub_count: usize,
    pub empty_count: usize,
    #[serde(default)]
    pub section_quality: Vec<SectionQuality>,
    #[serde(default)]
    pub boundary_ordering_conflicts: Vec<Value>,
    #[serde(default)]
    pub choice_alignment_flags: Vec<Value>,
    #[serde(default)]
    pub orphan_trace: Vec<String>,
}

pub struct ValidateForensics;

#[async_trait]
impl PipelineStage for ValidateForensics {
    fn module_id(&self) -> &'static str {
        "validate_forensics"
    }

    async fn run(&self, ctx: &StageContext) -> StageResult<StageOutcome> {
        let gamebook: Gamebook = artifact::read_json(ctx.inputs.require(GAMEBOOK_JSON)?)?;

        let conflicts = ctx
            .inputs
            .get(ORDERING_CONFLICTS)
            .filter(|p| p.exists())
            .and_then(|p| artifact::read_json::<OrderingConflicts>(p).ok())
            .unwrap_or_default();

        let alignment_flags: Vec<Value> = ctx
            .inputs
            .get(REPAIR_REPORT)
            .filter(|p| p.exists())
            .and_then(|p| artifact::read_json::<Value>(p).ok())
            .and_then(|v| v.get("alignment_flags").cloned())
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default();

        let report = build_report(&gamebook, &conflicts, alignment_flags, &ctx.book.known_missing_sections);

        ctx.meter.record_items(report.section_count as u64);
        ctx.store.write_json(VALIDATION_REPORT, &report)?;
        Ok(StageOutcome::Done)
    }
}

fn build_report(
    gamebook: &Gamebook,
    conflicts: &OrderingConflicts,
    alignment_flags: Vec<Value>,
    known_missing: &[u32],
) -> ForensicsReport {
    let section_quality: Vec<SectionQuality> = gamebook
        .sections
        .iter()
        .map(|s| SectionQuality {
            id: s.id.clone(),
            text_chars: s.text.chars().count(),
            sequence_events: s.sequence.len(),
            stub: s.is_stub(),
            empty: s.text.trim().is_empty(),
        })
        .collect();

    let logic = validate_logic(gamebook, known_missing);
    let orphan_trace: Vec<String> = logic
        .warnings
        .iter()
        .filter(|w| w.code == "orphan")
        .filter_map(|w| w.section.clone())
        .collect();

    ForensicsReport {
        title: gamebook.metadata.title.clone(),
        section_count: gamebook.sections.len(),
        stub_count: section_quality.iter().filter(|q| q.stub).count(),
        empty_count: section_quality.iter().filter(|q| q.empty && !q.stub).count(),
        section_quality,
        boundary_ordering_conflicts: conflicts
            .conflicts
            .iter()
            .filter_map(|c| serde_json::to_value(c).ok())
            .collect(),
        choice_alignment_flags: alignment_flags,
        orphan_trace,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Event, Metadata, Section, SectionType};

    #[test]
    fn test_report_counts() {
        let gamebook = Gamebook {
            metadata: Metadata {
                title: Some("Test Book".into()),
                author: None,
                start_section: "1".into(),
                validator_version: super::super::VALIDATOR_VERSION.into(),
                expected_range: (1, 2),
            },
            sections: vec![
                Section {
                    id: "1".into(),
                    section_num: Some(1),
                    section_type: SectionType::Gameplay,
                    is_gameplay_section: true,
                    text: "A corridor.".into(),
                    clean_text: "A corridor.".into(),
                    choices: vec![],
                    sequence: vec![Event::choice_to("2")],
                    provenance: None,
                },
                Section {
                    id: "2".into(),
                    section_num: Some(2),
                    section_type: SectionType::Stub,
                    is_gameplay_section: true,
                    text: String::new(),
                    clean_text: String::new(),
                    choices: vec![],
                    sequence: vec![],
                    provenance: Some(crate::model::Provenance {
                        stub: true,
                        ..Default::default()
                    }),
                },
            ],
        };
        let report = build_report(&gamebook, &OrderingConflicts::default(), vec![], &[]);
        assert_eq!(report.section_count, 2);
        assert_eq!(report.stub_count, 1);
        assert_eq!(report.empty_count, 0);
        assert_eq!(report.title.as_deref(), Some("Test Book"));
    }
}
