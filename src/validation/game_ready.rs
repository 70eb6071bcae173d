//! Game-Ready Gate (pipeline stage)
//!
//! Aggregates every validation signal into one consolidated report and
//! applies the pass gate:
//!
//! `schema_errors == 0 ∧ orphans == 0 ∧ broken_links == 0 ∧ missing ⊆
//! known_missing ∧ choice_flags == 0 ∧ ordering_conflicts == 0`
//!
//! Stubs count as missing. A failed gate completes the stage (artifacts
//! stay valid) but marks the run failed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::core::artifact;
use crate::escalation::{RepairReport, REPAIR_REPORT};
use crate::gamebook::builder::GAMEBOOK_JSON;
use crate::ingestion::boundary_assembler::ORDERING_CONFLICTS;
use crate::ingestion::boundary_verifier::{BoundaryVerification, BOUNDARY_VERIFICATION};
use crate::model::{Gamebook, OrderingConflicts};
use crate::pipeline::stage::{PipelineStage, StageContext, StageOutcome, StageResult};

use super::portable::{PortableReport, GAMEBOOK_VALIDATION};

pub const GAME_READY_REPORT: &str = "game_ready_report.json";

// ============================================================================
// Report Shape
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SectionCounts {
    pub expected: u32,
    pub present: u32,
    pub missing: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChoiceCompleteness {
    pub flagged_count: usize,
    #[serde(default)]
    pub flagged_sections: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reachability {
    pub broken_links: usize,
    pub orphans: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaValidation {
    pub errors: usize,
    pub warnings: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssuesReport {
    pub orphaned_no_sources_count: usize,
    pub boundary_ordering_conflicts: usize,
    pub duplicate_headers: usize,
    #[serde(default)]
    pub items: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Attempts {
    pub orphan_attempts: u32,
    pub broken_link_attempts: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GameReadyReport {
    pub status: String,
    pub section_counts: SectionCounts,
    pub choice_completeness: ChoiceCompleteness,
    pub reachability: Reachability,
    pub schema_validation: SchemaValidation,
    pub issues_report: IssuesReport,
    pub attempts: Attempts,
    #[serde(default)]
    pub known_missing_sections: Vec<u32>,
    #[serde(default)]
    pub artifacts: BTreeMap<String, PathBuf>,
}

// ============================================================================
// Stage
// ============================================================================

pub struct ValidateGameReady;

#[async_trait]
impl PipelineStage for ValidateGameReady {
    fn module_id(&self) -> &'static str {
        "validate_game_ready"
    }

    async fn run(&self, ctx: &StageContext) -> StageResult<StageOutcome> {
        let gamebook_path = ctx.inputs.require(GAMEBOOK_JSON)?.to_path_buf();
        let gamebook: Gamebook = artifact::read_json(&gamebook_path)?;
        let validation: PortableReport =
            artifact::read_json(ctx.inputs.require(GAMEBOOK_VALIDATION)?)?;
        let repair: RepairReport = ctx
            .inputs
            .get(REPAIR_REPORT)
            .filter(|p| p.exists())
            .and_then(|p| artifact::read_json(p).ok())
            .unwrap_or_default();
        let conflicts: OrderingConflicts = ctx
            .inputs
            .get(ORDERING_CONFLICTS)
            .filter(|p| p.exists())
            .and_then(|p| artifact::read_json(p).ok())
            .unwrap_or_default();
        let boundary: BoundaryVerification = ctx
            .inputs
            .get(BOUNDARY_VERIFICATION)
            .filter(|p| p.exists())
            .and_then(|p| artifact::read_json(p).ok())
            .unwrap_or_default();

        let mut report = aggregate(
            &gamebook,
            &validation,
            &repair,
            &conflicts,
            &boundary,
            &ctx.book.known_missing_sections,
        );
        report
            .artifacts
            .insert("gamebook".to_string(), gamebook_path);
        for (name, key) in [
            (GAMEBOOK_VALIDATION, "validation"),
            (REPAIR_REPORT, "repair"),
            (ORDERING_CONFLICTS, "ordering_conflicts"),
            (BOUNDARY_VERIFICATION, "boundary_verification"),
        ] {
            if let Some(path) = ctx.inputs.get(name) {
                report.artifacts.insert(key.to_string(), path.to_path_buf());
            }
        }

        let passed = report.status == "pass";
        tracing::info!(status = %report.status, "game-ready gate evaluated");
        ctx.store.write_json(GAME_READY_REPORT, &report)?;
        Ok(if passed {
            StageOutcome::Done
        } else {
            StageOutcome::GateFailed
        })
    }
}

/// Pure aggregation + gate decision.
pub fn aggregate(
    gamebook: &Gamebook,
    validation: &PortableReport,
    repair: &RepairReport,
    conflicts: &OrderingConflicts,
    boundary: &BoundaryVerification,
    known_missing: &[u32],
) -> GameReadyReport {
    let (lo, hi) = gamebook.metadata.expected_range;
    let expected = hi.saturating_sub(lo) + 1;

    // Stubs count as missing.
    let present: Vec<u32> = gamebook
        .sections
        .iter()
        .filter(|s| !s.is_stub())
        .filter_map(|s| s.id.parse().ok())
        .filter(|id| (lo..=hi).contains(id))
        .collect();
    let missing: Vec<u32> = (lo..=hi).filter(|id| !present.contains(id)).collect();
    let missing_covered = missing.iter().all(|id| known_missing.contains(id));

    let broken_links = validation.logic.errors.iter().filter(|e| e.code == "broken_link").count()
        + validation.schema.errors.iter().filter(|e| e.code == "broken_link").count();
    let orphans = validation
        .logic
        .warnings
        .iter()
        .filter(|e| e.code == "orphan")
        .count();
    let schema_errors = validation.error_count();
    let flagged: Vec<String> = repair
        .flagged_remaining
        .iter()
        .map(|f| f.section_id.clone())
        .collect();

    let orphaned_no_sources = repair
        .orphans_remaining
        .iter()
        .filter(|t| t.text_sources.is_empty())
        .count();

    let mut items = Vec::new();
    if !missing_covered {
        items.push(format!(
            "{} missing sections outside the known-missing allowlist",
            missing.iter().filter(|id| !known_missing.contains(id)).count()
        ));
    }
    if !conflicts.conflicts.is_empty() {
        items.push(format!(
            "{} boundary ordering conflicts",
            conflicts.conflicts.len()
        ));
    }
    if !boundary.duplicate_sections.is_empty() {
        items.push(format!(
            "{} duplicate section headers",
            boundary.duplicate_sections.len()
        ));
    }

    let pass = schema_errors == 0
        && orphans == 0
        && broken_links == 0
        && missing_covered
        && flagged.is_empty()
        && conflicts.conflicts.is_empty();

    GameReadyReport {
        status: if pass { "pass" } else { "fail" }.to_string(),
        section_counts: SectionCounts {
            expected,
            present: present.len() as u32,
            missing: missing.len() as u32,
        },
        choice_completeness: ChoiceCompleteness {
            flagged_count: flagged.len(),
            flagged_sections: flagged,
        },
        reachability: Reachability {
            broken_links,
            orphans,
        },
        schema_validation: SchemaValidation {
            errors: schema_errors,
            warnings: validation.warning_count(),
        },
        issues_report: IssuesReport {
            orphaned_no_sources_count: orphaned_no_sources,
            boundary_ordering_conflicts: conflicts.conflicts.len(),
            duplicate_headers: boundary.duplicate_sections.len(),
            items,
        },
        attempts: Attempts {
            orphan_attempts: repair.attempts,
            broken_link_attempts: repair.attempts,
        },
        known_missing_sections: known_missing.to_vec(),
        artifacts: BTreeMap::new(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Event, Metadata, Section, SectionType, Terminal};
    use crate::validation::portable::validate_document;

    fn tiny_gamebook() -> Gamebook {
        Gamebook {
            metadata: Metadata {
                title: None,
                author: None,
                start_section: "1".to_string(),
                validator_version: crate::validation::VALIDATOR_VERSION.to_string(),
                expected_range: (1, 2),
            },
            sections: vec![
                Section {
                    id: "1".into(),
                    section_num: Some(1),
                    section_type: SectionType::Gameplay,
                    is_gameplay_section: true,
                    text: "Start.".into(),
                    clean_text: "Start.".into(),
                    choices: vec![],
                    sequence: vec![Event::choice_to("2")],
                    provenance: None,
                },
                Section {
                    id: "2".into(),
                    section_num: Some(2),
                    section_type: SectionType::Gameplay,
                    is_gameplay_section: true,
                    text: "End.".into(),
                    clean_text: "End.".into(),
                    choices: vec![],
                    sequence: vec![Event::Death {
                        outcome: Terminal::Win,
                        description: None,
                    }],
                    provenance: None,
                },
            ],
        }
    }

    #[test]
    fn test_clean_book_passes_gate() {
        let gb = tiny_gamebook();
        let validation = validate_document(&serde_json::to_value(&gb).unwrap(), &[]);
        let report = aggregate(
            &gb,
            &validation,
            &RepairReport::default(),
            &OrderingConflicts::default(),
            &BoundaryVerification::default(),
            &[],
        );
        assert_eq!(report.status, "pass");
        assert_eq!(report.section_counts.expected, 2);
        assert_eq!(report.section_counts.present, 2);
        assert_eq!(report.section_counts.missing, 0);
    }

    #[test]
    fn test_unlisted_missing_fails_gate() {
        let mut gb = tiny_gamebook();
        gb.metadata.expected_range = (1, 3);
        let validation = validate_document(&serde_json::to_value(&gb).unwrap(), &[3]);
        let report = aggregate(
            &gb,
            &validation,
            &RepairReport::default(),
            &OrderingConflicts::default(),
            &BoundaryVerification::default(),
            &[],
        );
        assert_eq!(report.status, "fail");
        assert_eq!(report.section_counts.missing, 1);
    }

    #[test]
    fn test_allowlisted_missing_passes_gate() {
        let mut gb = tiny_gamebook();
        gb.metadata.expected_range = (1, 3);
        let validation = validate_document(&serde_json::to_value(&gb).unwrap(), &[3]);
        let report = aggregate(
            &gb,
            &validation,
            &RepairReport::default(),
            &OrderingConflicts::default(),
            &BoundaryVerification::default(),
            &[3],
        );
        assert_eq!(report.status, "pass");
        assert_eq!(report.known_missing_sections, vec![3]);
    }

    #[test]
    fn test_ordering_conflict_fails_gate() {
        let gb = tiny_gamebook();
        let validation = validate_document(&serde_json::to_value(&gb).unwrap(), &[]);
        let conflicts = OrderingConflicts {
            conflicts: vec![crate::model::OrderingConflict {
                first_section: "1".into(),
                second_section: "2".into(),
                first_end_seq: 10,
                second_start_seq: 10,
            }],
        };
        let report = aggregate(
            &gb,
            &validation,
            &RepairReport::default(),
            &conflicts,
            &BoundaryVerification::default(),
            &[],
        );
        assert_eq!(report.status, "fail");
        assert_eq!(report.issues_report.boundary_ordering_conflicts, 1);
    }

    #[test]
    fn test_choice_flags_fail_gate() {
        let gb = tiny_gamebook();
        let validation = validate_document(&serde_json::to_value(&gb).unwrap(), &[]);
        let repair = RepairReport {
            attempts: 2,
            flagged_remaining: vec![crate::escalation::completeness::CompletenessFlag {
                section_id: "1".into(),
                missing_targets: vec!["9".into()],
            }],
            ..Default::default()
        };
        let report = aggregate(
            &gb,
            &validation,
            &repair,
            &OrderingConflicts::default(),
            &BoundaryVerification::default(),
            &[],
        );
        assert_eq!(report.status, "fail");
        assert_eq!(report.choice_completeness.flagged_count, 1);
        assert_eq!(report.attempts.orphan_attempts, 2);
    }
}
