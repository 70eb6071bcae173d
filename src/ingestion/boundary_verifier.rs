//! Boundary Verifier (pipeline stage)
//!
//! Stage 4 of boundary detection: paranoia checks over the assembled
//! spans. Deterministic by default — zoom in on each start, zoom out over
//! each transition, report duplicates and missing ids against the expected
//! range. An optional model pass spot-checks suspicious boundaries under a
//! small budget; it annotates only and never moves a boundary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::core::artifact;
use crate::core::llm::{ChatMessage, ChatRequest};
use crate::model::{ElementCore, SectionBoundary};
use crate::pipeline::stage::{PipelineStage, StageContext, StageOutcome, StageResult};

use super::boundary_assembler::SECTION_BOUNDARIES;
use super::reducer::ELEMENTS_CORE;

pub const BOUNDARY_VERIFICATION: &str = "boundary_verification.json";

const DEFAULT_WINDOW: usize = 3;
const DEFAULT_AI_SPOT_CHECKS: u32 = 10;

// ============================================================================
// Report Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundaryWarning {
    pub section_id: String,
    pub check: String,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiAnnotation {
    pub section_id: String,
    pub verdict: String,
    pub note: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BoundaryVerification {
    pub sections_checked: usize,
    #[serde(default)]
    pub warnings: Vec<BoundaryWarning>,
    #[serde(default)]
    pub duplicate_sections: Vec<String>,
    #[serde(default)]
    pub missing_sections: Vec<u32>,
    /// Missing ids suppressed by the known-missing allowlist.
    #[serde(default)]
    pub allowlisted_missing: Vec<u32>,
    #[serde(default)]
    pub ai_annotations: Vec<AiAnnotation>,
}

#[derive(Debug, Deserialize)]
struct ModelBoundaryVerdict {
    #[serde(default)]
    looks_correct: bool,
    #[serde(default)]
    note: Option<String>,
}

// ============================================================================
// Stage
// ============================================================================

pub struct VerifyBoundaries;

#[async_trait]
impl PipelineStage for VerifyBoundaries {
    fn module_id(&self) -> &'static str {
        "verify_boundaries"
    }

    async fn run(&self, ctx: &StageContext) -> StageResult<StageOutcome> {
        let boundaries: Vec<SectionBoundary> =
            artifact::read_jsonl(ctx.inputs.require(SECTION_BOUNDARIES)?)?;
        let elements: Vec<ElementCore> =
            artifact::read_jsonl(ctx.inputs.require(ELEMENTS_CORE)?)?;
        let window = ctx.params.get_usize("window", DEFAULT_WINDOW);

        let mut report = verify(&boundaries, &elements, window, ctx.book.expected_range);
        let (allowlisted, missing): (Vec<u32>, Vec<u32>) = report
            .missing_sections
            .iter()
            .copied()
            .partition(|id| ctx.book.is_known_missing(*id));
        report.missing_sections = missing;
        report.allowlisted_missing = allowlisted;

        // Optional model pass over the suspicious boundaries only.
        let ai_enabled = ctx.params.get_bool("ai_spot_checks", true);
        if ai_enabled {
            if let Some(llm) = ctx.llm() {
                let budget = ctx.params.get_u32("max_spot_checks", DEFAULT_AI_SPOT_CHECKS);
                let suspicious: Vec<String> = report
                    .warnings
                    .iter()
                    .map(|w| w.section_id.clone())
                    .collect::<HashSet<_>>()
                    .into_iter()
                    .collect();
                for section_id in suspicious.into_iter().take(budget as usize) {
                    let Some(boundary) = boundaries.iter().find(|b| b.section_id == section_id)
                    else {
                        continue;
                    };
                    let snippet = span_text(boundary, &elements, 400);
                    let request = ChatRequest::new(vec![
                        ChatMessage::system(
                            "Judge whether this text is a complete, standalone gamebook \
                             section starting at its numeric header. Reply with JSON: \
                             {\"looks_correct\": <bool>, \"note\": <string>}.",
                        ),
                        ChatMessage::user(format!("Section {section_id}:\n{snippet}")),
                    ])
                    .with_temperature(0.0);
                    match llm
                        .complete_json::<ModelBoundaryVerdict>(request, &ctx.meter)
                        .await
                    {
                        Ok(verdict) => report.ai_annotations.push(AiAnnotation {
                            section_id,
                            verdict: if verdict.looks_correct {
                                "looks_correct".to_string()
                            } else {
                                "suspect".to_string()
                            },
                            note: verdict.note.unwrap_or_default(),
                        }),
                        Err(e) => {
                            tracing::debug!(error = %e, "spot check skipped");
                            break;
                        }
                    }
                }
            }
        }

        tracing::info!(
            checked = report.sections_checked,
            warnings = report.warnings.len(),
            missing = report.missing_sections.len(),
            "boundaries verified"
        );
        ctx.meter.record_items(report.sections_checked as u64);
        ctx.store.write_json(BOUNDARY_VERIFICATION, &report)?;
        Ok(StageOutcome::Done)
    }
}

// ============================================================================
// Deterministic Checks
// ============================================================================

/// Run all deterministic checks. Mid-sentence starts and bleed risks are
/// warnings, not errors — the assembler's spans stand unless a human or
/// the game-ready gate says otherwise.
pub fn verify(
    boundaries: &[SectionBoundary],
    elements: &[ElementCore],
    window: usize,
    expected_range: (u32, u32),
) -> BoundaryVerification {
    let by_seq: BTreeMap<u64, &ElementCore> = elements.iter().map(|e| (e.seq, e)).collect();
    let mut report = BoundaryVerification {
        sections_checked: boundaries.len(),
        ..Default::default()
    };

    let mut doc_order: Vec<&SectionBoundary> = boundaries.iter().collect();
    doc_order.sort_by_key(|b| b.start_seq);

    for boundary in &doc_order {
        zoom_in(boundary, &by_seq, window, &mut report.warnings);
    }
    for pair in doc_order.windows(2) {
        zoom_out(pair[0], pair[1], &by_seq, &mut report.warnings);
    }

    // Duplicates and missing ids against the expected range.
    let mut seen = HashSet::new();
    for boundary in boundaries {
        if !seen.insert(boundary.section_id.clone()) {
            report.duplicate_sections.push(boundary.section_id.clone());
        }
    }
    let present: HashSet<u32> = boundaries.iter().filter_map(|b| b.section_num()).collect();
    for id in expected_range.0..=expected_range.1 {
        if !present.contains(&id) {
            report.missing_sections.push(id);
        }
    }
    report
}

/// The start element must anchor on the section's number; a lowercase
/// first letter right after the anchor reads as a mid-sentence start.
fn zoom_in(
    boundary: &SectionBoundary,
    by_seq: &BTreeMap<u64, &ElementCore>,
    window: usize,
    warnings: &mut Vec<BoundaryWarning>,
) {
    let Some(start) = by_seq.get(&boundary.start_seq) else {
        warnings.push(BoundaryWarning {
            section_id: boundary.section_id.clone(),
            check: "zoom_in".to_string(),
            detail: "start element not found".to_string(),
        });
        return;
    };

    let expected = boundary.section_id.as_str();
    let has_anchor = start.standalone_number().map(|n| n.to_string()).as_deref() == Some(expected)
        || start.text.trim_start().starts_with(expected);
    if !has_anchor {
        warnings.push(BoundaryWarning {
            section_id: boundary.section_id.clone(),
            check: "zoom_in".to_string(),
            detail: format!("no numeric anchor for {expected} at start element"),
        });
    }

    // Body text within the window after the anchor.
    let body = by_seq
        .range(boundary.start_seq + 1..)
        .take(window)
        .map(|(_, e)| e.text.as_str())
        .find(|t| !t.trim().is_empty());
    if let Some(body) = body {
        if body
            .trim_start()
            .chars()
            .next()
            .map_or(false, |c| c.is_lowercase())
        {
            warnings.push(BoundaryWarning {
                section_id: boundary.section_id.clone(),
                check: "zoom_in".to_string(),
                detail: "section body appears to start mid-sentence".to_string(),
            });
        }
    }
}

/// The last element of a span ending without sentence punctuation (or on a
/// hyphen) suggests trailing content bleeding past the boundary.
fn zoom_out(
    first: &SectionBoundary,
    second: &SectionBoundary,
    by_seq: &BTreeMap<u64, &ElementCore>,
    warnings: &mut Vec<BoundaryWarning>,
) {
    let tail = by_seq
        .range(first.start_seq..=first.end_seq)
        .map(|(_, e)| e)
        .last();
    let Some(tail) = tail else {
        return;
    };
    let trimmed = tail.text.trim_end();
    let bleeds = trimmed.ends_with('-')
        || trimmed
            .chars()
            .last()
            .map_or(false, |c| c.is_alphanumeric() && !trimmed.ends_with(|c: char| c.is_ascii_digit()));
    if bleeds {
        warnings.push(BoundaryWarning {
            section_id: first.section_id.clone(),
            check: "zoom_out".to_string(),
            detail: format!(
                "span may bleed into section {}: tail ends without punctuation",
                second.section_id
            ),
        });
    }
}

fn span_text(boundary: &SectionBoundary, elements: &[ElementCore], limit: usize) -> String {
    let joined: String = elements
        .iter()
        .filter(|e| e.seq >= boundary.start_seq && e.seq <= boundary.end_seq)
        .map(|e| e.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    joined.chars().take(limit).collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BoundarySource, ElementKind};

    fn element(seq: u64, text: &str) -> ElementCore {
        ElementCore {
            id: format!("e{seq}"),
            seq,
            page: 1,
            kind: ElementKind::Text,
            text: text.to_string(),
            layout: None,
        }
    }

    fn boundary(id: &str, start: u64, end: u64) -> SectionBoundary {
        SectionBoundary {
            section_id: id.to_string(),
            start_element_id: format!("e{start}"),
            end_element_id: format!("e{end}"),
            start_seq: start,
            end_seq: end,
            source: BoundarySource::Certain,
        }
    }

    #[test]
    fn test_clean_boundaries_produce_no_warnings() {
        let elements = vec![
            element(0, "1"),
            element(1, "You stand at the gate. Turn to 2."),
            element(2, "2"),
            element(3, "The gate swings open."),
        ];
        let report = verify(&[boundary("1", 0, 1), boundary("2", 2, 3)], &elements, 3, (1, 2));
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
        assert!(report.missing_sections.is_empty());
        assert!(report.duplicate_sections.is_empty());
    }

    #[test]
    fn test_missing_anchor_warns() {
        let elements = vec![
            element(0, "Some prose without a number."),
            element(1, "More prose."),
        ];
        let report = verify(&[boundary("7", 0, 1)], &elements, 3, (7, 7));
        assert!(report
            .warnings
            .iter()
            .any(|w| w.check == "zoom_in" && w.detail.contains("anchor")));
    }

    #[test]
    fn test_mid_sentence_start_is_warning_not_error() {
        let elements = vec![
            element(0, "12"),
            element(1, "and then the floor gives way. You fall."),
        ];
        let report = verify(&[boundary("12", 0, 1)], &elements, 3, (12, 12));
        assert!(report
            .warnings
            .iter()
            .any(|w| w.detail.contains("mid-sentence")));
    }

    #[test]
    fn test_bleed_detection_on_unpunctuated_tail() {
        let elements = vec![
            element(0, "1"),
            element(1, "You grab the rope and"),
            element(2, "2"),
            element(3, "climb down safely."),
        ];
        let report = verify(&[boundary("1", 0, 1), boundary("2", 2, 3)], &elements, 3, (1, 2));
        assert!(report.warnings.iter().any(|w| w.check == "zoom_out"));
    }

    #[test]
    fn test_missing_and_duplicates_reported() {
        let elements = vec![element(0, "1"), element(1, "done.")];
        let report = verify(
            &[boundary("1", 0, 1), boundary("1", 0, 1)],
            &elements,
            3,
            (1, 3),
        );
        assert_eq!(report.duplicate_sections, vec!["1"]);
        assert_eq!(report.missing_sections, vec![2, 3]);
    }
}
