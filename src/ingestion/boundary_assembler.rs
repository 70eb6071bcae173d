//! Boundary Assembler (pipeline stage)
//!
//! Stage 3 of boundary detection, pure code: spans in document order with
//! `end_seq = next.start_seq - 1` (the final section runs to the last
//! element). Ordering violations are recorded in `ordering_conflicts.json`,
//! never silently repaired. The boundary file itself is re-sorted by
//! numeric `section_id` for consumers; `start_seq` stays the source of
//! truth for reading order.

use async_trait::async_trait;

use crate::core::artifact;
use crate::model::{
    BoundarySource, ElementCore, OrderingConflict, OrderingConflicts, SectionBoundary,
    SectionStatus, SectionsStructured,
};
use crate::pipeline::stage::{PipelineStage, StageContext, StageError, StageOutcome, StageResult};

use super::reducer::ELEMENTS_CORE;
use super::structurer::SECTIONS_STRUCTURED;

pub const SECTION_BOUNDARIES: &str = "section_boundaries.jsonl";
pub const ORDERING_CONFLICTS: &str = "ordering_conflicts.json";

pub struct AssembleBoundaries;

#[async_trait]
impl PipelineStage for AssembleBoundaries {
    fn module_id(&self) -> &'static str {
        "assemble_boundaries"
    }

    async fn run(&self, ctx: &StageContext) -> StageResult<StageOutcome> {
        let structured: SectionsStructured =
            artifact::read_json(ctx.inputs.require(SECTIONS_STRUCTURED)?)?;
        let elements: Vec<ElementCore> =
            artifact::read_jsonl(ctx.inputs.require(ELEMENTS_CORE)?)?;

        let (boundaries, conflicts) = assemble(&structured, &elements)?;

        if !conflicts.conflicts.is_empty() {
            tracing::warn!(count = conflicts.conflicts.len(), "ordering conflicts recorded");
            ctx.meter.record_warning();
        }
        ctx.meter.record_items(boundaries.len() as u64);
        ctx.store.write_jsonl(SECTION_BOUNDARIES, &boundaries)?;
        ctx.store.write_json(ORDERING_CONFLICTS, &conflicts)?;
        Ok(StageOutcome::Done)
    }
}

/// Deterministic span assembly. Returns boundaries sorted by numeric
/// section id, plus every detected ordering violation.
pub fn assemble(
    structured: &SectionsStructured,
    elements: &[ElementCore],
) -> StageResult<(Vec<SectionBoundary>, OrderingConflicts)> {
    if elements.is_empty() {
        return Err(StageError::Input("empty element stream".to_string()));
    }
    let max_seq = elements.iter().map(|e| e.seq).max().unwrap_or(0);

    // Document order first.
    let mut ordered: Vec<_> = structured.game_sections.iter().collect();
    ordered.sort_by_key(|g| g.start_seq);

    let mut boundaries = Vec::with_capacity(ordered.len());
    let mut conflicts = OrderingConflicts::default();

    for (idx, section) in ordered.iter().enumerate() {
        let next_start = ordered.get(idx + 1).map(|n| n.start_seq);
        let end_seq = match next_start {
            Some(next) => next.saturating_sub(1).max(section.start_seq),
            None => max_seq,
        };

        if let Some(next) = next_start {
            if end_seq >= next {
                conflicts.conflicts.push(OrderingConflict {
                    first_section: section.section_id.to_string(),
                    second_section: ordered[idx + 1].section_id.to_string(),
                    first_end_seq: end_seq,
                    second_start_seq: next,
                });
            }
        }

        let start_element = elements
            .iter()
            .find(|e| e.seq == section.start_seq)
            .ok_or_else(|| {
                StageError::Invariant(format!(
                    "section {} starts at seq {} which matches no element",
                    section.section_id, section.start_seq
                ))
            })?;
        let end_element = elements
            .iter()
            .filter(|e| e.seq >= section.start_seq && e.seq <= end_seq)
            .last()
            .unwrap_or(start_element);

        boundaries.push(SectionBoundary {
            section_id: section.section_id.to_string(),
            start_element_id: start_element.id.clone(),
            end_element_id: end_element.id.clone(),
            start_seq: section.start_seq,
            end_seq,
            source: match section.status {
                SectionStatus::Certain => BoundarySource::Certain,
                SectionStatus::Uncertain => BoundarySource::Uncertain,
            },
        });
    }

    // Consumer convenience: numeric id order in the file.
    boundaries.sort_by_key(|b| b.section_num().unwrap_or(u32::MAX));
    Ok((boundaries, conflicts))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ElementKind, GameSection};

    fn element(seq: u64) -> ElementCore {
        ElementCore {
            id: format!("e{seq}"),
            seq,
            page: 1,
            kind: ElementKind::Text,
            text: format!("text {seq}"),
            layout: None,
        }
    }

    fn game_section(section_id: u32, start_seq: u64) -> GameSection {
        GameSection {
            section_id,
            start_seq,
            status: SectionStatus::Certain,
            text: None,
        }
    }

    fn structured(sections: Vec<GameSection>) -> SectionsStructured {
        SectionsStructured {
            macro_sections: vec![],
            game_sections: sections,
            warnings: vec![],
        }
    }

    #[test]
    fn test_end_seq_is_next_start_minus_one() {
        let elements: Vec<_> = (0..30).map(element).collect();
        let s = structured(vec![game_section(1, 5), game_section(2, 12), game_section(3, 20)]);
        let (boundaries, conflicts) = assemble(&s, &elements).unwrap();
        assert!(conflicts.conflicts.is_empty());
        assert_eq!(boundaries[0].end_seq, 11);
        assert_eq!(boundaries[1].end_seq, 19);
        // final section runs to the document end
        assert_eq!(boundaries[2].end_seq, 29);
    }

    #[test]
    fn test_boundaries_sorted_by_numeric_id() {
        let elements: Vec<_> = (0..30).map(element).collect();
        // section 10 appears before section 2 in the document
        let s = structured(vec![game_section(10, 5), game_section(2, 12)]);
        let (boundaries, _) = assemble(&s, &elements).unwrap();
        assert_eq!(boundaries[0].section_id, "2");
        assert_eq!(boundaries[1].section_id, "10");
        // document order still recoverable from start_seq
        assert!(boundaries[1].start_seq < boundaries[0].start_seq);
    }

    #[test]
    fn test_element_ids_mapped_over_gaps() {
        // element at seq 13 missing (filtered): span 12..=19 ends at e18
        let elements: Vec<_> = (0..30).filter(|s| *s != 13 && *s != 19).map(element).collect();
        let s = structured(vec![game_section(1, 12), game_section(2, 20)]);
        let (boundaries, _) = assemble(&s, &elements).unwrap();
        assert_eq!(boundaries[0].start_element_id, "e12");
        assert_eq!(boundaries[0].end_element_id, "e18");
    }

    #[test]
    fn test_duplicate_start_seq_recorded_not_repaired() {
        let elements: Vec<_> = (0..10).map(element).collect();
        let s = structured(vec![game_section(1, 5), game_section(2, 5)]);
        let (boundaries, conflicts) = assemble(&s, &elements).unwrap();
        assert_eq!(boundaries.len(), 2);
        assert_eq!(conflicts.conflicts.len(), 1);
        assert_eq!(conflicts.conflicts[0].first_section, "1");
        assert_eq!(conflicts.conflicts[0].second_start_seq, 5);
    }

    #[test]
    fn test_unknown_start_seq_is_invariant_error() {
        let elements: Vec<_> = (0..10).map(element).collect();
        let s = structured(vec![game_section(1, 99)]);
        let err = assemble(&s, &elements).unwrap_err();
        assert!(matches!(err, StageError::Invariant(_)));
    }

    #[test]
    fn test_spans_non_overlapping_in_document_order() {
        let elements: Vec<_> = (0..100).map(element).collect();
        let s = structured(vec![
            game_section(3, 10),
            game_section(1, 40),
            game_section(2, 70),
        ]);
        let (mut boundaries, conflicts) = assemble(&s, &elements).unwrap();
        assert!(conflicts.conflicts.is_empty());
        boundaries.sort_by_key(|b| b.start_seq);
        for pair in boundaries.windows(2) {
            assert!(pair[0].end_seq < pair[1].start_seq);
        }
    }
}
