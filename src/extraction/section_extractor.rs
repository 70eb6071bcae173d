//! Section Extractor (pipeline stage)
//!
//! Slices each bounded section out of the document and runs the
//! deterministic extractors over it in a fixed order: choices, stat
//! modifications, stat checks, item events, condition checks, combat,
//! terminal outcomes. Evidence-only: every emitted event carries the
//! snippet that produced it, at its offset in the extraction source.
//! The background macro region, when structured, becomes a `background`
//! portion alongside the numbered ones.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::core::artifact;
use crate::model::{
    ChoiceRef, ElementCore, EnrichedPortion, Event, ExtractedEvent, PageHtml, SectionBoundary,
    SectionsStructured, BACKGROUND_SECTION_ID,
};
use crate::pipeline::stage::{PipelineStage, StageContext, StageOutcome, StageResult};

use super::choices::extract_choices;
use super::combat::extract_combat;
use super::html::{index_pages, page_warnings, section_source};
use super::items::{extract_condition_checks, extract_item_events};
use super::stats::{extract_stat_changes, extract_stat_checks};
use super::target::normalize_target;
use super::terminals::extract_terminals;
use crate::ingestion::boundary_assembler::SECTION_BOUNDARIES;
use crate::ingestion::reducer::ELEMENTS_CORE;
use crate::ingestion::structurer::SECTIONS_STRUCTURED;

pub const PAGES_IN: &str = "pages.jsonl";
pub const PORTIONS_ENRICHED: &str = "portions_enriched.jsonl";

/// Continuation risk above this suggests a page-split casualty.
const REOCR_RISK_THRESHOLD: f32 = 0.8;

pub struct ExtractSections;

#[async_trait]
impl PipelineStage for ExtractSections {
    fn module_id(&self) -> &'static str {
        "extract_sections"
    }

    async fn run(&self, ctx: &StageContext) -> StageResult<StageOutcome> {
        let boundaries: Vec<SectionBoundary> =
            artifact::read_jsonl(ctx.inputs.require(SECTION_BOUNDARIES)?)?;
        let elements: Vec<ElementCore> =
            artifact::read_jsonl(ctx.inputs.require(ELEMENTS_CORE)?)?;
        let structured: SectionsStructured =
            artifact::read_json(ctx.inputs.require(SECTIONS_STRUCTURED)?)?;
        let pages = match ctx.inputs.get(PAGES_IN) {
            Some(path) if path.exists() => index_pages(artifact::read_jsonl(path)?),
            _ => BTreeMap::new(),
        };
        let reocr_toggle = ctx.params.get_bool("reocr_on_continuation_risk", false);

        // Document order for extraction; the artifact keeps that order.
        let mut doc_order: Vec<&SectionBoundary> = boundaries.iter().collect();
        doc_order.sort_by_key(|b| b.start_seq);

        let mut portions = Vec::with_capacity(doc_order.len() + 1);
        if let Some(bg) = background_boundary(&structured, &elements, &doc_order) {
            portions.push(extract_portion(&bg, &elements, &pages, None, reocr_toggle));
        }
        for (idx, boundary) in doc_order.iter().enumerate() {
            let next_id = doc_order.get(idx + 1).map(|b| b.section_id.as_str());
            portions.push(extract_portion(
                boundary,
                &elements,
                &pages,
                next_id,
                reocr_toggle,
            ));
        }

        let events: usize = portions.iter().map(|p| p.extracted.len()).sum();
        tracing::info!(sections = portions.len(), events, "sections extracted");
        ctx.meter.record_items(portions.len() as u64);
        for portion in &portions {
            for _ in &portion.warnings {
                ctx.meter.record_warning();
            }
        }
        ctx.store.write_jsonl(PORTIONS_ENRICHED, &portions)?;
        Ok(StageOutcome::Done)
    }
}

/// The background macro region as a synthetic boundary ending where the
/// first numbered section starts.
fn background_boundary(
    structured: &SectionsStructured,
    elements: &[ElementCore],
    doc_order: &[&SectionBoundary],
) -> Option<SectionBoundary> {
    let region = structured
        .macro_sections
        .iter()
        .find(|m| m.name == "background")?;
    let first_game_start = doc_order.first().map(|b| b.start_seq);
    let end_seq = region
        .end_seq
        .or_else(|| first_game_start.map(|s| s.saturating_sub(1)))
        .unwrap_or(region.start_seq);
    let start = elements.iter().find(|e| e.seq >= region.start_seq)?;
    let end = elements
        .iter()
        .filter(|e| e.seq >= region.start_seq && e.seq <= end_seq)
        .last()?;
    Some(SectionBoundary {
        section_id: BACKGROUND_SECTION_ID.to_string(),
        start_element_id: start.id.clone(),
        end_element_id: end.id.clone(),
        start_seq: start.seq,
        end_seq: end.seq,
        source: crate::model::BoundarySource::Override,
    })
}

/// Run every extractor over one section.
pub fn extract_portion(
    boundary: &SectionBoundary,
    elements: &[ElementCore],
    pages: &BTreeMap<u32, PageHtml>,
    next_id: Option<&str>,
    reocr_toggle: bool,
) -> EnrichedPortion {
    let slice: Vec<&ElementCore> = elements
        .iter()
        .filter(|e| e.seq >= boundary.start_seq && e.seq <= boundary.end_seq)
        .collect();
    let element_ids: Vec<String> = slice.iter().map(|e| e.id.clone()).collect();
    let page_start = slice.iter().map(|e| e.page).min().unwrap_or(0);
    let page_end = slice.iter().map(|e| e.page).max().unwrap_or(0);

    let (raw_text, raw_html) = section_source(boundary, elements, pages, next_id);
    let source = &raw_html;

    let mut extracted: Vec<ExtractedEvent> = Vec::new();
    let mut choices: Vec<ChoiceRef> = Vec::new();

    // 1. choices
    for m in extract_choices(source) {
        let Some(endpoint) = normalize_target(&m.target) else {
            continue;
        };
        choices.push(ChoiceRef {
            target: m.target.clone(),
            anchor_text: m.anchor_text.clone(),
            offset: Some(m.offset),
        });
        extracted.push(ExtractedEvent {
            offset: m.offset,
            evidence: m.evidence,
            event: Event::Choice {
                endpoint,
                choice_text: m.choice_text,
                effects: None,
            },
        });
    }

    // 2..7. mechanical events, each over the full section source
    extracted.extend(extract_stat_changes(source));
    extracted.extend(extract_stat_checks(source));
    extracted.extend(extract_item_events(source));
    extracted.extend(extract_condition_checks(source));
    extracted.extend(extract_combat(source));
    extracted.extend(extract_terminals(source));

    extracted.sort_by_key(|e| e.offset);

    let (mut warnings, risk) = page_warnings(pages, page_start, page_end);
    let reocr_suggested = reocr_toggle && risk >= REOCR_RISK_THRESHOLD && choices.is_empty();
    if reocr_suggested {
        warnings.push(format!(
            "continuation_risk {risk:.2} with no outgoing choices; re-OCR suggested"
        ));
    }

    EnrichedPortion {
        section_id: boundary.section_id.clone(),
        raw_text,
        raw_html,
        element_ids,
        page_start,
        page_end,
        choices,
        extracted,
        warnings,
        reocr_suggested,
    }
}

// ============================================================================
// Tests
// ============================================================================
