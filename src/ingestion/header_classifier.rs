//! Header Classifier (pipeline stage)
//!
//! Stage 1 of boundary detection: label every element with a candidate
//! verdict. Framed as candidate detection, not final decision — the global
//! structurer reconciles. The output is high recall, low precision by
//! design; on a 400-section book a few hundred candidates is the target,
//! not a defect.
//!
//! Three layers, each independent:
//! 1. batched model calls over the element stream, forward order
//! 2. the same batches in reverse order (redundancy; higher-confidence
//!    positive verdict wins per element)
//! 3. a numeric safety net that boosts standalone integers in the gameplay
//!    range, no model required

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use serde::Deserialize;

use crate::core::artifact;
use crate::core::llm::{ChatMessage, ChatRequest};
use crate::model::{ElementCore, HeaderCandidate, MacroHeader};
use crate::pipeline::stage::{PipelineStage, StageContext, StageOutcome, StageResult};

use super::reducer::ELEMENTS_CORE;

pub const HEADER_CANDIDATES: &str = "header_candidates.jsonl";

const DEFAULT_BATCH_SIZE: usize = 75;
const SAFETY_NET_CONFIDENCE: f32 = 0.7;

/// Context on the previous element that marks a numbered rules list rather
/// than a section header. Stat names alone are NOT rules context — normal
/// gameplay text mentions them constantly, right before real headers.
static RULES_CONTEXT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(dice|rules)\b|:\s*$").expect("rules context regex")
});

const CLASSIFY_SYSTEM_PROMPT: &str = "You label elements of a scanned \
gamebook as potential headers. Err on the side of marking potential \
headers as candidates; a later stage makes the final decision. Reply with \
a JSON array, one object per input element: {\"seq\": <int>, \
\"macro_header\": \"none|cover|rules|front_matter|background|game_sections|endmatter\", \
\"game_section_header\": <bool>, \"claimed_section_number\": <int or null>, \
\"confidence\": <0..1>}.";

/// Loose verdict shape accepted from the model.
#[derive(Debug, Deserialize)]
struct ModelVerdict {
    seq: u64,
    #[serde(default)]
    macro_header: Option<String>,
    #[serde(default)]
    game_section_header: bool,
    #[serde(default)]
    claimed_section_number: Option<u32>,
    #[serde(default)]
    confidence: f32,
}

pub struct ClassifyHeaders;

#[async_trait]
impl PipelineStage for ClassifyHeaders {
    fn module_id(&self) -> &'static str {
        "classify_headers"
    }

    async fn run(&self, ctx: &StageContext) -> StageResult<StageOutcome> {
        let elements: Vec<ElementCore> =
            artifact::read_jsonl(ctx.inputs.require(ELEMENTS_CORE)?)?;
        let batch_size = ctx.params.get_usize("batch_size", DEFAULT_BATCH_SIZE);
        let (range_lo, range_hi) = ctx.book.expected_range;

        // Start from a negative verdict for every element: exactly one
        // output row per input row, nothing invented.
        let mut candidates: HashMap<u64, HeaderCandidate> = elements
            .iter()
            .map(|e| (e.seq, HeaderCandidate::none(e.seq, e.page)))
            .collect();

        if let Some(llm) = ctx.llm() {
            let forward: Vec<&ElementCore> = elements.iter().collect();
            let backward: Vec<&ElementCore> = elements.iter().rev().collect();
            for pass in [forward, backward] {
                // Batches fan out concurrently; the service's semaphore
                // caps how many are actually in flight.
                let calls: Vec<_> = pass
                    .chunks(batch_size)
                    .map(|batch| {
                        llm.complete_json::<Vec<ModelVerdict>>(build_request(batch), &ctx.meter)
                    })
                    .collect();
                for result in futures::future::join_all(calls).await {
                    match result {
                        Ok(verdicts) => {
                            merge_verdicts(&mut candidates, verdicts, range_lo, range_hi)
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "header batch failed; relying on safety net");
                            ctx.meter.record_warning();
                        }
                    }
                }
            }
        }

        apply_numeric_safety_net(&mut candidates, &elements, range_lo, range_hi);

        // Merge original text on for readability, emit in document order.
        let mut rows: Vec<HeaderCandidate> = elements
            .iter()
            .map(|e| {
                let mut c = candidates
                    .remove(&e.seq)
                    .unwrap_or_else(|| HeaderCandidate::none(e.seq, e.page));
                c.text = Some(e.text.clone());
                c
            })
            .collect();
        rows.sort_by_key(|c| c.seq);

        let positives = rows.iter().filter(|c| c.is_positive()).count();
        tracing::info!(elements = rows.len(), positives, "header candidates written");
        ctx.meter.record_items(rows.len() as u64);
        ctx.store.write_jsonl(HEADER_CANDIDATES, &rows)?;
        Ok(StageOutcome::Done)
    }
}

fn build_request(batch: &[&ElementCore]) -> ChatRequest {
    let mut listing = String::new();
    for e in batch {
        let text: String = e.text.chars().take(120).collect();
        listing.push_str(&format!(
            "{{\"seq\": {}, \"page\": {}, \"text\": {}}}\n",
            e.seq,
            e.page,
            serde_json::to_string(&text).unwrap_or_default()
        ));
    }
    ChatRequest::new(vec![
        ChatMessage::system(CLASSIFY_SYSTEM_PROMPT),
        ChatMessage::user(listing),
    ])
    .with_temperature(0.0)
}

/// Fold a pass's verdicts in: the higher-confidence positive wins per seq.
/// Verdicts for unknown seqs are dropped — no candidate may be invented.
fn merge_verdicts(
    candidates: &mut HashMap<u64, HeaderCandidate>,
    verdicts: Vec<ModelVerdict>,
    range_lo: u32,
    range_hi: u32,
) {
    for v in verdicts {
        let Some(existing) = candidates.get_mut(&v.seq) else {
            continue;
        };
        let macro_header = parse_macro(v.macro_header.as_deref());
        let claimed = v
            .claimed_section_number
            .filter(|n| (range_lo..=range_hi).contains(n));
        let positive = v.game_section_header || macro_header != MacroHeader::None;
        if !positive {
            continue;
        }
        let existing_positive = existing.is_positive();
        if !existing_positive || v.confidence > existing.confidence {
            existing.macro_header = macro_header;
            existing.game_section_header = v.game_section_header;
            existing.claimed_section_number = claimed;
            existing.confidence = v.confidence.clamp(0.0, 1.0);
        }
    }
}

fn parse_macro(value: Option<&str>) -> MacroHeader {
    match value.map(str::trim) {
        Some("cover") => MacroHeader::Cover,
        Some("rules") => MacroHeader::Rules,
        Some("front_matter") => MacroHeader::FrontMatter,
        Some("background") => MacroHeader::Background,
        Some("game_sections") => MacroHeader::GameSections,
        Some("endmatter") => MacroHeader::Endmatter,
        _ => MacroHeader::None,
    }
}

/// Post-processing net: any standalone integer in the gameplay range is a
/// candidate unless its surroundings say rules list. OCR drops and model
/// misses both land here; better a false candidate than a silent miss.
pub fn apply_numeric_safety_net(
    candidates: &mut HashMap<u64, HeaderCandidate>,
    elements: &[ElementCore],
    range_lo: u32,
    range_hi: u32,
) {
    for (idx, element) in elements.iter().enumerate() {
        let Some(number) = element.standalone_number() else {
            continue;
        };
        if !(range_lo..=range_hi).contains(&number) {
            continue;
        }
        if let Some(prev) = idx.checked_sub(1).and_then(|i| elements.get(i)) {
            if RULES_CONTEXT_RE.is_match(&prev.text) {
                continue;
            }
        }
        if let Some(next) = elements.get(idx + 1) {
            if is_list_continuation(&next.text) {
                continue;
            }
        }
        if let Some(c) = candidates.get_mut(&element.seq) {
            c.game_section_header = true;
            if c.claimed_section_number.is_none() {
                c.claimed_section_number = Some(number);
            }
            if c.confidence < SAFETY_NET_CONFIDENCE {
                c.confidence = SAFETY_NET_CONFIDENCE;
            }
        }
    }
}

/// A short fragment starting lowercase reads as a list item's tail, not a
/// section body.
fn is_list_continuation(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.len() <= 40
        && trimmed
            .chars()
            .next()
            .map_or(false, |c| c.is_lowercase())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ElementKind;

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

    fn base_candidates(elements: &[ElementCore]) -> HashMap<u64, HeaderCandidate> {
        elements
            .iter()
            .map(|e| (e.seq, HeaderCandidate::none(e.seq, e.page)))
            .collect()
    }

    #[test]
    fn test_safety_net_boosts_standalone_number() {
        let elements = vec![
            element(0, "The corridor stretches ahead."),
            element(1, "117"),
            element(2, "You enter a dusty chamber."),
        ];
        let mut candidates = base_candidates(&elements);
        apply_numeric_safety_net(&mut candidates, &elements, 1, 400);
        let c = &candidates[&1];
        assert!(c.game_section_header);
        assert_eq!(c.claimed_section_number, Some(117));
        assert!(c.confidence >= 0.7);
    }

    #[test]
    fn test_safety_net_skips_rules_context() {
        let elements = vec![
            element(0, "Roll two dice and compare with your SKILL:"),
            element(1, "1"),
            element(2, "you hit the creature"),
        ];
        let mut candidates = base_candidates(&elements);
        apply_numeric_safety_net(&mut candidates, &elements, 1, 400);
        assert!(!candidates[&1].game_section_header);
    }

    #[test]
    fn test_safety_net_skips_list_continuation() {
        let elements = vec![
            element(0, "Provisions carried:"),
            element(1, "2"),
            element(2, "potions of fortune"),
        ];
        let mut candidates = base_candidates(&elements);
        apply_numeric_safety_net(&mut candidates, &elements, 1, 400);
        assert!(!candidates[&1].game_section_header);
    }

    #[test]
    fn test_safety_net_respects_range() {
        let elements = vec![element(0, "999")];
        let mut candidates = base_candidates(&elements);
        apply_numeric_safety_net(&mut candidates, &elements, 1, 400);
        assert!(!candidates[&0].game_section_header);
    }

    #[test]
    fn test_merge_keeps_higher_confidence_positive() {
        let elements = vec![element(0, "5")];
        let mut candidates = base_candidates(&elements);
        merge_verdicts(
            &mut candidates,
            vec![ModelVerdict {
                seq: 0,
                macro_header: None,
                game_section_header: true,
                claimed_section_number: Some(5),
                confidence: 0.6,
            }],
            1,
            400,
        );
        // Backward pass sees the same element with lower confidence.
        merge_verdicts(
            &mut candidates,
            vec![ModelVerdict {
                seq: 0,
                macro_header: None,
                game_section_header: true,
                claimed_section_number: Some(5),
                confidence: 0.4,
            }],
            1,
            400,
        );
        assert_eq!(candidates[&0].confidence, 0.6);
    }

    #[test]
    fn test_merge_never_invents_seqs() {
        let elements = vec![element(0, "5")];
        let mut candidates = base_candidates(&elements);
        merge_verdicts(
            &mut candidates,
            vec![ModelVerdict {
                seq: 99,
                macro_header: Some("rules".into()),
                game_section_header: false,
                claimed_section_number: None,
                confidence: 0.9,
            }],
            1,
            400,
        );
        assert_eq!(candidates.len(), 1);
        assert!(!candidates.contains_key(&99));
    }

    #[test]
    fn test_merge_drops_out_of_range_claims() {
        let elements = vec![element(0, "950")];
        let mut candidates = base_candidates(&elements);
        merge_verdicts(
            &mut candidates,
            vec![ModelVerdict {
                seq: 0,
                macro_header: None,
                game_section_header: true,
                claimed_section_number: Some(950),
                confidence: 0.9,
            }],
            1,
            400,
        );
        assert!(candidates[&0].game_section_header);
        assert_eq!(candidates[&0].claimed_section_number, None);
    }

    #[test]
    fn test_parse_macro_unknown_is_none() {
        assert_eq!(parse_macro(Some("weird")), MacroHeader::None);
        assert_eq!(parse_macro(Some("background")), MacroHeader::Background);
        assert_eq!(parse_macro(None), MacroHeader::None);
    }
}
