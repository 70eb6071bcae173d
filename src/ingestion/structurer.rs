//! Global Structurer (pipeline stage)
//!
//! Stage 2 of boundary detection: one coherent structure for the whole
//! document, from the candidate stream. All semantic reconciliation
//! happens here, with document-wide context — not in independent local
//! passes. The model is instructed to keep `start_seq` strictly
//! increasing, keep `section_id` unique, cover the expected range as
//! completely as possible, and prefer `uncertain` over omitting.
//!
//! A violating model answer is retried once, then the deterministic
//! earliest-claim-wins chain takes over. Either way every emitted game
//! section is enriched with its full text slice — the "look at the actual
//! content" input the verifier depends on.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;

use crate::core::artifact;
use crate::core::llm::{ChatMessage, ChatRequest};
use crate::model::{
    ElementCore, GameSection, HeaderCandidate, MacroHeader, MacroSection, SectionStatus,
    SectionsStructured,
};
use crate::pipeline::stage::{PipelineStage, StageContext, StageOutcome, StageResult};

use super::header_classifier::HEADER_CANDIDATES;
use super::reducer::ELEMENTS_CORE;

pub const SECTIONS_STRUCTURED: &str = "sections_structured.json";

/// Candidates below this confidence do not seed the deterministic chain.
const FALLBACK_MIN_CONFIDENCE: f32 = 0.5;
/// Deterministic chain: claims at or above this are `certain`.
const CERTAIN_CONFIDENCE: f32 = 0.85;

const STRUCTURE_SYSTEM_PROMPT: &str = "You reconstruct the global structure \
of a scanned gamebook from header candidates. Reply with one JSON object: \
{\"macro_sections\": [{\"name\": \"cover|rules|front_matter|background|game_sections|endmatter\", \
\"start_seq\": <int>, \"end_seq\": <int or null>}], \"game_sections\": \
[{\"section_id\": <int>, \"start_seq\": <int>, \"status\": \"certain|uncertain\"}]}. \
Hard requirements: start_seq strictly increasing in document order; \
section_id unique; cover the expected section range as completely as \
possible; prefer status \"uncertain\" over omitting a section.";

#[derive(Debug, Deserialize)]
struct ModelStructure {
    #[serde(default)]
    macro_sections: Vec<ModelMacro>,
    #[serde(default)]
    game_sections: Vec<ModelGameSection>,
}

#[derive(Debug, Deserialize)]
struct ModelMacro {
    name: String,
    start_seq: u64,
    #[serde(default)]
    end_seq: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ModelGameSection {
    section_id: u32,
    start_seq: u64,
    #[serde(default)]
    status: Option<String>,
}

pub struct StructureSections;

#[async_trait]
impl PipelineStage for StructureSections {
    fn module_id(&self) -> &'static str {
        "structure_sections"
    }

    async fn run(&self, ctx: &StageContext) -> StageResult<StageOutcome> {
        let candidates: Vec<HeaderCandidate> =
            artifact::read_jsonl(ctx.inputs.require(HEADER_CANDIDATES)?)?;
        let elements: Vec<ElementCore> =
            artifact::read_jsonl(ctx.inputs.require(ELEMENTS_CORE)?)?;

        let positives: Vec<&HeaderCandidate> =
            candidates.iter().filter(|c| c.is_positive()).collect();

        let mut structured = None;
        if let Some(llm) = ctx.llm() {
            let request = build_request(&positives, ctx.book.expected_range);
            // One retry on an invariant-violating answer, then fall back.
            for attempt in 0..2u8 {
                match llm
                    .complete_json::<ModelStructure>(request.clone(), &ctx.meter)
                    .await
                {
                    Ok(model) => {
                        let converted = convert_model_structure(model, &elements);
                        let violations = converted.invariant_violations();
                        if violations.is_empty() {
                            structured = Some(converted);
                            break;
                        }
                        tracing::warn!(attempt, ?violations, "model structure violates invariants");
                        ctx.meter.record_warning();
                    }
                    Err(e) => {
                        tracing::warn!(attempt, error = %e, "structuring call failed");
                        ctx.meter.record_warning();
                        break;
                    }
                }
            }
        }

        let mut structured = match structured {
            Some(s) => s,
            None => {
                tracing::info!("using deterministic candidate chain");
                deterministic_structure(&positives)
            }
        };

        enrich_section_text(&mut structured, &elements);

        tracing::info!(
            macros = structured.macro_sections.len(),
            sections = structured.game_sections.len(),
            warnings = structured.warnings.len(),
            "document structured"
        );
        ctx.meter.record_items(structured.game_sections.len() as u64);
        ctx.store.write_json(SECTIONS_STRUCTURED, &structured)?;
        Ok(StageOutcome::Done)
    }
}

fn build_request(positives: &[&HeaderCandidate], range: (u32, u32)) -> ChatRequest {
    let mut listing = String::new();
    for c in positives {
        let text: String = c
            .text
            .as_deref()
            .unwrap_or("")
            .chars()
            .take(80)
            .collect();
        listing.push_str(&format!(
            "{{\"seq\": {}, \"macro\": {}, \"claimed\": {}, \"confidence\": {:.2}, \"text\": {}}}\n",
            c.seq,
            serde_json::to_string(&c.macro_header).unwrap_or_default(),
            c.claimed_section_number
                .map_or("null".to_string(), |n| n.to_string()),
            c.confidence,
            serde_json::to_string(&text).unwrap_or_default()
        ));
    }
    let user = format!(
        "Expected gameplay section range: {} to {}.\nHeader candidates:\n{listing}",
        range.0, range.1
    );
    ChatRequest::new(vec![
        ChatMessage::system(STRUCTURE_SYSTEM_PROMPT),
        ChatMessage::user(user),
    ])
    .with_temperature(0.0)
}

/// Convert the model answer, dropping rows that cannot be honored:
/// seqs that match no element, duplicate ids, and non-increasing starts
/// (earlier-in-document claim wins). Drops are recorded as warnings.
fn convert_model_structure(model: ModelStructure, elements: &[ElementCore]) -> SectionsStructured {
    let known_seqs: HashSet<u64> = elements.iter().map(|e| e.seq).collect();
    let mut warnings = Vec::new();
    let mut used_ids = HashSet::new();
    let mut last_seq: Option<u64> = None;
    let mut game_sections = Vec::new();

    let mut rows = model.game_sections;
    rows.sort_by_key(|r| r.start_seq);
    for row in rows {
        if !known_seqs.contains(&row.start_seq) {
            warnings.push(format!(
                "section {} claimed unknown seq {}",
                row.section_id, row.start_seq
            ));
            continue;
        }
        if !used_ids.insert(row.section_id) {
            warnings.push(format!(
                "duplicate claim for section {} at seq {} dropped",
                row.section_id, row.start_seq
            ));
            continue;
        }
        if last_seq.map_or(false, |prev| row.start_seq <= prev) {
            warnings.push(format!(
                "section {} at seq {} breaks document order",
                row.section_id, row.start_seq
            ));
            continue;
        }
        last_seq = Some(row.start_seq);
        game_sections.push(GameSection {
            section_id: row.section_id,
            start_seq: row.start_seq,
            status: match row.status.as_deref() {
                Some("certain") => SectionStatus::Certain,
                _ => SectionStatus::Uncertain,
            },
            text: None,
        });
    }

    SectionsStructured {
        macro_sections: model
            .macro_sections
            .into_iter()
            .map(|m| MacroSection {
                name: m.name,
                start_seq: m.start_seq,
                end_seq: m.end_seq,
            })
            .collect(),
        game_sections,
        warnings,
    }
}

/// The no-model path: walk candidates in document order and accept each
/// claimed number the first time it appears, keeping starts strictly
/// increasing. Later claims on the same number are dropped and flagged.
pub fn deterministic_structure(positives: &[&HeaderCandidate]) -> SectionsStructured {
    let mut sorted: Vec<&&HeaderCandidate> = positives.iter().collect();
    sorted.sort_by_key(|c| c.seq);

    let mut warnings = Vec::new();
    let mut used_ids = HashSet::new();
    let mut game_sections = Vec::new();
    let mut macro_sections: Vec<MacroSection> = Vec::new();

    for candidate in sorted {
        if candidate.macro_header != MacroHeader::None {
            let name = match serde_json::to_value(candidate.macro_header) {
                Ok(serde_json::Value::String(s)) => s,
                _ => continue,
            };
            if !macro_sections.iter().any(|m| m.name == name) {
                if let Some(prev) = macro_sections.last_mut() {
                    if prev.end_seq.is_none() && candidate.seq > 0 {
                        prev.end_seq = Some(candidate.seq - 1);
                    }
                }
                macro_sections.push(MacroSection {
                    name,
                    start_seq: candidate.seq,
                    end_seq: None,
                });
            }
        }

        if !candidate.game_section_header || candidate.confidence < FALLBACK_MIN_CONFIDENCE {
            continue;
        }
        let Some(section_id) = candidate.claimed_section_number else {
            continue;
        };
        if !used_ids.insert(section_id) {
            warnings.push(format!(
                "later claim for section {section_id} at seq {} dropped",
                candidate.seq
            ));
            continue;
        }
        game_sections.push(GameSection {
            section_id,
            start_seq: candidate.seq,
            status: if candidate.confidence >= CERTAIN_CONFIDENCE {
                SectionStatus::Certain
            } else {
                SectionStatus::Uncertain
            },
            text: None,
        });
    }

    SectionsStructured {
        macro_sections,
        game_sections,
        warnings,
    }
}

/// Slice each section's full text over `[start_seq, next.start_seq)`.
pub fn enrich_section_text(structured: &mut SectionsStructured, elements: &[ElementCore]) {
    let starts: Vec<u64> = structured.game_sections.iter().map(|g| g.start_seq).collect();
    for (idx, section) in structured.game_sections.iter_mut().enumerate() {
        let start = section.start_seq;
        let end = starts.get(idx + 1).copied();
        let text: Vec<&str> = elements
            .iter()
            .filter(|e| e.seq >= start && end.map_or(true, |n| e.seq < n))
            .map(|e| e.text.as_str())
            .collect();
        section.text = Some(text.join("\n"));
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ElementKind;

    fn candidate(seq: u64, number: u32, confidence: f32) -> HeaderCandidate {
        HeaderCandidate {
            seq,
            page: 1,
            macro_header: MacroHeader::None,
            game_section_header: true,
            claimed_section_number: Some(number),
            confidence,
            text: Some(number.to_string()),
        }
    }

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

    #[test]
    fn test_deterministic_chain_earlier_claim_wins() {
        let c1 = candidate(10, 5, 0.9);
        let c2 = candidate(20, 5, 0.95);
        let c3 = candidate(30, 6, 0.9);
        let refs: Vec<&HeaderCandidate> = vec![&c1, &c2, &c3];
        let s = deterministic_structure(&refs);
        assert_eq!(s.game_sections.len(), 2);
        assert_eq!(s.game_sections[0].start_seq, 10);
        assert_eq!(s.warnings.len(), 1);
        assert!(s.invariant_violations().is_empty());
    }

    #[test]
    fn test_deterministic_chain_confidence_threshold() {
        let c1 = candidate(10, 5, 0.3);
        let refs: Vec<&HeaderCandidate> = vec![&c1];
        let s = deterministic_structure(&refs);
        assert!(s.game_sections.is_empty());
    }

    #[test]
    fn test_deterministic_status_split() {
        let c1 = candidate(10, 5, 0.9);
        let c2 = candidate(20, 6, 0.7);
        let refs: Vec<&HeaderCandidate> = vec![&c1, &c2];
        let s = deterministic_structure(&refs);
        assert_eq!(s.game_sections[0].status, SectionStatus::Certain);
        assert_eq!(s.game_sections[1].status, SectionStatus::Uncertain);
    }

    #[test]
    fn test_convert_drops_unknown_seq_and_duplicates() {
        let elements = vec![element(10, "5"), element(20, "6")];
        let model = ModelStructure {
            macro_sections: vec![],
            game_sections: vec![
                ModelGameSection {
                    section_id: 5,
                    start_seq: 10,
                    status: Some("certain".into()),
                },
                ModelGameSection {
                    section_id: 5,
                    start_seq: 20,
                    status: None,
                },
                ModelGameSection {
                    section_id: 7,
                    start_seq: 99,
                    status: None,
                },
            ],
        };
        let s = convert_model_structure(model, &elements);
        assert_eq!(s.game_sections.len(), 1);
        assert_eq!(s.warnings.len(), 2);
        assert!(s.invariant_violations().is_empty());
    }

    #[test]
    fn test_enrich_slices_to_next_start() {
        let elements = vec![
            element(10, "5"),
            element(11, "You open the door."),
            element(20, "6"),
            element(21, "A troll waits."),
        ];
        let mut s = SectionsStructured {
            macro_sections: vec![],
            game_sections: vec![
                GameSection {
                    section_id: 5,
                    start_seq: 10,
                    status: SectionStatus::Certain,
                    text: None,
                },
                GameSection {
                    section_id: 6,
                    start_seq: 20,
                    status: SectionStatus::Certain,
                    text: None,
                },
            ],
            warnings: vec![],
        };
        enrich_section_text(&mut s, &elements);
        assert_eq!(s.game_sections[0].text.as_deref(), Some("5\nYou open the door."));
        assert_eq!(s.game_sections[1].text.as_deref(), Some("6\nA troll waits."));
    }

    #[test]
    fn test_macro_sections_first_occurrence_closes_previous() {
        let mut c1 = HeaderCandidate::none(5, 1);
        c1.macro_header = MacroHeader::Rules;
        c1.confidence = 0.9;
        let mut c2 = HeaderCandidate::none(50, 3);
        c2.macro_header = MacroHeader::GameSections;
        c2.confidence = 0.9;
        let refs: Vec<&HeaderCandidate> = vec![&c1, &c2];
        let s = deterministic_structure(&refs);
        assert_eq!(s.macro_sections.len(), 2);
        assert_eq!(s.macro_sections[0].name, "rules");
        assert_eq!(s.macro_sections[0].end_seq, Some(49));
        assert_eq!(s.macro_sections[1].name, "game_sections");
        assert_eq!(s.macro_sections[1].end_seq, None);
    }
}
