//! Escalation Loop (pipeline stage)
//!
//! Try → validate → escalate around choice extraction:
//! 1. the deterministic extractors already ran (the "try"),
//! 2. completeness + alignment + orphan tracing find what they missed,
//! 3. repair adds only choices it can ground: first deterministically from
//!    explicit "turn to N" references, then via a budgeted model pass for
//!    anything still flagged.
//!
//! Hard guard, both repair paths: a suggestion must be literally present
//! in the section's source, and an existing explicit numeric target is
//! never rewritten. If validation still fails after the attempt budget,
//! the flags land in the report and the game-ready gate fails — no silent
//! fix-ups.

pub mod completeness;
pub mod orphans;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::core::artifact;
use crate::core::llm::{ChatMessage, ChatRequest};
use crate::extraction::choices::sentence_around;
use crate::extraction::section_extractor::PORTIONS_ENRICHED;
use crate::extraction::sequence::PORTIONS_SEQUENCED;
use crate::model::{ChoiceRef, EnrichedPortion, Endpoint, Event, SequencedPortion};
use crate::pipeline::stage::{PipelineStage, StageContext, StageOutcome, StageResult};

use completeness::{
    validate_choice_completeness, validate_choice_text_alignment, AlignmentFlag, CompletenessFlag,
};
use orphans::{trace_orphans_text, OrphanTrace};

pub const PORTIONS_REPAIRED: &str = "portions_repaired.jsonl";
pub const REPAIR_REPORT: &str = "repair_report.json";

const DEFAULT_MAX_ATTEMPTS: u32 = 2;

// ============================================================================
// Report
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddedChoice {
    pub section_id: String,
    pub target: String,
    pub source: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepairReport {
    pub attempts: u32,
    #[serde(default)]
    pub added: Vec<AddedChoice>,
    #[serde(default)]
    pub flagged_remaining: Vec<CompletenessFlag>,
    #[serde(default)]
    pub alignment_flags: Vec<AlignmentFlag>,
    #[serde(default)]
    pub orphans_remaining: Vec<OrphanTrace>,
}

#[derive(Debug, Deserialize)]
struct ModelChoiceSuggestion {
    target: String,
    #[serde(default)]
    evidence: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelRepair {
    #[serde(default)]
    choices: Vec<ModelChoiceSuggestion>,
}

// ============================================================================
// Stage
// ============================================================================

pub struct RepairChoices;

#[async_trait]
impl PipelineStage for RepairChoices {
    fn module_id(&self) -> &'static str {
        "repair_choices"
    }

    async fn run(&self, ctx: &StageContext) -> StageResult<StageOutcome> {
        let enriched: Vec<EnrichedPortion> =
            artifact::read_jsonl(ctx.inputs.require(PORTIONS_ENRICHED)?)?;
        let mut sequenced: Vec<SequencedPortion> =
            artifact::read_jsonl(ctx.inputs.require(PORTIONS_SEQUENCED)?)?;
        let max_attempts = ctx.params.get_u32("max_attempts", DEFAULT_MAX_ATTEMPTS);

        let by_id: HashMap<&str, &EnrichedPortion> =
            enriched.iter().map(|e| (e.section_id.as_str(), e)).collect();

        let mut report = RepairReport::default();

        for attempt in 1..=max_attempts {
            report.attempts = attempt;
            let flags: Vec<CompletenessFlag> = sequenced
                .iter()
                .filter_map(|s| {
                    by_id
                        .get(s.section_id.as_str())
                        .and_then(|e| validate_choice_completeness(e, s))
                })
                .collect();
            if flags.is_empty() {
                break;
            }

            let mut progressed = false;
            for flag in &flags {
                let Some(enriched_portion) = by_id.get(flag.section_id.as_str()) else {
                    continue;
                };
                let Some(portion) = sequenced
                    .iter_mut()
                    .find(|s| s.section_id == flag.section_id)
                else {
                    continue;
                };
                for target in &flag.missing_targets {
                    if deterministic_repair(portion, enriched_portion, target) {
                        report.added.push(AddedChoice {
                            section_id: flag.section_id.clone(),
                            target: target.clone(),
                            source: "deterministic".to_string(),
                        });
                        progressed = true;
                    }
                }
            }

            if !progressed {
                // Deterministic repair found nothing new; one model pass
                // over what remains, then stop either way.
                if let Some(llm) = ctx.llm() {
                    for flag in &flags {
                        let Some(enriched_portion) = by_id.get(flag.section_id.as_str()) else {
                            continue;
                        };
                        let request = repair_request(enriched_portion, &flag.missing_targets);
                        let Ok(repair) = llm
                            .complete_json::<ModelRepair>(request, &ctx.meter)
                            .await
                        else {
                            continue;
                        };
                        let Some(portion) = sequenced
                            .iter_mut()
                            .find(|s| s.section_id == flag.section_id)
                        else {
                            continue;
                        };
                        for suggestion in repair.choices {
                            if accept_suggestion(portion, enriched_portion, &suggestion) {
                                report.added.push(AddedChoice {
                                    section_id: flag.section_id.clone(),
                                    target: suggestion.target.clone(),
                                    source: "ai".to_string(),
                                });
                            }
                        }
                    }
                }
                break;
            }
        }

        report.flagged_remaining = sequenced
            .iter()
            .filter_map(|s| {
                by_id
                    .get(s.section_id.as_str())
                    .and_then(|e| validate_choice_completeness(e, s))
            })
            .collect();
        report.alignment_flags = sequenced
            .iter()
            .flat_map(validate_choice_text_alignment)
            .collect();
        report.orphans_remaining = trace_orphans_text(&enriched, &sequenced)
            .into_iter()
            .filter(|t| !t.text_sources.is_empty())
            .collect();

        tracing::info!(
            added = report.added.len(),
            remaining = report.flagged_remaining.len(),
            attempts = report.attempts,
            "choice repair finished"
        );
        for _ in &report.flagged_remaining {
            ctx.meter.record_warning();
        }
        ctx.store.write_jsonl(PORTIONS_REPAIRED, &sequenced)?;
        ctx.store.write_json(REPAIR_REPORT, &report)?;
        Ok(StageOutcome::Done)
    }
}

/// Add a choice for `target` when the section source literally says
/// "turn to <target>" and no existing event already covers it.
fn deterministic_repair(
    portion: &mut SequencedPortion,
    enriched: &EnrichedPortion,
    target: &str,
) -> bool {
    let needle = format!("turn to {target}");
    let Some(offset) = enriched.raw_html.to_lowercase().find(&needle) else {
        return false;
    };
    if portion
        .sequence
        .iter()
        .any(|e| e.target_sections().contains(&target.to_string()))
    {
        return false;
    }
    portion.sequence.push(Event::Choice {
        endpoint: Endpoint::target(target),
        choice_text: Some(sentence_around(&enriched.raw_html, offset)),
        effects: None,
    });
    portion.choices.push(ChoiceRef {
        target: target.to_string(),
        anchor_text: None,
        offset: Some(offset),
    });
    true
}

/// The grounding guard for model suggestions: the target must appear as an
/// explicit number in the source, no existing explicit target may be
/// contradicted, and duplicates are dropped.
fn accept_suggestion(
    portion: &mut SequencedPortion,
    enriched: &EnrichedPortion,
    suggestion: &ModelChoiceSuggestion,
) -> bool {
    let target = suggestion.target.trim();
    if target.is_empty() || target.parse::<u32>().is_err() {
        return false;
    }
    let explicit_refs = completeness::text_references(&enriched.raw_html);
    if !explicit_refs.iter().any(|r| r == target)
        && !enriched.raw_html.contains(target)
    {
        return false;
    }
    // Never contradict an explicit numeric target: if the quoted evidence
    // names a different section, the suggestion is rewriting it.
    if let Some(evidence) = &suggestion.evidence {
        let evidence_refs = completeness::text_references(evidence);
        if !evidence_refs.is_empty() && !evidence_refs.iter().any(|r| r == target) {
            return false;
        }
    }
    if portion
        .sequence
        .iter()
        .any(|e| e.target_sections().contains(&target.to_string()))
    {
        return false;
    }
    portion.sequence.push(Event::Choice {
        endpoint: Endpoint::target(target),
        choice_text: suggestion.evidence.clone(),
        effects: None,
    });
    portion.choices.push(ChoiceRef {
        target: target.to_string(),
        anchor_text: None,
        offset: None,
    });
    true
}

fn repair_request(enriched: &EnrichedPortion, missing: &[String]) -> ChatRequest {
    ChatRequest::new(vec![
        ChatMessage::system(
            "A gamebook section references choices its extraction missed. Suggest \
             only choices you can quote from the section text. Never change a \
             numeric target that appears in the text. Reply with JSON: \
             {\"choices\": [{\"target\": \"<section number>\", \"evidence\": \"<quote>\"}]}.",
        ),
        ChatMessage::user(format!(
            "Uncovered targets: {missing:?}\nSection source:\n{}",
            enriched.raw_html
        )),
    ])
    .with_temperature(0.0)
}

// ============================================================================
// Tests
// ============================================================================
