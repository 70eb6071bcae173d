//! Sequence Ordering (pipeline stage)
//!
//! Turns a section's extracted events into its final `sequence`, in
//! source-text order. Position comes from anchor/phrase offsets in the
//! extraction source; mechanical events sit where their triggering text
//! sits. The transforms, in order:
//!
//! 1. "If you are still alive" stat changes become no-ops — survival is a
//!    global engine rule, not a per-section event.
//! 2. Identical stat changes at the same position dedupe.
//! 3. "If you have X, lose N STAMINA ... turn to T" folds into a
//!    `conditional` with the stat change, any item removal, and the choice
//!    inside `then`.
//! 4. Choices that restate a check/combat branch endpoint collapse into
//!    that event's branch; combat outcome choices always trail the combat.
//! 5. Optional-take: a choice saying "take the X" absorbs X's otherwise
//!    unconditional add as a choice effect.
//! 6. `background` keeps only navigation and always ends with a choice to
//!    section 1.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

use crate::core::artifact;
use crate::model::{
    Condition, EnrichedPortion, Event, ExtractedEvent, ItemAction, ItemEvent, SequencedPortion,
    BACKGROUND_SECTION_ID,
};
use crate::pipeline::stage::{PipelineStage, StageContext, StageOutcome, StageResult};

use super::choices::sentence_around;
use super::items::extract_item_events;
use super::section_extractor::PORTIONS_ENRICHED;
use super::stats::extract_stat_changes;
use super::target::normalize_target;

pub const PORTIONS_SEQUENCED: &str = "portions_sequenced.jsonl";

/// Window after a branching event in which a choice restating one of its
/// targets is the same branch, not a second edge.
const BRANCH_WINDOW: usize = 400;

/// `If you have <item>, <body with stat loss> turn to T`.
static CONDITIONAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\bif\s+you\s+have\s+(?:the\s+|a\s+|an\s+)?(?P<item>[a-z'\- ]{2,40}?),\s+(?P<body>[^.]{0,160}?)\bturn\s+to\s+(?P<target>\d{1,4})",
    )
    .expect("conditional regex")
});

static TAKE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\btake\s+(?:the\s+|a\s+|an\s+)?(?P<item>[a-z'\- ]{2,40})")
        .expect("take regex")
});

static STILL_ALIVE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bstill\s+alive\b").expect("still alive regex"));

pub struct OrderSequences;

#[async_trait]
impl PipelineStage for OrderSequences {
    fn module_id(&self) -> &'static str {
        "order_sequences"
    }

    async fn run(&self, ctx: &StageContext) -> StageResult<StageOutcome> {
        let portions: Vec<EnrichedPortion> =
            artifact::read_jsonl(ctx.inputs.require(PORTIONS_ENRICHED)?)?;

        let sequenced: Vec<SequencedPortion> = portions.iter().map(build_sequence).collect();

        let events: usize = sequenced.iter().map(|p| p.sequence.len()).sum();
        tracing::info!(sections = sequenced.len(), events, "sequences ordered");
        ctx.meter.record_items(sequenced.len() as u64);
        ctx.store.write_jsonl(PORTIONS_SEQUENCED, &sequenced)?;
        Ok(StageOutcome::Done)
    }
}

/// The whole transform for one section, pure and deterministic.
pub fn build_sequence(portion: &EnrichedPortion) -> SequencedPortion {
    let source = &portion.raw_html;
    let mut events: Vec<ExtractedEvent> = portion.extracted.clone();
    let mut warnings = portion.warnings.clone();

    drop_still_alive_changes(&mut events, source);
    dedupe_stat_changes(&mut events);
    fold_conditionals(&mut events, source);
    collapse_branch_choices(&mut events);
    attach_optional_takes(&mut events);

    if portion.section_id == BACKGROUND_SECTION_ID {
        apply_background_rules(&mut events);
    }

    events.sort_by_key(|e| e.offset);
    let sequence: Vec<Event> = events.into_iter().map(|e| e.event).collect();

    if sequence.is_empty() && portion.section_id != BACKGROUND_SECTION_ID {
        warnings.push("section has no gameplay events".to_string());
    }

    SequencedPortion {
        section_id: portion.section_id.clone(),
        section_num: portion.section_id.parse().ok(),
        text: portion.raw_text.clone(),
        clean_text: clean_text(&portion.raw_text, &portion.section_id),
        page_start: portion.page_start,
        page_end: portion.page_end,
        choices: portion.choices.clone(),
        sequence,
        warnings,
    }
}

/// Rule 1: survival is global (STAMINA <= 0 ends the game); a stat change
/// guarded by "if you are still alive" says nothing the engine needs.
fn drop_still_alive_changes(events: &mut Vec<ExtractedEvent>, source: &str) {
    events.retain(|e| {
        if !matches!(e.event, Event::StatChange { .. }) {
            return true;
        }
        !STILL_ALIVE_RE.is_match(&sentence_around(source, e.offset))
    });
}

/// Rule 2: same stat, same delta, same position — one event.
fn dedupe_stat_changes(events: &mut Vec<ExtractedEvent>) {
    let mut seen: HashSet<String> = HashSet::new();
    events.retain(|e| match &e.event {
        Event::StatChange { stat, amount, .. } => seen.insert(format!(
            "{:?}|{}|{}",
            stat,
            serde_json::to_string(amount).unwrap_or_default(),
            e.offset
        )),
        _ => true,
    });
}

/// Rule 3: the conditional pattern. Standalone events inside the matched
/// span are replaced by one `conditional`.
fn fold_conditionals(events: &mut Vec<ExtractedEvent>, source: &str) {
    for cap in CONDITIONAL_RE.captures_iter(source) {
        let whole = cap.get(0).expect("match 0");
        let body = &cap["body"];
        let stat_changes = extract_stat_changes(body);
        if stat_changes.is_empty() {
            continue;
        }
        let Some(endpoint) = normalize_target(&cap["target"]) else {
            continue;
        };

        let mut then: Vec<Event> = stat_changes.into_iter().map(|e| e.event).collect();
        then.extend(
            extract_item_events(body)
                .into_iter()
                .filter(|e| matches!(e.event, Event::Item { action: ItemAction::Remove, .. }))
                .map(|e| e.event),
        );
        then.push(Event::Choice {
            endpoint,
            choice_text: None,
            effects: None,
        });

        // The folded span's standalone events are absorbed.
        let span = whole.start()..whole.end() + 1;
        let else_branch = events.iter().find_map(|e| match &e.event {
            Event::ItemCheck { missing, .. } if span.contains(&e.offset) => missing.clone(),
            _ => None,
        });
        events.retain(|e| !span.contains(&e.offset));
        events.push(ExtractedEvent {
            offset: whole.start(),
            evidence: whole.as_str().to_string(),
            event: Event::Conditional {
                condition: Condition {
                    item: Some(cap["item"].trim().to_lowercase()),
                    state: None,
                },
                then,
                r#else: else_branch.map(|endpoint| {
                    vec![Event::Choice {
                        endpoint,
                        choice_text: None,
                        effects: None,
                    }]
                }),
            },
        });
    }
}

/// Rule 4: a choice restating a branch endpoint of a nearby check, luck
/// test, or combat collapses into that branch. Combat outcome choices in
/// particular must not appear before (or beside) the combat event. A
/// standalone death event inside the window of an event that already
/// carries a terminal branch ("If you lose, you are dead") collapses the
/// same way.
fn collapse_branch_choices(events: &mut Vec<ExtractedEvent>) {
    struct BranchSpan {
        start: usize,
        end: usize,
        targets: Vec<String>,
        has_terminal: bool,
    }

    let branch_spans: Vec<BranchSpan> = events
        .iter()
        .filter_map(|e| match &e.event {
            Event::ItemCheck { .. }
            | Event::StateCheck { .. }
            | Event::TestLuck { .. }
            | Event::StatCheck { .. }
            | Event::Combat { .. }
            | Event::Conditional { .. } => {
                let mut has_terminal = false;
                e.event.walk_endpoints(&mut |endpoint| {
                    if endpoint.target_section().is_none() {
                        has_terminal = true;
                    }
                });
                Some(BranchSpan {
                    start: e.offset,
                    end: e.offset + e.evidence.len() + BRANCH_WINDOW,
                    targets: e.event.target_sections(),
                    has_terminal,
                })
            }
            _ => None,
        })
        .collect();

    events.retain(|e| match &e.event {
        Event::Choice { endpoint, .. } => {
            let Some(target) = endpoint.target_section() else {
                return true;
            };
            !branch_spans.iter().any(|span| {
                e.offset >= span.start
                    && e.offset < span.end
                    && span.targets.iter().any(|t| t == target)
            })
        }
        Event::Death { .. } => !branch_spans
            .iter()
            .any(|span| span.has_terminal && e.offset >= span.start && e.offset < span.end),
        _ => true,
    });
}

/// Rule 5: optional-take rewriting. The set of events is unchanged; only
/// the add's attachment moves.
fn attach_optional_takes(events: &mut Vec<ExtractedEvent>) {
    let adds: Vec<(usize, String)> = events
        .iter()
        .enumerate()
        .filter_map(|(idx, e)| match &e.event {
            Event::Item {
                action: ItemAction::Add,
                name,
            } => Some((idx, name.clone())),
            _ => None,
        })
        .collect();
    if adds.is_empty() {
        return;
    }

    let mut consumed: Vec<usize> = Vec::new();
    for event in events.iter_mut() {
        let Event::Choice {
            choice_text: Some(text),
            effects,
            ..
        } = &mut event.event
        else {
            continue;
        };
        let Some(cap) = TAKE_RE.captures(text) else {
            continue;
        };
        let wanted = cap["item"].trim().to_lowercase();
        if let Some((idx, name)) = adds
            .iter()
            .find(|(idx, name)| !consumed.contains(idx) && wanted.contains(name.as_str()))
        {
            effects
                .get_or_insert_with(Vec::new)
                .push(ItemEvent {
                    action: ItemAction::Add,
                    name: name.clone(),
                });
            consumed.push(*idx);
        }
    }

    let mut idx = 0;
    events.retain(|_| {
        let keep = !consumed.contains(&idx);
        idx += 1;
        keep
    });
}

/// Rule 6: background is narrative; only navigation survives, and it
/// always leads to section 1.
fn apply_background_rules(events: &mut Vec<ExtractedEvent>) {
    events.retain(|e| matches!(e.event, Event::Choice { .. }));
    let has_link_to_one = events.iter().any(|e| match &e.event {
        Event::Choice { endpoint, .. } => endpoint.target_section() == Some("1"),
        _ => false,
    });
    if !has_link_to_one {
        let offset = events.iter().map(|e| e.offset).max().map_or(0, |o| o + 1);
        events.push(ExtractedEvent {
            offset,
            evidence: String::new(),
            event: Event::choice_to("1"),
        });
    }
}

/// Body text with the numeric header line dropped and whitespace
/// collapsed.
fn clean_text(raw: &str, section_id: &str) -> String {
    let mut lines: Vec<&str> = raw.lines().collect();
    if let Some(first) = lines.first() {
        let trimmed = first.trim().trim_end_matches('.');
        if trimmed == section_id {
            lines.remove(0);
        }
    }
    lines
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Amount, Endpoint, Stat};

    fn portion(id: &str, source: &str, extracted: Vec<ExtractedEvent>) -> EnrichedPortion {
        EnrichedPortion {
            section_id: id.to_string(),
            raw_text: source.to_string(),
            raw_html: source.to_string(),
            element_ids: vec![],
            page_start: 1,
            page_end: 1,
            choices: vec![],
            extracted,
            warnings: vec![],
            reocr_suggested: false,
        }
    }

    fn choice_at(offset: usize, target: &str, text: &str) -> ExtractedEvent {
        ExtractedEvent {
            offset,
            evidence: format!("turn to {target}"),
            event: Event::Choice {
                endpoint: Endpoint::target(target),
                choice_text: Some(text.to_string()),
                effects: None,
            },
        }
    }

    #[test]
    fn test_events_emitted_in_offset_order() {
        let p = portion(
            "1",
            "padding text long enough for offsets to make sense here",
            vec![
                choice_at(30, "177", "hide"),
                choice_at(4, "392", "flee"),
                choice_at(12, "200", "fight"),
            ],
        );
        let s = build_sequence(&p);
        let targets: Vec<String> = s
            .sequence
            .iter()
            .flat_map(|e| e.target_sections())
            .collect();
        assert_eq!(targets, vec!["392", "200", "177"]);
    }

    #[test]
    fn test_still_alive_stat_change_dropped() {
        let source = "If you are still alive, lose 2 STAMINA and stagger on. Turn to 40.";
        let offset = source.find("lose").unwrap();
        let p = portion(
            "7",
            source,
            vec![
                ExtractedEvent {
                    offset,
                    evidence: "lose 2 STAMINA".into(),
                    event: Event::StatChange {
                        stat: Stat::Stamina,
                        amount: Amount::Fixed(-2),
                        permanent: None,
                    },
                },
                choice_at(source.find("Turn to").unwrap(), "40", "go on"),
            ],
        );
        let s = build_sequence(&p);
        assert_eq!(s.sequence.len(), 1);
        assert_eq!(s.sequence[0].kind(), "choice");
    }

    #[test]
    fn test_duplicate_stat_changes_dedupe_idempotently() {
        let ev = ExtractedEvent {
            offset: 10,
            evidence: "lose 2 STAMINA".into(),
            event: Event::StatChange {
                stat: Stat::Stamina,
                amount: Amount::Fixed(-2),
                permanent: None,
            },
        };
        let p = portion("7", "x lose 2 STAMINA y", vec![ev.clone(), ev.clone()]);
        let once = build_sequence(&p);
        assert_eq!(once.sequence.len(), 1);
        // idempotence: running over an already-deduped set changes nothing
        let p2 = portion("7", "x lose 2 STAMINA y", vec![ev]);
        assert_eq!(build_sequence(&p2).sequence, once.sequence);
    }

    #[test]
    fn test_conditional_folding() {
        let source = "If you have the lantern, lose 2 STAMINA and then turn to 30. Otherwise walk on.";
        let stat_offset = source.find("lose").unwrap();
        let choice_offset = source.find("turn to").unwrap();
        let p = portion(
            "9",
            source,
            vec![
                ExtractedEvent {
                    offset: stat_offset,
                    evidence: "lose 2 STAMINA".into(),
                    event: Event::StatChange {
                        stat: Stat::Stamina,
                        amount: Amount::Fixed(-2),
                        permanent: None,
                    },
                },
                choice_at(choice_offset, "30", "press on"),
            ],
        );
        let s = build_sequence(&p);
        assert_eq!(s.sequence.len(), 1);
        match &s.sequence[0] {
            Event::Conditional { condition, then, .. } => {
                assert_eq!(condition.item.as_deref(), Some("lantern"));
                assert_eq!(then.len(), 2);
                assert_eq!(then[0].kind(), "stat_change");
                assert_eq!(then[1].kind(), "choice");
                assert_eq!(then[1].target_sections(), vec!["30"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_branch_choice_collapses_into_check() {
        let source = "If you have a lantern, turn to 57.";
        let check_offset = 0;
        let choice_offset = source.find("turn to").unwrap();
        let p = portion(
            "9",
            source,
            vec![
                ExtractedEvent {
                    offset: check_offset,
                    evidence: source.to_string(),
                    event: Event::ItemCheck {
                        item_name: Some("lantern".into()),
                        items_all: None,
                        has: Some(Endpoint::target("57")),
                        missing: None,
                    },
                },
                choice_at(choice_offset, "57", "use the lantern"),
            ],
        );
        let s = build_sequence(&p);
        assert_eq!(s.sequence.len(), 1);
        assert_eq!(s.sequence[0].kind(), "item_check");
    }

    #[test]
    fn test_combat_outcome_choice_not_duplicated() {
        let source = "TROLL  SKILL 8  STAMINA 7. If you win, turn to 90.";
        let p = portion(
            "9",
            source,
            vec![
                ExtractedEvent {
                    offset: 0,
                    evidence: "TROLL  SKILL 8  STAMINA 7".into(),
                    event: Event::Combat {
                        enemies: vec![crate::model::Enemy {
                            name: "TROLL".into(),
                            skill: 8,
                            stamina: 7,
                        }],
                        outcomes: Some(crate::model::CombatOutcomes {
                            win: Some(Endpoint::target("90")),
                            lose: None,
                            escape: None,
                        }),
                    },
                },
                choice_at(source.find("turn to").unwrap(), "90", "If you win"),
            ],
        );
        let s = build_sequence(&p);
        assert_eq!(s.sequence.len(), 1);
        assert_eq!(s.sequence[0].kind(), "combat");
    }

    #[test]
    fn test_optional_take_moves_add_onto_choice() {
        let source = "A jewelled sword lies here. Put the sword in your backpack. \
                      If you take the sword, turn to 55. If you leave it, turn to 56.";
        let add_offset = source.find("Put").unwrap();
        let p = portion(
            "12",
            source,
            vec![
                ExtractedEvent {
                    offset: add_offset,
                    evidence: "Put the sword in your backpack".into(),
                    event: Event::Item {
                        action: ItemAction::Add,
                        name: "sword".into(),
                    },
                },
                choice_at(
                    source.find("turn to 55").unwrap(),
                    "55",
                    "If you take the sword",
                ),
                choice_at(
                    source.find("turn to 56").unwrap(),
                    "56",
                    "If you leave it",
                ),
            ],
        );
        let s = build_sequence(&p);
        // the standalone add is gone; same event count minus one
        assert_eq!(s.sequence.len(), 2);
        match &s.sequence[0] {
            Event::Choice { effects, .. } => {
                let effects = effects.as_ref().unwrap();
                assert_eq!(effects[0].name, "sword");
                assert_eq!(effects[0].action, ItemAction::Add);
            }
            other => panic!("unexpected {other:?}"),
        }
        // the leave choice keeps no effects
        match &s.sequence[1] {
            Event::Choice { effects, .. } => assert!(effects.is_none()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_background_appends_choice_to_one() {
        let p = portion(BACKGROUND_SECTION_ID, "Long ago...", vec![]);
        let s = build_sequence(&p);
        assert_eq!(s.sequence.len(), 1);
        assert_eq!(s.sequence[0], Event::choice_to("1"));
    }

    #[test]
    fn test_background_drops_inventory_and_stats() {
        let p = portion(
            BACKGROUND_SECTION_ID,
            "You start with a sword. Gain 10 GOLD.",
            vec![
                ExtractedEvent {
                    offset: 0,
                    evidence: "sword".into(),
                    event: Event::Item {
                        action: ItemAction::Add,
                        name: "sword".into(),
                    },
                },
                ExtractedEvent {
                    offset: 20,
                    evidence: "Gain 10 GOLD".into(),
                    event: Event::StatChange {
                        stat: Stat::Gold,
                        amount: Amount::Fixed(10),
                        permanent: None,
                    },
                },
            ],
        );
        let s = build_sequence(&p);
        assert_eq!(s.sequence.len(), 1);
        assert_eq!(s.sequence[0], Event::choice_to("1"));
    }

    #[test]
    fn test_clean_text_strips_header_line() {
        let p = portion("23", "23\nThe troll strikes.\nYou stagger.", vec![]);
        let s = build_sequence(&p);
        assert_eq!(s.clean_text, "The troll strikes. You stagger.");
        assert!(s.text.starts_with("23\n"));
        assert_eq!(s.section_num, Some(23));
    }
}
