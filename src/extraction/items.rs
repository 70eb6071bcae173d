//! Item and Condition Extraction
//!
//! Inventory events and conditional checks:
//! - add on "put X in your backpack" phrasings, remove on "take X out of
//!   your backpack" / "cross X off" phrasings,
//! - a guarded pronoun backreference ("put it in your backpack" resolves
//!   to the nearest preceding concrete noun, or the event is skipped),
//! - "If you have X (and Y), turn to N" as item checks — AND-semantics
//!   over compound conditions via `itemsAll`,
//! - non-item conditions ("if you have read the scroll", "previously seen
//!   the spirit") as state checks, never item checks.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{Event, ExtractedEvent, ItemAction};

use super::target::normalize_target;

const NAME: &str = r"[a-zA-Z][a-zA-Z'\- ]{1,40}?";

static ADD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:put|place)\s+(?:the\s+|a\s+|an\s+)?(?P<name>{NAME}|it|them)\s+(?:in|into)\s+your\s+(?:backpack|pack|bag)"
    ))
    .expect("item add regex")
});

static ADD_SHEET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\badd\s+(?:the\s+|a\s+|an\s+)?(?P<name>{NAME}|it|them)\s+to\s+your\s+(?:backpack|pack|adventure\s+sheet|equipment\s+list)"
    ))
    .expect("item add sheet regex")
});

static REMOVE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\btake\s+(?:the\s+|a\s+|an\s+)?(?P<name>{NAME}|it|them)\s+(?:out\s+of|from)\s+your\s+(?:backpack|pack|bag)"
    ))
    .expect("item remove regex")
});

static CROSS_OFF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:cross|strike)\s+(?:the\s+|a\s+|an\s+)?(?P<name>{NAME}|it|them)\s+off"
    ))
    .expect("cross off regex")
});

/// `If you (do not) have <clause>, turn to N`.
static HAVE_CHECK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\bif\s+you\s+(?P<neg>do\s+not\s+have|don'?t\s+have|have\s+not|have)\s+(?P<clause>[^,.]{2,90})[,.]?\s*(?:then\s+)?turn\s+to\s+(?P<target>\d{1,4})",
    )
    .expect("have check regex")
});

static OTHERWISE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:otherwise|if\s+not)\b[^.]{0,80}?\bturn\s+to\s+(\d{1,4})")
        .expect("otherwise regex")
});

/// Past-participle and history markers that make a clause a state, not an
/// inventory item.
static STATE_MARKER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(read|seen|visited|met|found|been|drunk|eaten|spoken|heard|previously|already|earlier|before)\b",
    )
    .expect("state marker regex")
});

/// Nearest preceding "the/a/an <noun phrase>" for pronoun resolution.
static NOUN_PHRASE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:the|a|an)\s+([a-z][a-z'\-]*(?:\s+[a-z][a-z'\-]*){0,2})")
        .expect("noun phrase regex")
});

/// Optional-take prompt ("Do you want to take...?") — never an
/// unconditional add.
static OPTIONAL_PROMPT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:do\s+you\s+(?:want|wish)|if\s+you\s+(?:want|wish))\s+to\s+(?:take|pick)")
        .expect("optional prompt regex")
});

fn is_pronoun(name: &str) -> bool {
    matches!(
        name.trim().to_ascii_lowercase().as_str(),
        "it" | "them" | "this" | "these" | "that"
    )
}

fn clean_item_name(raw: &str) -> String {
    let mut name = raw.trim().trim_end_matches(['.', ',', ';']).to_string();
    for article in ["the ", "a ", "an "] {
        if name.to_ascii_lowercase().starts_with(article) {
            name = name[article.len()..].to_string();
            break;
        }
    }
    name.trim().to_lowercase()
}

/// Resolve a captured name, following a pronoun back to the nearest
/// concrete noun. Returns `None` when no safe resolution exists.
fn resolve_name(source: &str, offset: usize, captured: &str) -> Option<String> {
    if !is_pronoun(captured) {
        return Some(clean_item_name(captured));
    }
    let window = crate::extraction::slice_window(source, offset.saturating_sub(200), offset);
    NOUN_PHRASE_RE
        .captures_iter(window)
        .last()
        .map(|cap| clean_item_name(&cap[1]))
}

/// Inventory add/remove events, in offset order. Optional-take prompts are
/// filtered; the sequence stage attaches those to their choices instead.
pub fn extract_item_events(source: &str) -> Vec<ExtractedEvent> {
    let mut events = Vec::new();

    let patterns: [(&Regex, ItemAction); 4] = [
        (&ADD_RE, ItemAction::Add),
        (&ADD_SHEET_RE, ItemAction::Add),
        (&REMOVE_RE, ItemAction::Remove),
        (&CROSS_OFF_RE, ItemAction::Remove),
    ];

    for (re, action) in patterns {
        for cap in re.captures_iter(source) {
            let whole = cap.get(0).expect("match 0");
            if action == ItemAction::Add && in_optional_prompt(source, whole.start()) {
                continue;
            }
            let Some(name) = resolve_name(source, whole.start(), &cap["name"]) else {
                continue;
            };
            if name.is_empty() {
                continue;
            }
            events.push(ExtractedEvent {
                offset: whole.start(),
                evidence: whole.as_str().to_string(),
                event: Event::Item { action, name },
            });
        }
    }

    // Remove patterns are more specific than add patterns; an add match
    // nested inside a remove span is a misparse.
    let removes: Vec<(usize, usize)> = events
        .iter()
        .filter(|e| matches!(e.event, Event::Item { action: ItemAction::Remove, .. }))
        .map(|e| (e.offset, e.offset + e.evidence.len()))
        .collect();
    events.retain(|e| {
        !matches!(e.event, Event::Item { action: ItemAction::Add, .. })
            || !removes
                .iter()
                .any(|(s, end)| e.offset >= *s && e.offset < *end)
    });

    events.sort_by_key(|e| e.offset);
    events
}

fn in_optional_prompt(source: &str, offset: usize) -> bool {
    let window = crate::extraction::slice_window(source, offset.saturating_sub(80), offset);
    OPTIONAL_PROMPT_RE.is_match(window)
}

/// Item and state checks, in offset order.
pub fn extract_condition_checks(source: &str) -> Vec<ExtractedEvent> {
    let mut events = Vec::new();

    for cap in HAVE_CHECK_RE.captures_iter(source) {
        let whole = cap.get(0).expect("match 0");
        let neg_text = cap["neg"].to_ascii_lowercase();
        let negated = neg_text.contains("not") || neg_text.contains("n't");
        let clause = cap["clause"].trim().to_string();
        let Some(primary) = normalize_target(&cap["target"]) else {
            continue;
        };

        // The opposite branch, when the text supplies one right after.
        let tail = crate::extraction::slice_window(source, whole.end(), whole.end() + 160);
        let opposite = OTHERWISE_RE
            .captures(tail)
            .and_then(|c| normalize_target(&c[1]));

        let (has, missing) = if negated {
            (opposite, Some(primary))
        } else {
            (Some(primary), opposite)
        };

        let event = if STATE_MARKER_RE.is_match(&clause) {
            Event::StateCheck {
                condition_text: Some(clause),
                has,
                missing,
            }
        } else {
            let items: Vec<String> = clause
                .split(" and ")
                .map(clean_item_name)
                .filter(|s| !s.is_empty())
                .collect();
            if items.len() >= 2 {
                Event::ItemCheck {
                    item_name: None,
                    items_all: Some(items),
                    has,
                    missing,
                }
            } else {
                Event::ItemCheck {
                    item_name: items.into_iter().next(),
                    items_all: None,
                    has,
                    missing,
                }
            }
        };

        events.push(ExtractedEvent {
            offset: whole.start(),
            evidence: whole.as_str().to_string(),
            event,
        });
    }

    events.sort_by_key(|e| e.offset);
    events
}

// ============================================================================
// Tests
// ============================================================================
