//! Choice Completeness and Alignment Checks
//!
//! `validate_choice_completeness`: every explicit "turn to N" in a
//! section's source must be covered by an outgoing edge somewhere in its
//! sequence (choice, check branch, combat outcome). References the
//! sequence misses are repair candidates, not silent fix-ups.
//!
//! `validate_choice_text_alignment`: a choice whose anchor text names a
//! different number than its target is flagged — the classic symptom of a
//! repair stage rewriting an explicit target.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::model::{EnrichedPortion, SequencedPortion};

static TURN_TO_REF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bturn\s+(?:back\s+)?to\s+(\d{1,4})\b").expect("turn-to ref regex")
});

static DIGITS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{1,4}").expect("digits regex"));

/// A section whose text references targets its sequence does not cover.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletenessFlag {
    pub section_id: String,
    pub missing_targets: Vec<String>,
}

/// A choice whose visible text disagrees with its target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignmentFlag {
    pub section_id: String,
    pub target: String,
    pub anchor_text: String,
}

/// Explicit numeric references in the section source.
pub fn text_references(source: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    TURN_TO_REF_RE
        .captures_iter(source)
        .map(|c| c[1].to_string())
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Compare text references against the sequence's outgoing targets.
pub fn validate_choice_completeness(
    enriched: &EnrichedPortion,
    sequenced: &SequencedPortion,
) -> Option<CompletenessFlag> {
    let covered: HashSet<String> = sequenced
        .sequence
        .iter()
        .flat_map(|e| e.target_sections())
        .collect();
    let missing: Vec<String> = text_references(&enriched.raw_html)
        .into_iter()
        .filter(|t| !covered.contains(t))
        .collect();
    if missing.is_empty() {
        None
    } else {
        Some(CompletenessFlag {
            section_id: sequenced.section_id.clone(),
            missing_targets: missing,
        })
    }
}

/// Anchor text naming a number other than the choice target is a flag.
pub fn validate_choice_text_alignment(sequenced: &SequencedPortion) -> Vec<AlignmentFlag> {
    let mut flags = Vec::new();
    for choice in &sequenced.choices {
        let Some(anchor) = &choice.anchor_text else {
            continue;
        };
        let numbers: Vec<&str> = DIGITS_RE.find_iter(anchor).map(|m| m.as_str()).collect();
        if !numbers.is_empty() && !numbers.contains(&choice.target.as_str()) {
            flags.push(AlignmentFlag {
                section_id: sequenced.section_id.clone(),
                target: choice.target.clone(),
                anchor_text: anchor.clone(),
            });
        }
    }
    flags
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChoiceRef, Event};

    fn enriched(id: &str, html: &str) -> EnrichedPortion {
        EnrichedPortion {
            section_id: id.to_string(),
            raw_text: html.to_string(),
            raw_html: html.to_string(),
            element_ids: vec![],
            page_start: 1,
            page_end: 1,
            choices: vec![],
            extracted: vec![],
            warnings: vec![],
            reocr_suggested: false,
        }
    }

    fn sequenced(id: &str, sequence: Vec<Event>, choices: Vec<ChoiceRef>) -> SequencedPortion {
        SequencedPortion {
            section_id: id.to_string(),
            section_num: id.parse().ok(),
            text: String::new(),
            clean_text: String::new(),
            page_start: 1,
            page_end: 1,
            choices,
            sequence,
            warnings: vec![],
        }
    }

    #[test]
    fn test_covered_references_not_flagged() {
        let e = enriched("5", "Fight and turn to 10, or flee and turn to 20.");
        let s = sequenced("5", vec![Event::choice_to("10"), Event::choice_to("20")], vec![]);
        assert!(validate_choice_completeness(&e, &s).is_none());
    }

    #[test]
    fn test_uncovered_reference_flagged() {
        let e = enriched("5", "Fight and turn to 10, or flee and turn to 20.");
        let s = sequenced("5", vec![Event::choice_to("10")], vec![]);
        let flag = validate_choice_completeness(&e, &s).unwrap();
        assert_eq!(flag.missing_targets, vec!["20"]);
    }

    #[test]
    fn test_branch_targets_count_as_covered() {
        let e = enriched("5", "If you have the key, turn to 30.");
        let s = sequenced(
            "5",
            vec![Event::ItemCheck {
                item_name: Some("key".into()),
                items_all: None,
                has: Some(crate::model::Endpoint::target("30")),
                missing: None,
            }],
            vec![],
        );
        assert!(validate_choice_completeness(&e, &s).is_none());
    }

    #[test]
    fn test_alignment_flags_rewritten_target() {
        let s = sequenced(
            "5",
            vec![],
            vec![ChoiceRef {
                target: "303".into(),
                anchor_text: Some("turn to 200".into()),
                offset: Some(0),
            }],
        );
        let flags = validate_choice_text_alignment(&s);
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].target, "303");
    }

    #[test]
    fn test_alignment_accepts_matching_anchor() {
        let s = sequenced(
            "5",
            vec![],
            vec![ChoiceRef {
                target: "200".into(),
                anchor_text: Some("turn to 200".into()),
                offset: Some(0),
            }],
        );
        assert!(validate_choice_text_alignment(&s).is_empty());
    }

    #[test]
    fn test_references_deduped() {
        let refs = text_references("turn to 10. Later, turn to 10 again.");
        assert_eq!(refs, vec!["10"]);
    }
}
