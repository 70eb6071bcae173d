//! Per-Section Portions
//!
//! `EnrichedPortion` (`portions_enriched.jsonl`) is the section extractor's
//! output: the sliced text/HTML plus every gameplay event found, each tied
//! to the character offset of its triggering phrase. `SequencedPortion`
//! (`portions_sequenced.jsonl`) is the same section after sequence
//! ordering: a final `sequence` array in source-text order.

use serde::{Deserialize, Serialize};

use super::event::Event;
use super::gamebook::ChoiceRef;

/// An extracted event anchored to the evidence that produced it.
///
/// `offset` is a character offset into the section's extraction source
/// (`raw_html` when present, `raw_text` otherwise). `evidence` is the
/// matched snippet; every emitted event must be grounded in one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEvent {
    pub offset: usize,
    pub evidence: String,
    pub event: Event,
}

/// One extracted section before sequence ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedPortion {
    pub section_id: String,
    pub raw_text: String,
    pub raw_html: String,
    pub element_ids: Vec<String>,
    pub page_start: u32,
    pub page_end: u32,
    /// Quick view of outgoing choices for completeness validation.
    #[serde(default)]
    pub choices: Vec<ChoiceRef>,
    /// All events in extraction order with offsets and evidence.
    #[serde(default)]
    pub extracted: Vec<ExtractedEvent>,
    /// Non-fatal extraction notes (`ocr_empty`, skipped items, ...).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Set when the intake flagged a risky page split and the recipe asked
    /// for re-OCR suggestions.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reocr_suggested: bool,
}

/// One section with its final ordered `sequence`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequencedPortion {
    pub section_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_num: Option<u32>,
    pub text: String,
    pub clean_text: String,
    pub page_start: u32,
    pub page_end: u32,
    #[serde(default)]
    pub choices: Vec<ChoiceRef>,
    pub sequence: Vec<Event>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enriched_portion_roundtrip() {
        let p = EnrichedPortion {
            section_id: "12".into(),
            raw_text: "Turn to 40.".into(),
            raw_html: "<p>Turn to <a href=\"#40\">40</a>.</p>".into(),
            element_ids: vec!["e3".into(), "e4".into()],
            page_start: 5,
            page_end: 5,
            choices: vec![ChoiceRef {
                target: "40".into(),
                anchor_text: Some("40".into()),
                offset: Some(15),
            }],
            extracted: vec![ExtractedEvent {
                offset: 15,
                evidence: "Turn to 40".into(),
                event: Event::choice_to("40"),
            }],
            warnings: vec![],
            reocr_suggested: false,
        };
        let json = serde_json::to_string(&p).unwrap();
        let back: EnrichedPortion = serde_json::from_str(&json).unwrap();
        assert_eq!(back.extracted.len(), 1);
        assert_eq!(back.choices[0].target, "40");
        // false flag is omitted entirely
        assert!(!json.contains("reocr_suggested"));
    }

    #[test]
    fn test_sequenced_portion_preserves_event_order() {
        let p = SequencedPortion {
            section_id: "1".into(),
            section_num: Some(1),
            text: "x".into(),
            clean_text: "x".into(),
            page_start: 1,
            page_end: 1,
            choices: vec![],
            sequence: vec![
                Event::choice_to("392"),
                Event::choice_to("200"),
                Event::choice_to("177"),
            ],
            warnings: vec![],
        };
        let json = serde_json::to_value(&p).unwrap();
        let targets: Vec<_> = json["sequence"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["targetSection"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(targets, vec!["392", "200", "177"]);
    }
}
