//! Orphan Tracing
//!
//! A section nothing points at is either genuinely unreachable content or
//! a symptom of a missed choice upstream. `trace_orphans_text` scans every
//! other section's source for an explicit "turn to <orphan>" — when one
//! exists, that source section is missing a choice and becomes a repair
//! candidate.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::model::{EnrichedPortion, SequencedPortion, BACKGROUND_SECTION_ID};

use super::completeness::text_references;

/// An orphan with the sections whose text explicitly references it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrphanTrace {
    pub orphan_id: String,
    /// Sections whose source text says "turn to <orphan>" but whose
    /// sequence does not.
    pub text_sources: Vec<String>,
}

/// Find orphans and trace them back through raw text.
pub fn trace_orphans_text(
    enriched: &[EnrichedPortion],
    sequenced: &[SequencedPortion],
) -> Vec<OrphanTrace> {
    let mut referenced: HashSet<String> = HashSet::new();
    for portion in sequenced {
        for target in portion.sequence.iter().flat_map(|e| e.target_sections()) {
            referenced.insert(target);
        }
    }

    let mut traces = Vec::new();
    for portion in sequenced {
        let id = &portion.section_id;
        if id == BACKGROUND_SECTION_ID || id == "1" {
            continue;
        }
        if referenced.contains(id) {
            continue;
        }
        // Orphaned: does anyone's text mention it?
        let text_sources: Vec<String> = enriched
            .iter()
            .filter(|e| &e.section_id != id)
            .filter(|e| text_references(&e.raw_html).contains(id))
            .map(|e| e.section_id.clone())
            .collect();
        traces.push(OrphanTrace {
            orphan_id: id.clone(),
            text_sources,
        });
    }
    traces.sort_by_key(|t| t.orphan_id.parse::<u32>().unwrap_or(u32::MAX));
    traces
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Event;

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

    fn sequenced(id: &str, sequence: Vec<Event>) -> SequencedPortion {
        SequencedPortion {
            section_id: id.to_string(),
            section_num: id.parse().ok(),
            text: String::new(),
            clean_text: String::new(),
            page_start: 1,
            page_end: 1,
            choices: vec![],
            sequence,
            warnings: vec![],
        }
    }

    #[test]
    fn test_orphan_traced_to_text_source() {
        let enriched = vec![
            enriched("1", "You may turn to 2, and the sign says turn to 3."),
            enriched("2", "Dead end."),
            enriched("3", "Hidden grotto."),
        ];
        let sequenced = vec![
            sequenced("1", vec![Event::choice_to("2")]),
            sequenced("2", vec![]),
            sequenced("3", vec![]),
        ];
        let traces = trace_orphans_text(&enriched, &sequenced);
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].orphan_id, "3");
        assert_eq!(traces[0].text_sources, vec!["1"]);
    }

    #[test]
    fn test_no_orphans_when_all_referenced() {
        let enriched = vec![enriched("1", "turn to 2"), enriched("2", "turn to 1")];
        let sequenced = vec![
            sequenced("1", vec![Event::choice_to("2")]),
            sequenced("2", vec![Event::choice_to("1")]),
        ];
        assert!(trace_orphans_text(&enriched, &sequenced).is_empty());
    }

    #[test]
    fn test_orphan_with_no_source_reported_empty() {
        let enriched = vec![enriched("1", "Nothing here."), enriched("9", "Lost room.")];
        let sequenced = vec![sequenced("1", vec![]), sequenced("9", vec![])];
        let traces = trace_orphans_text(&enriched, &sequenced);
        assert_eq!(traces.len(), 1);
        assert!(traces[0].text_sources.is_empty());
    }
}
