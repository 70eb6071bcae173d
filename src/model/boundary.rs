//! Section Boundary Records
//!
//! `section_boundaries.jsonl`: one confirmed span per section, assembled
//! deterministically from the structured view. The file is sorted by
//! numeric `section_id` for consumers; `start_seq` remains the source of
//! truth for document order.

use serde::{Deserialize, Serialize};

/// How a boundary was confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundarySource {
    Certain,
    Uncertain,
    Override,
}

/// A confirmed section span over the element stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionBoundary {
    pub section_id: String,
    pub start_element_id: String,
    pub end_element_id: String,
    pub start_seq: u64,
    pub end_seq: u64,
    pub source: BoundarySource,
}

impl SectionBoundary {
    /// Numeric form of the id, when it is a plain section number.
    pub fn section_num(&self) -> Option<u32> {
        self.section_id.parse().ok()
    }

    pub fn span_len(&self) -> u64 {
        self.end_seq.saturating_sub(self.start_seq) + 1
    }
}

/// A detected document-order violation between two adjacent spans.
/// Recorded, never silently repaired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderingConflict {
    pub first_section: String,
    pub second_section: String,
    pub first_end_seq: u64,
    pub second_start_seq: u64,
}

/// `ordering_conflicts.json` payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderingConflicts {
    #[serde(default)]
    pub conflicts: Vec<OrderingConflict>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_num_parses_plain_ids() {
        let b = SectionBoundary {
            section_id: "117".into(),
            start_element_id: "e1".into(),
            end_element_id: "e5".into(),
            start_seq: 10,
            end_seq: 14,
            source: BoundarySource::Certain,
        };
        assert_eq!(b.section_num(), Some(117));
        assert_eq!(b.span_len(), 5);
    }

    #[test]
    fn test_section_num_none_for_background() {
        let b = SectionBoundary {
            section_id: "background".into(),
            start_element_id: "e1".into(),
            end_element_id: "e1".into(),
            start_seq: 3,
            end_seq: 3,
            source: BoundarySource::Override,
        };
        assert_eq!(b.section_num(), None);
        assert_eq!(b.span_len(), 1);
    }
}
