//! Global Structure Record
//!
//! `sections_structured.json`: the single reconciled view of the document
//! produced by the global structurer. Invariants: `start_seq` strictly
//! increases in document order and `section_id` values are unique.

use serde::{Deserialize, Serialize};

/// Confidence status on a structured game section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionStatus {
    Certain,
    Uncertain,
}

/// A coarse document region (cover, rules, game sections, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacroSection {
    pub name: String,
    pub start_seq: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_seq: Option<u64>,
}

/// A numbered gameplay section with its confirmed starting element.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameSection {
    pub section_id: u32,
    pub start_seq: u64,
    pub status: SectionStatus,
    /// Full text covering `[start_seq, next.start_seq)`, sliced on after
    /// structuring as the verification input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// The whole-document structure record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SectionsStructured {
    #[serde(default)]
    pub macro_sections: Vec<MacroSection>,
    #[serde(default)]
    pub game_sections: Vec<GameSection>,
    /// Dropped claims and other non-fatal reconciliation notes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl SectionsStructured {
    /// Check the two hard invariants; returns violations as messages.
    pub fn invariant_violations(&self) -> Vec<String> {
        let mut violations = Vec::new();
        let mut seen_ids = std::collections::HashSet::new();
        let mut last_seq: Option<u64> = None;

        for gs in &self.game_sections {
            if !seen_ids.insert(gs.section_id) {
                violations.push(format!("duplicate section_id {}", gs.section_id));
            }
            if let Some(prev) = last_seq {
                if gs.start_seq <= prev {
                    violations.push(format!(
                        "start_seq not strictly increasing at section {} ({} after {})",
                        gs.section_id, gs.start_seq, prev
                    ));
                }
            }
            last_seq = Some(gs.start_seq);
        }
        violations
    }

    /// Macro section covering a given seq, if any.
    pub fn macro_at(&self, seq: u64) -> Option<&MacroSection> {
        self.macro_sections
            .iter()
            .filter(|m| m.start_seq <= seq && m.end_seq.map_or(true, |e| seq <= e))
            .last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gs(section_id: u32, start_seq: u64) -> GameSection {
        GameSection {
            section_id,
            start_seq,
            status: SectionStatus::Certain,
            text: None,
        }
    }

    #[test]
    fn test_invariants_pass_on_ordered_unique() {
        let s = SectionsStructured {
            macro_sections: vec![],
            game_sections: vec![gs(1, 10), gs(2, 20), gs(3, 30)],
            warnings: vec![],
        };
        assert!(s.invariant_violations().is_empty());
    }

    #[test]
    fn test_invariants_catch_duplicate_id() {
        let s = SectionsStructured {
            macro_sections: vec![],
            game_sections: vec![gs(1, 10), gs(1, 20)],
            warnings: vec![],
        };
        let v = s.invariant_violations();
        assert_eq!(v.len(), 1);
        assert!(v[0].contains("duplicate"));
    }

    #[test]
    fn test_invariants_catch_non_increasing_seq() {
        let s = SectionsStructured {
            macro_sections: vec![],
            game_sections: vec![gs(1, 20), gs(2, 20), gs(3, 10)],
            warnings: vec![],
        };
        assert_eq!(s.invariant_violations().len(), 2);
    }

    #[test]
    fn test_macro_at_prefers_latest_covering_region() {
        let s = SectionsStructured {
            macro_sections: vec![
                MacroSection {
                    name: "rules".into(),
                    start_seq: 0,
                    end_seq: Some(50),
                },
                MacroSection {
                    name: "game_sections".into(),
                    start_seq: 51,
                    end_seq: None,
                },
            ],
            game_sections: vec![],
            warnings: vec![],
        };
        assert_eq!(s.macro_at(40).unwrap().name, "rules");
        assert_eq!(s.macro_at(200).unwrap().name, "game_sections");
    }
}
