//! The Gamebook Document
//!
//! `gamebook.json` is the contract with the engine: metadata plus a flat
//! list of sections, each carrying an ordered `sequence` of gameplay
//! events. Section-to-section references are id strings, not pointers;
//! reachability is computed by BFS at validation time.

use serde::{Deserialize, Serialize};

use super::event::Event;

/// A resolved outgoing choice reference, kept beside the sequence for
/// completeness validation and human inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceRef {
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
}

/// Section classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionType {
    Gameplay,
    Background,
    FrontMatter,
    Stub,
}

/// Where a section came from, and whether it is a placeholder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stub: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_start: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_end: Option<u32>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reocr_suggested: bool,
}

/// One engine-navigable section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_num: Option<u32>,
    #[serde(rename = "type")]
    pub section_type: SectionType,
    pub is_gameplay_section: bool,
    pub text: String,
    pub clean_text: String,
    #[serde(default)]
    pub choices: Vec<ChoiceRef>,
    pub sequence: Vec<Event>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
}

impl Section {
    /// All target section ids referenced anywhere in this section's
    /// sequence, nested branches included.
    pub fn outgoing_targets(&self) -> Vec<String> {
        let mut targets = Vec::new();
        for ev in &self.sequence {
            targets.extend(ev.target_sections());
        }
        targets
    }

    pub fn is_stub(&self) -> bool {
        self.provenance.as_ref().map_or(false, |p| p.stub)
    }
}

/// Document metadata stamped by the builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub start_section: String,
    pub validator_version: String,
    #[serde(rename = "expected_range")]
    pub expected_range: (u32, u32),
}

/// The final engine artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gamebook {
    pub metadata: Metadata,
    pub sections: Vec<Section>,
}

impl Gamebook {
    /// Find a section by id.
    pub fn section(&self, id: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.id == id)
    }

    /// Integer ids present among sections.
    pub fn numeric_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .sections
            .iter()
            .filter_map(|s| s.id.parse().ok())
            .collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::event::{Endpoint, Event, Terminal};

    fn section(id: &str, sequence: Vec<Event>) -> Section {
        Section {
            id: id.to_string(),
            section_num: id.parse().ok(),
            section_type: SectionType::Gameplay,
            is_gameplay_section: true,
            text: String::new(),
            clean_text: String::new(),
            choices: vec![],
            sequence,
            provenance: None,
        }
    }

    #[test]
    fn test_section_serializes_camel_case() {
        let s = section("5", vec![Event::choice_to("6")]);
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["isGameplaySection"], true);
        assert_eq!(json["cleanText"], "");
        assert_eq!(json["type"], "gameplay");
        assert!(json.get("sectionNum").is_some());
    }

    #[test]
    fn test_outgoing_targets_ignores_terminals() {
        let s = section(
            "5",
            vec![
                Event::choice_to("6"),
                Event::Choice {
                    endpoint: Endpoint::terminal(Terminal::Death),
                    choice_text: None,
                    effects: None,
                },
            ],
        );
        assert_eq!(s.outgoing_targets(), vec!["6"]);
    }

    #[test]
    fn test_numeric_ids_skips_background() {
        let gb = Gamebook {
            metadata: Metadata {
                title: None,
                author: None,
                start_section: "1".into(),
                validator_version: "0.2.0".into(),
                expected_range: (1, 400),
            },
            sections: vec![
                section("2", vec![]),
                section("1", vec![]),
                section("background", vec![]),
            ],
        };
        assert_eq!(gb.numeric_ids(), vec![1, 2]);
        assert!(gb.section("background").is_some());
    }

    #[test]
    fn test_stub_flag_via_provenance() {
        let mut s = section("7", vec![]);
        assert!(!s.is_stub());
        s.provenance = Some(Provenance {
            stub: true,
            ..Default::default()
        });
        assert!(s.is_stub());
    }
}
