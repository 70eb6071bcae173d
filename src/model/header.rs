//! Header Candidate Records
//!
//! One `HeaderCandidate` per surviving element (`header_candidates.jsonl`).
//! The classifier is deliberately high-recall: candidates are cheap, missed
//! headers are expensive. A later stage makes the final call.

use serde::{Deserialize, Serialize};

/// Coarse document region a header element opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MacroHeader {
    #[default]
    None,
    Cover,
    Rules,
    FrontMatter,
    Background,
    GameSections,
    Endmatter,
}

/// Per-element classification verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderCandidate {
    pub seq: u64,
    pub page: u32,
    #[serde(default)]
    pub macro_header: MacroHeader,
    #[serde(default)]
    pub game_section_header: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_section_number: Option<u32>,
    #[serde(default)]
    pub confidence: f32,
    /// Original element text, merged on after classification for readability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl HeaderCandidate {
    /// A negative verdict for an element nothing claimed.
    pub fn none(seq: u64, page: u32) -> Self {
        Self {
            seq,
            page,
            macro_header: MacroHeader::None,
            game_section_header: false,
            claimed_section_number: None,
            confidence: 0.0,
            text: None,
        }
    }

    /// Whether this row is worth forwarding to the global structurer.
    pub fn is_positive(&self) -> bool {
        self.game_section_header || self.macro_header != MacroHeader::None
    }
}
