//! OCR Element Records
//!
//! `RawElement` is the vendor-shaped input row from the OCR stage
//! (`elements.jsonl`); `ElementCore` is the reduced IR every later stage
//! consumes (`elements_core.jsonl`). The reducer maps vendor element types
//! onto four coarse kinds and keeps the original `seq` so filtered rows
//! leave visible gaps.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// Raw OCR Input
// ============================================================================

/// Bounding box in page coordinates, as emitted by the OCR engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

/// Page dimensions accompanying a bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageBox {
    pub width: f64,
    pub height: f64,
}

/// Coordinate origin declared by the OCR engine.
///
/// When absent, the reducer falls back to a bottom-origin heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordOrigin {
    Top,
    Bottom,
}

/// One row of `elements.jsonl` as produced by the OCR collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawElement {
    pub id: String,
    pub seq: u64,
    pub page: u32,
    /// Vendor-native element type (e.g. "paragraph", "picture", "table").
    #[serde(default)]
    pub element_type: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub bbox: Option<BBox>,
    #[serde(default)]
    pub page_box: Option<PageBox>,
    #[serde(default)]
    pub origin: Option<CoordOrigin>,
    /// Anything else the vendor attaches; preserved for forensics, never read.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// One row of `pages.jsonl`: per-page vision-LLM HTML plus quality tags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageHtml {
    pub page: u32,
    #[serde(default)]
    pub html: String,
    #[serde(default)]
    pub ocr_quality: Option<f32>,
    #[serde(default)]
    pub ocr_integrity: Option<f32>,
    #[serde(default)]
    pub continuation_risk: Option<f32>,
    #[serde(default)]
    pub ocr_empty: bool,
    #[serde(default)]
    pub ocr_empty_reason: Option<String>,
}

// ============================================================================
// Reduced IR
// ============================================================================

/// Coarse element kind; anything unclassified maps to `Text`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Text,
    Image,
    Table,
    Other,
}

/// Horizontal alignment hint derived from the bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HAlign {
    Left,
    Center,
    Right,
}

/// Normalized layout hints. `y` is 0..1 from the top of the page.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Layout {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub h_align: Option<HAlign>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
}

/// One row of `elements_core.jsonl`: the minimal IR stream.
///
/// Invariants: `text` is non-empty after trimming, and `seq` is strictly
/// increasing across the file (gaps mark filtered rows).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementCore {
    pub id: String,
    pub seq: u64,
    pub page: u32,
    pub kind: ElementKind,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<Layout>,
}

impl ElementCore {
    /// Trimmed text with a standalone integer, if that is all the line holds.
    /// A single trailing period is tolerated (common OCR artifact on headers).
    pub fn standalone_number(&self) -> Option<u32> {
        let t = self.text.trim();
        let t = t.strip_suffix('.').unwrap_or(t).trim();
        if t.is_empty() || !t.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        t.parse().ok()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn element(text: &str) -> ElementCore {
        ElementCore {
            id: "e1".to_string(),
            seq: 0,
            page: 1,
            kind: ElementKind::Text,
            text: text.to_string(),
            layout: None,
        }
    }

    #[test]
    fn test_standalone_number_plain() {
        assert_eq!(element("117").standalone_number(), Some(117));
        assert_eq!(element("  42  ").standalone_number(), Some(42));
    }

    #[test]
    fn test_standalone_number_trailing_period() {
        assert_eq!(element("117.").standalone_number(), Some(117));
    }

    #[test]
    fn test_standalone_number_rejects_prose() {
        assert_eq!(element("turn to 117").standalone_number(), None);
        assert_eq!(element("117 gold pieces").standalone_number(), None);
        assert_eq!(element("").standalone_number(), None);
    }

    #[test]
    fn test_raw_element_tolerates_vendor_fields() {
        let json = r#"{"id":"p3_e7","seq":12,"page":3,"element_type":"paragraph",
                       "text":"hello","font_size":11.5,"column":1}"#;
        let raw: RawElement = serde_json::from_str(json).unwrap();
        assert_eq!(raw.seq, 12);
        assert_eq!(raw.extra.len(), 2);
    }

    #[test]
    fn test_element_kind_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ElementKind::Image).unwrap(),
            "\"image\""
        );
    }
}
