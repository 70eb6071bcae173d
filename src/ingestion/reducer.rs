//! IR Reducer (pipeline stage)
//!
//! Collapses vendor-shaped OCR elements into the minimal
//! `{id, seq, page, kind, text, layout}` stream every later stage consumes.
//! Empty-text rows are filtered; their original `seq` survives as a gap.
//! Text normalization is minimal on purpose: CR to LF, trim. No content
//! rewriting happens here or anywhere downstream of OCR.

use async_trait::async_trait;

use crate::core::artifact;
use crate::model::{CoordOrigin, ElementCore, ElementKind, HAlign, Layout, RawElement};
use crate::pipeline::stage::{PipelineStage, StageContext, StageOutcome, StageResult};

pub const ELEMENTS_IN: &str = "elements.jsonl";
pub const ELEMENTS_CORE: &str = "elements_core.jsonl";

pub struct ReduceElements;

#[async_trait]
impl PipelineStage for ReduceElements {
    fn module_id(&self) -> &'static str {
        "reduce_elements"
    }

    async fn run(&self, ctx: &StageContext) -> StageResult<StageOutcome> {
        let input = ctx.inputs.require(ELEMENTS_IN)?;
        let raw: Vec<RawElement> = artifact::read_jsonl(input)?;
        let total = raw.len();

        let core: Vec<ElementCore> = raw.into_iter().filter_map(reduce_element).collect();

        tracing::info!(
            kept = core.len(),
            filtered = total - core.len(),
            "reduced OCR elements"
        );
        ctx.meter.record_items(core.len() as u64);
        ctx.store.write_jsonl(ELEMENTS_CORE, &core)?;
        Ok(StageOutcome::Done)
    }
}

/// Map one vendor element to the reduced IR, or drop it.
pub fn reduce_element(raw: RawElement) -> Option<ElementCore> {
    let text = normalize_text(raw.text.as_deref().unwrap_or(""));
    if text.is_empty() {
        return None;
    }
    let layout = extract_layout(&raw);
    Some(ElementCore {
        id: raw.id,
        seq: raw.seq,
        page: raw.page,
        kind: map_kind(raw.element_type.as_deref()),
        text,
        layout,
    })
}

/// CR to LF, collapse CRLF, trim outer whitespace. Nothing else.
fn normalize_text(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n").trim().to_string()
}

/// Vendor element types map onto four kinds; anything unknown is text.
fn map_kind(element_type: Option<&str>) -> ElementKind {
    match element_type.map(|t| t.to_ascii_lowercase()) {
        Some(t) if t.contains("image") || t.contains("picture") || t.contains("figure") => {
            ElementKind::Image
        }
        Some(t) if t.contains("table") => ElementKind::Table,
        Some(t) if t.contains("header") || t.contains("footer") || t.contains("furniture") => {
            ElementKind::Other
        }
        _ => ElementKind::Text,
    }
}

/// Layout hints require a bounding box and a page box. `y` is normalized
/// to 0..1 from the top; without an explicit origin the OCR engine is
/// assumed bottom-origin.
fn extract_layout(raw: &RawElement) -> Option<Layout> {
    let bbox = raw.bbox?;
    let page_box = raw.page_box?;
    if page_box.width <= 0.0 || page_box.height <= 0.0 {
        return None;
    }

    let x_center = (bbox.x0 + bbox.x1) / 2.0 / page_box.width;
    let h_align = if x_center < 0.4 {
        HAlign::Left
    } else if x_center > 0.6 {
        HAlign::Right
    } else {
        HAlign::Center
    };

    let y_center = (bbox.y0 + bbox.y1) / 2.0 / page_box.height;
    let y = match raw.origin {
        Some(CoordOrigin::Top) => y_center,
        Some(CoordOrigin::Bottom) | None => 1.0 - y_center,
    };

    Some(Layout {
        h_align: Some(h_align),
        y: Some(y.clamp(0.0, 1.0)),
    })
}

// ============================================================================
// Tests
// ============================================================================
