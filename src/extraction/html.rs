//! Per-Page HTML Intake
//!
//! The OCR collaborator emits one HTML document per page plus quality
//! tags. Sections rarely align with pages, so the extractor slices the
//! concatenated page HTML between numeric header markers when it can, and
//! falls back to the whole page span (or plain element text) when it
//! cannot. Slicing is best-effort; extraction regexes tolerate either.

use regex::Regex;
use std::collections::BTreeMap;

use crate::model::{ElementCore, PageHtml, SectionBoundary};

/// Pages keyed by page number for range lookups.
pub fn index_pages(pages: Vec<PageHtml>) -> BTreeMap<u32, PageHtml> {
    pages.into_iter().map(|p| (p.page, p)).collect()
}

/// A numeric section header as it appears in page HTML: alone in a tag
/// (`<h3>117</h3>`), as a fragment id, or alone on a line.
fn header_marker_re(id: &str) -> Regex {
    Regex::new(&format!(
        r#"(?m)(?:>\s*{id}\s*<|id\s*=\s*["']{id}["']|^\s*{id}\s*$)"#
    ))
    .expect("header marker regex")
}

/// Slice the HTML between this section's header and the next section's.
/// `None` when the header cannot be located.
pub fn slice_section_html(html: &str, id: &str, next_id: Option<&str>) -> Option<String> {
    let start = header_marker_re(id).find(html)?.start();
    let end = next_id
        .and_then(|n| header_marker_re(n).find(&html[start..]))
        .map(|m| start + m.start())
        .unwrap_or(html.len());
    Some(html[start..end].to_string())
}

/// Build the extraction source for one section: `(raw_text, raw_html)`.
///
/// `raw_text` is always the joined element texts. `raw_html` prefers a
/// header-to-header slice of the page HTML, then the raw page span, then
/// the plain text.
pub fn section_source(
    boundary: &SectionBoundary,
    elements: &[ElementCore],
    pages: &BTreeMap<u32, PageHtml>,
    next_id: Option<&str>,
) -> (String, String) {
    let slice: Vec<&ElementCore> = elements
        .iter()
        .filter(|e| e.seq >= boundary.start_seq && e.seq <= boundary.end_seq)
        .collect();
    let raw_text = slice
        .iter()
        .map(|e| e.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let page_start = slice.iter().map(|e| e.page).min().unwrap_or(0);
    let page_end = slice.iter().map(|e| e.page).max().unwrap_or(0);
    let page_html: String = pages
        .range(page_start..=page_end)
        .map(|(_, p)| p.html.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let raw_html = if page_html.trim().is_empty() {
        raw_text.clone()
    } else {
        slice_section_html(&page_html, &boundary.section_id, next_id).unwrap_or(page_html)
    };
    (raw_text, raw_html)
}

/// Pages in the span flagged empty or risky by the OCR stage.
pub fn page_warnings(
    pages: &BTreeMap<u32, PageHtml>,
    page_start: u32,
    page_end: u32,
) -> (Vec<String>, f32) {
    let mut warnings = Vec::new();
    let mut max_risk: f32 = 0.0;
    for (_, page) in pages.range(page_start..=page_end) {
        if page.ocr_empty {
            warnings.push(format!(
                "ocr_empty page {}: {}",
                page.page,
                page.ocr_empty_reason.as_deref().unwrap_or("unknown")
            ));
        }
        if let Some(risk) = page.continuation_risk {
            max_risk = max_risk.max(risk);
        }
    }
    (warnings, max_risk)
}
