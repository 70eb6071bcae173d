//! Choice Extraction
//!
//! Finds outgoing navigation in a section: HTML anchors first, then the
//! relaxed "turn to N" / "go to N" / "proceed to N" phrasings in plain
//! text. Every match keeps its character offset in the extraction source —
//! source-text order is the ordering contract downstream.

use once_cell::sync::Lazy;
use regex::Regex;

/// `<a href="#162">...</a>` — target from the fragment, label from the body.
static ANCHOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<a\s+[^>]*href\s*=\s*["']#?(\d+)["'][^>]*>(.*?)</a>"#)
        .expect("anchor regex")
});

/// Anchor with no usable href; the body may still say "turn to N".
static ANCHOR_BODY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<a\b[^>]*>(.*?)</a>").expect("anchor body regex"));

/// Relaxed plain-text navigation phrasing.
static TURN_TO_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:turn|go|proceed|return)\s+(?:back\s+)?to\s+(\d{1,4})\b")
        .expect("turn-to regex")
});

/// One detected choice, anchored to its position in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceMatch {
    pub offset: usize,
    pub target: String,
    pub anchor_text: Option<String>,
    pub evidence: String,
    pub choice_text: Option<String>,
}

/// Extract all choices from a section's source, in offset order.
/// Anchor matches win over plain-text matches covering the same span.
pub fn extract_choices(source: &str) -> Vec<ChoiceMatch> {
    let mut matches: Vec<ChoiceMatch> = Vec::new();
    let mut covered: Vec<(usize, usize)> = Vec::new();

    for cap in ANCHOR_RE.captures_iter(source) {
        let whole = cap.get(0).expect("match 0");
        let target = cap[1].to_string();
        let body = strip_tags(&cap[2]);
        covered.push((whole.start(), whole.end()));
        matches.push(ChoiceMatch {
            offset: whole.start(),
            target,
            anchor_text: Some(body.clone()),
            evidence: whole.as_str().to_string(),
            choice_text: Some(sentence_around(source, whole.start())),
        });
    }

    for cap in ANCHOR_BODY_RE.captures_iter(source) {
        let whole = cap.get(0).expect("match 0");
        if covered.iter().any(|(s, e)| overlaps(*s, *e, whole.start(), whole.end())) {
            continue;
        }
        let body = strip_tags(&cap[1]);
        if let Some(turn) = TURN_TO_RE.captures(&body) {
            covered.push((whole.start(), whole.end()));
            matches.push(ChoiceMatch {
                offset: whole.start(),
                target: turn[1].to_string(),
                anchor_text: Some(body.clone()),
                evidence: whole.as_str().to_string(),
                choice_text: Some(sentence_around(source, whole.start())),
            });
        }
    }

    for cap in TURN_TO_RE.captures_iter(source) {
        let whole = cap.get(0).expect("match 0");
        if covered.iter().any(|(s, e)| overlaps(*s, *e, whole.start(), whole.end())) {
            continue;
        }
        matches.push(ChoiceMatch {
            offset: whole.start(),
            target: cap[1].to_string(),
            anchor_text: None,
            evidence: whole.as_str().to_string(),
            choice_text: Some(sentence_around(source, whole.start())),
        });
    }

    matches.sort_by_key(|m| m.offset);
    matches
}

fn overlaps(a_start: usize, a_end: usize, b_start: usize, b_end: usize) -> bool {
    a_start < b_end && b_start < a_end
}

fn strip_tags(html: &str) -> String {
    static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("tag regex"));
    TAG_RE.replace_all(html, "").trim().to_string()
}

/// The sentence containing `offset`, trimmed and capped, used as the
/// human-readable choice label.
pub fn sentence_around(source: &str, offset: usize) -> String {
    let start = source[..offset]
        .rfind(['.', '!', '?', '\n', '>'])
        .map(|i| i + 1)
        .unwrap_or(0);
    let end = source[offset..]
        .find(['.', '!', '?', '\n'])
        .map(|i| offset + i + 1)
        .unwrap_or(source.len());
    let sentence = strip_tags(&source[start..end]);
    sentence.chars().take(200).collect::<String>().trim().to_string()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anchor_extraction() {
        let html = r##"<p>If you attack, <a href="#200">turn to 200</a>.</p>"##;
        let choices = extract_choices(html);
        assert_eq!(choices.len(), 1);
        assert_eq!(choices[0].target, "200");
        assert_eq!(choices[0].anchor_text.as_deref(), Some("turn to 200"));
    }

    #[test]
    fn test_plain_text_turn_to() {
        let text = "If you flee, turn to 117. If you fight, go to 45.";
        let choices = extract_choices(text);
        assert_eq!(choices.len(), 2);
        assert_eq!(choices[0].target, "117");
        assert_eq!(choices[1].target, "45");
        assert!(choices[0].anchor_text.is_none());
    }

    #[test]
    fn test_anchor_wins_over_contained_text_match() {
        let html = r##"<a href="#200">turn to 200</a>"##;
        let choices = extract_choices(html);
        assert_eq!(choices.len(), 1);
        assert!(choices[0].anchor_text.is_some());
    }

    #[test]
    fn test_offsets_follow_source_order() {
        // anchors at positions pointing to 200, 392, 177 but in source
        // order 392 first
        let html = r##"<a href="#392">flee</a> then <a href="#200">fight</a> then <a href="#177">hide</a>"##;
        let targets: Vec<String> = extract_choices(html).into_iter().map(|c| c.target).collect();
        assert_eq!(targets, vec!["392", "200", "177"]);
    }

    #[test]
    fn test_anchor_without_numeric_href_uses_body() {
        let html = r##"<a class="x">Turn to 88</a>"##;
        let choices = extract_choices(html);
        assert_eq!(choices.len(), 1);
        assert_eq!(choices[0].target, "88");
    }

    #[test]
    fn test_proceed_and_return_variants() {
        let text = "Proceed to 12 or return to 3.";
        let targets: Vec<String> = extract_choices(text).into_iter().map(|c| c.target).collect();
        assert_eq!(targets, vec!["12", "3"]);
    }

    #[test]
    fn test_sentence_around_strips_markup() {
        let html = "<p>You see a door. If you open it, <a href=\"#9\">turn to 9</a>.</p>";
        let choices = extract_choices(html);
        let label = choices[0].choice_text.as_deref().unwrap();
        assert!(label.contains("If you open it"));
        assert!(!label.contains('<'));
    }

    #[test]
    fn test_no_choices_in_plain_prose() {
        assert!(extract_choices("The corridor is silent and empty.").is_empty());
    }
}
