//! Target Normalization
//!
//! Every branch endpoint funnels through `normalize_target`: messy raw
//! strings become `{targetSection}` or `{terminal}`, and anything
//! unresolvable becomes `None` so the caller drops the event instead of
//! emitting a broken edge.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{Endpoint, Terminal};

static FIRST_INT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("int regex"));

/// Normalize a raw target string.
///
/// `"16 (try again)"` → section 16; `"death (no section number)"` →
/// terminal death; `"0"`, empty, or digit-free prose → `None`.
pub fn normalize_target(raw: &str) -> Option<Endpoint> {
    let lowered = raw.trim().to_lowercase();
    if lowered.is_empty() {
        return None;
    }

    if lowered.contains("death") || lowered.contains("you die") || lowered.contains("you are dead")
    {
        return Some(Endpoint::terminal(Terminal::Death));
    }
    if lowered.contains("win") || lowered.contains("victory") {
        return Some(Endpoint::terminal(Terminal::Win));
    }
    if lowered.contains("timeout") || lowered.contains("time runs out") {
        return Some(Endpoint::terminal(Terminal::Timeout));
    }

    let number: u32 = FIRST_INT_RE.find(&lowered)?.as_str().parse().ok()?;
    if number == 0 {
        return None;
    }
    Some(Endpoint::target(number.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("16", Some(Endpoint::target("16")))]
    #[case("16 (try again)", Some(Endpoint::target("16")))]
    #[case("turn to 117", Some(Endpoint::target("117")))]
    #[case("death (no section number)", Some(Endpoint::terminal(Terminal::Death)))]
    #[case("victory!", Some(Endpoint::terminal(Terminal::Win)))]
    #[case("the time runs out", Some(Endpoint::terminal(Terminal::Timeout)))]
    #[case("0", None)]
    #[case("somewhere else", None)]
    #[case("", None)]
    fn test_normalize_target(#[case] raw: &str, #[case] expected: Option<Endpoint>) {
        assert_eq!(normalize_target(raw), expected);
    }
}
