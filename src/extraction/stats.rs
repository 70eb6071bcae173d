//! Stat Modification and Check Extraction
//!
//! Deterministic patterns for the stat economy: `lose/gain N STAT`, dice
//! deltas like `lose 1d6+2 STAMINA`, Test-your-Luck blocks, and generic
//! stat checks with pass/fail branches. Branch tails go through
//! `normalize_target`, so `"death (no section number)"` lands as a
//! terminal, not a broken edge.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{Amount, Event, ExtractedEvent, Stat};

use super::target::normalize_target;

/// `lose 2 STAMINA`, `gain 1 SKILL point`, `restore 4 points of STAMINA`,
/// `lose 1d6+2 STAMINA`.
static STAT_DELTA_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)
        \b(?P<verb>lose|deduct|gain|add|restore|recover)\s+
        (?P<amount>\d+\s*d\s*\d+(?:\s*[+-]\s*\d+)?|\d+)\s+
        (?:points?\s+(?:of|from)\s+(?:your\s+)?)?
        (?:your\s+)?
        (?P<stat>skill|stamina|luck|gold)
        (?:\s+(?P<perm>permanently))?
        ",
    )
    .expect("stat delta regex")
});

/// `deduct 2 from your SKILL`.
static DEDUCT_FROM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:deduct|subtract)\s+(\d+|\d+\s*d\s*\d+(?:\s*[+-]\s*\d+)?)\s+from\s+your\s+(skill|stamina|luck|gold)(\s+permanently)?",
    )
    .expect("deduct-from regex")
});

static TEST_LUCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\btest\s+your\s+luck\b").expect("test luck regex"));

static TEST_SKILL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\btest\s+your\s+skill\b").expect("test skill regex"));

/// `roll two dice ... your SKILL` style checks.
static DICE_CHECK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\broll\s+(two|three|2|3)\s+dice\b[^.]{0,120}?\byour\s+(skill|stamina|luck)\b")
        .expect("dice check regex")
});

static LUCKY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)if\s+you\s+are\s+lucky\b[^.]{0,100}").expect("lucky regex")
});
static UNLUCKY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)if\s+you\s+are\s+unlucky\b[^.]{0,100}").expect("unlucky regex")
});
static SUCCEED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)if\s+you\s+(?:succeed|are\s+successful|pass)\b[^.]{0,100}")
        .expect("succeed regex")
});
static FAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)if\s+you\s+(?:fail|are\s+unsuccessful)\b[^.]{0,100}").expect("fail regex")
});

fn parse_stat(s: &str) -> Stat {
    match s.to_ascii_lowercase().as_str() {
        "skill" => Stat::Skill,
        "stamina" => Stat::Stamina,
        "luck" => Stat::Luck,
        _ => Stat::Gold,
    }
}

/// Build the signed amount. Dice expressions are preserved verbatim
/// (whitespace dropped); losses wrap as `-(expr)`.
fn build_amount(raw: &str, negative: bool) -> Amount {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.contains(['d', 'D']) {
        let expr = compact.to_lowercase();
        if negative {
            Amount::Dice(format!("-({expr})"))
        } else {
            Amount::Dice(expr)
        }
    } else {
        let value: i64 = compact.parse().unwrap_or(0);
        Amount::Fixed(if negative { -value } else { value })
    }
}

/// All stat deltas in the source, in offset order.
pub fn extract_stat_changes(source: &str) -> Vec<ExtractedEvent> {
    let mut events = Vec::new();

    for cap in STAT_DELTA_RE.captures_iter(source) {
        let whole = cap.get(0).expect("match 0");
        let verb = cap["verb"].to_ascii_lowercase();
        let negative = matches!(verb.as_str(), "lose" | "deduct");
        events.push(ExtractedEvent {
            offset: whole.start(),
            evidence: whole.as_str().to_string(),
            event: Event::StatChange {
                stat: parse_stat(&cap["stat"]),
                amount: build_amount(&cap["amount"], negative),
                permanent: cap.name("perm").map(|_| true),
            },
        });
    }

    for cap in DEDUCT_FROM_RE.captures_iter(source) {
        let whole = cap.get(0).expect("match 0");
        if events.iter().any(|e| e.offset == whole.start()) {
            continue;
        }
        events.push(ExtractedEvent {
            offset: whole.start(),
            evidence: whole.as_str().to_string(),
            event: Event::StatChange {
                stat: parse_stat(&cap[2]),
                amount: build_amount(&cap[1], true),
                permanent: cap.get(3).map(|_| true),
            },
        });
    }

    events.sort_by_key(|e| e.offset);
    events
}

/// Test-your-Luck blocks and generic stat checks with branch endpoints.
pub fn extract_stat_checks(source: &str) -> Vec<ExtractedEvent> {
    let mut events = Vec::new();

    for m in TEST_LUCK_RE.find_iter(source) {
        let tail = crate::extraction::slice_window(source, m.end(), m.end() + 400);
        let lucky = LUCKY_RE
            .find(tail)
            .and_then(|b| normalize_target(b.as_str()));
        let unlucky = UNLUCKY_RE
            .find(tail)
            .and_then(|b| normalize_target(b.as_str()));
        events.push(ExtractedEvent {
            offset: m.start(),
            evidence: m.as_str().to_string(),
            event: Event::TestLuck { lucky, unlucky },
        });
    }

    for m in TEST_SKILL_RE.find_iter(source) {
        events.push(stat_check_at(source, m.start(), m.end(), Stat::Skill, "2d6"));
    }

    for cap in DICE_CHECK_RE.captures_iter(source) {
        let whole = cap.get(0).expect("match 0");
        // Test-your-X phrasings already captured above.
        if events.iter().any(|e| {
            e.offset <= whole.start() && whole.start() < e.offset + e.evidence.len() + 40
        }) {
            continue;
        }
        let dice = match cap[1].to_ascii_lowercase().as_str() {
            "three" | "3" => "3d6",
            _ => "2d6",
        };
        events.push(stat_check_at(
            source,
            whole.start(),
            whole.end(),
            parse_stat(&cap[2]),
            dice,
        ));
    }

    events.sort_by_key(|e| e.offset);
    events
}

fn stat_check_at(source: &str, start: usize, end: usize, stat: Stat, dice: &str) -> ExtractedEvent {
    let tail = crate::extraction::slice_window(source, end, end + 400);
    let pass_text = SUCCEED_RE.find(tail).map(|m| m.as_str().to_string());
    let fail_text = FAIL_RE.find(tail).map(|m| m.as_str().to_string());
    let pass = pass_text.as_deref().and_then(normalize_target);
    let fail = fail_text.as_deref().and_then(normalize_target);
    ExtractedEvent {
        offset: start,
        evidence: source[start..end].to_string(),
        event: Event::StatCheck {
            stat,
            dice_roll: Some(dice.to_string()),
            pass_condition: pass_text,
            fail_condition: fail_text,
            pass,
            fail,
        },
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Endpoint, Terminal};

    #[test]
    fn test_lose_fixed_stamina() {
        let events = extract_stat_changes("The blow hurts. Lose 2 STAMINA and press on.");
        assert_eq!(events.len(), 1);
        match &events[0].event {
            Event::StatChange { stat, amount, permanent } => {
                assert_eq!(*stat, Stat::Stamina);
                assert_eq!(*amount, Amount::Fixed(-2));
                assert!(permanent.is_none());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_gain_gold_and_permanent_skill_loss() {
        let events =
            extract_stat_changes("You gain 5 GOLD. The curse means you lose 1 SKILL permanently.");
        assert_eq!(events.len(), 2);
        match &events[1].event {
            Event::StatChange { stat, amount, permanent } => {
                assert_eq!(*stat, Stat::Skill);
                assert_eq!(*amount, Amount::Fixed(-1));
                assert_eq!(*permanent, Some(true));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_dice_expression_preserved() {
        let events = extract_stat_changes("The fall is brutal: lose 1d6+2 STAMINA.");
        match &events[0].event {
            Event::StatChange { amount, .. } => {
                assert_eq!(*amount, Amount::Dice("-(1d6+2)".to_string()));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_deduct_from_your_skill() {
        let events = extract_stat_changes("Deduct 2 from your SKILL while you carry the cursed axe.");
        match &events[0].event {
            Event::StatChange { stat, amount, .. } => {
                assert_eq!(*stat, Stat::Skill);
                assert_eq!(*amount, Amount::Fixed(-2));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_test_luck_branches() {
        let text = "Test your Luck. If you are lucky, turn to 33. If you are unlucky, turn to 66.";
        let events = extract_stat_checks(text);
        assert_eq!(events.len(), 1);
        match &events[0].event {
            Event::TestLuck { lucky, unlucky } => {
                assert_eq!(*lucky, Some(Endpoint::target("33")));
                assert_eq!(*unlucky, Some(Endpoint::target("66")));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_stat_check_with_terminal_fail() {
        let text = "Test your Skill. If you succeed, turn to 44. If you fail, death (no section number).";
        let events = extract_stat_checks(text);
        match &events[0].event {
            Event::StatCheck { stat, pass, fail, dice_roll, .. } => {
                assert_eq!(*stat, Stat::Skill);
                assert_eq!(*pass, Some(Endpoint::target("44")));
                assert_eq!(*fail, Some(Endpoint::terminal(Terminal::Death)));
                assert_eq!(dice_roll.as_deref(), Some("2d6"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_roll_dice_check() {
        let text = "Roll two dice and compare the total with your SKILL score. \
                    If you succeed, turn to 10. If you fail, turn to 20.";
        let events = extract_stat_checks(text);
        assert_eq!(events.len(), 1);
        match &events[0].event {
            Event::StatCheck { stat, .. } => assert_eq!(*stat, Stat::Skill),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_no_stat_noise_in_plain_prose() {
        assert!(extract_stat_changes("The room is lit by a single torch.").is_empty());
        assert!(extract_stat_checks("The room is lit by a single torch.").is_empty());
    }
}
