//! Combat Block Extraction
//!
//! Enemy stat lines ("ORC  SKILL 6  STAMINA 5") grouped into combat
//! events. Consecutive enemy lines fight together. Win/lose/escape
//! branches found after the block become `outcomes`; the sequence stage
//! keeps any outcome choices positioned after the combat event itself.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{CombatOutcomes, Enemy, Event, ExtractedEvent};

use super::target::normalize_target;

static ENEMY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)(?P<name>[A-Z][A-Z'\- ]{1,30}?)\s+SKILL\s+(?P<skill>\d{1,2})\s+STAMINA\s+(?P<stamina>\d{1,2})",
    )
    .expect("enemy regex")
});

static WIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)if\s+you\s+(?:win|defeat|are\s+victorious|kill)[^.]{0,100}")
        .expect("win regex")
});
static LOSE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)if\s+you\s+(?:lose|are\s+defeated|are\s+killed)[^.]{0,100}")
        .expect("lose regex")
});
static ESCAPE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:escape|flee)[^.]{0,100}?turn\s+to\s+(\d{1,4})").expect("escape regex")
});

/// Enemy matches within this many chars of each other fight as one block.
const GROUP_GAP: usize = 120;

/// All combat events in the source, in offset order.
pub fn extract_combat(source: &str) -> Vec<ExtractedEvent> {
    let mut raw: Vec<(usize, usize, Enemy)> = Vec::new();
    for cap in ENEMY_RE.captures_iter(source) {
        let whole = cap.get(0).expect("match 0");
        let Ok(skill) = cap["skill"].parse() else { continue };
        let Ok(stamina) = cap["stamina"].parse() else { continue };
        raw.push((
            whole.start(),
            whole.end(),
            Enemy {
                name: cap["name"].trim().to_string(),
                skill,
                stamina,
            },
        ));
    }
    if raw.is_empty() {
        return Vec::new();
    }

    // Group adjacent enemy lines into one block.
    let mut events = Vec::new();
    let mut block: Vec<(usize, usize, Enemy)> = vec![raw[0].clone()];
    for entry in raw.into_iter().skip(1) {
        let prev_end = block.last().expect("non-empty block").1;
        if entry.0.saturating_sub(prev_end) <= GROUP_GAP {
            block.push(entry);
        } else {
            events.push(finish_block(source, std::mem::replace(&mut block, vec![entry])));
        }
    }
    events.push(finish_block(source, block));
    events
}

fn finish_block(source: &str, block: Vec<(usize, usize, Enemy)>) -> ExtractedEvent {
    let start = block.first().expect("non-empty block").0;
    let end = block.last().expect("non-empty block").1;
    let enemies: Vec<Enemy> = block.iter().map(|(_, _, e)| e.clone()).collect();

    let tail = crate::extraction::slice_window(source, end, end + 500);
    let outcomes = CombatOutcomes {
        win: WIN_RE.find(tail).and_then(|m| normalize_target(m.as_str())),
        lose: LOSE_RE.find(tail).and_then(|m| normalize_target(m.as_str())),
        escape: ESCAPE_RE
            .captures(tail)
            .and_then(|c| normalize_target(&c[1])),
    };

    ExtractedEvent {
        offset: start,
        evidence: source[start..end].to_string(),
        event: Event::Combat {
            enemies,
            outcomes: if outcomes.is_empty() {
                None
            } else {
                Some(outcomes)
            },
        },
    }
}

// ============================================================================
// Tests
// ============================================================================
