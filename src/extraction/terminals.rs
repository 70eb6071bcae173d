//! Terminal Outcome Extraction
//!
//! Death and victory phrases with no onward section. Synthesized as
//! `death` events (`terminal: "death"`) or win terminals so the graph
//! validator sees a legitimate endpoint instead of a dead end.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{Event, ExtractedEvent, Terminal};

use super::choices::sentence_around;

static DEATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:your\s+(?:adventure|quest|journey)\s+ends\s+here|your\s+life\s+and\s+your\s+adventure\s+end\s+here|you\s+are\s+dead|your\s+adventure\s+is\s+over)\b",
    )
    .expect("death regex")
});

static WIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:you\s+have\s+(?:completed|fulfilled)\s+your\s+(?:quest|mission)|your\s+quest\s+is\s+complete|you\s+have\s+won|victory\s+is\s+yours)\b",
    )
    .expect("win regex")
});

/// Terminal events in the source, in offset order.
pub fn extract_terminals(source: &str) -> Vec<ExtractedEvent> {
    let mut events = Vec::new();

    for m in DEATH_RE.find_iter(source) {
        events.push(ExtractedEvent {
            offset: m.start(),
            evidence: m.as_str().to_string(),
            event: Event::Death {
                outcome: Terminal::Death,
                description: Some(sentence_around(source, m.start())),
            },
        });
    }
    for m in WIN_RE.find_iter(source) {
        events.push(ExtractedEvent {
            offset: m.start(),
            evidence: m.as_str().to_string(),
            event: Event::Death {
                outcome: Terminal::Win,
                description: Some(sentence_around(source, m.start())),
            },
        });
    }

    events.sort_by_key(|e| e.offset);
    events
}
