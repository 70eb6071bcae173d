//! Gamebook Logic Validation
//!
//! Semantic pass over the typed document: missing and duplicate ids,
//! empty sections, target integrity across every nested branch, BFS
//! reachability from the start section, and the validator version stamp.
//! Sections reference each other by id string; the graph exists only at
//! validation time.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::model::{Gamebook, Section};

use super::report::Report;
use super::VALIDATOR_VERSION;

/// Run the full logic pass. `extra_allowlist` supplements the stub
/// sections already present in the document (stubs are the builder's
/// rendering of the known-missing allowlist).
pub fn validate_logic(gamebook: &Gamebook, extra_allowlist: &[u32]) -> Report {
    let mut report = Report::default();

    let mut allowlist: HashSet<u32> = extra_allowlist.iter().copied().collect();
    for section in &gamebook.sections {
        if section.is_stub() {
            if let Ok(id) = section.id.parse() {
                allowlist.insert(id);
            }
        }
    }

    check_duplicates(gamebook, &mut report);
    check_missing(gamebook, &allowlist, &mut report);
    check_empty(gamebook, &mut report);
    check_targets(gamebook, &mut report);
    check_reachability(gamebook, &allowlist, &mut report);
    check_version(gamebook, &mut report);

    report
}

fn check_duplicates(gamebook: &Gamebook, report: &mut Report) {
    let mut seen = HashSet::new();
    for section in &gamebook.sections {
        if !seen.insert(section.id.as_str()) {
            report.error(
                "duplicate_id",
                Some(&section.id),
                format!("section id {} appears more than once", section.id),
            );
        }
    }
}

fn check_missing(gamebook: &Gamebook, allowlist: &HashSet<u32>, report: &mut Report) {
    let present: HashSet<u32> = gamebook
        .sections
        .iter()
        .filter(|s| !s.is_stub())
        .filter_map(|s| s.id.parse().ok())
        .collect();
    let (lo, hi) = gamebook.metadata.expected_range;
    for id in lo..=hi {
        if !present.contains(&id) && !allowlist.contains(&id) {
            report.error(
                "missing_section",
                Some(&id.to_string()),
                format!("expected section {id} is absent"),
            );
        }
    }
}

fn check_empty(gamebook: &Gamebook, report: &mut Report) {
    for section in &gamebook.sections {
        if section.is_stub() {
            continue;
        }
        if section.text.trim().is_empty() {
            report.warn(
                "empty_text",
                Some(&section.id),
                format!("section {} has no text", section.id),
            );
        }
        if section.is_gameplay_section && !has_outgoing(section) {
            report.warn(
                "no_outgoing",
                Some(&section.id),
                format!("gameplay section {} has no outgoing edges or terminal", section.id),
            );
        }
    }
}

fn has_outgoing(section: &Section) -> bool {
    if !section.outgoing_targets().is_empty() {
        return true;
    }
    // A terminal anywhere in the sequence is a legitimate ending.
    section.sequence.iter().any(|e| {
        let mut has_terminal = matches!(e, crate::model::Event::Death { .. });
        e.walk_endpoints(&mut |endpoint| {
            if endpoint.target_section().is_none() {
                has_terminal = true;
            }
        });
        has_terminal
    })
}

fn check_targets(gamebook: &Gamebook, report: &mut Report) {
    let ids: HashSet<&str> = gamebook.sections.iter().map(|s| s.id.as_str()).collect();
    for section in &gamebook.sections {
        for target in section.outgoing_targets() {
            if !ids.contains(target.as_str()) {
                report.error(
                    "broken_link",
                    Some(&section.id),
                    format!("section {} references nonexistent section {target}", section.id),
                );
            }
        }
    }
}

fn check_reachability(gamebook: &Gamebook, allowlist: &HashSet<u32>, report: &mut Report) {
    let by_id: HashMap<&str, &Section> =
        gamebook.sections.iter().map(|s| (s.id.as_str(), s)).collect();
    let start = gamebook.metadata.start_section.as_str();

    let mut visited: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    // The background section is an entry point too: it leads to start.
    for entry in [start, crate::model::BACKGROUND_SECTION_ID] {
        if by_id.contains_key(entry) && visited.insert(entry) {
            queue.push_back(entry);
        }
    }
    if !by_id.contains_key(start) {
        report.error(
            "broken_link",
            None,
            format!("start section {start} does not exist"),
        );
    }

    while let Some(id) = queue.pop_front() {
        let Some(section) = by_id.get(id) else { continue };
        for target in section.outgoing_targets() {
            if let Some(next) = by_id.get(target.as_str()) {
                if visited.insert(next.id.as_str()) {
                    queue.push_back(next.id.as_str());
                }
            }
        }
    }

    for section in &gamebook.sections {
        if !section.is_gameplay_section || visited.contains(section.id.as_str()) {
            continue;
        }
        let allowlisted = section
            .id
            .parse::<u32>()
            .map_or(false, |n| allowlist.contains(&n));
        if !allowlisted {
            report.warn(
                "orphan",
                Some(&section.id),
                format!("section {} is unreachable from {start}", section.id),
            );
        }
    }
}

fn check_version(gamebook: &Gamebook, report: &mut Report) {
    if gamebook.metadata.validator_version != VALIDATOR_VERSION {
        report.warn(
            "version_mismatch",
            None,
            format!(
                "gamebook stamped with validator {} but validating with {}",
                gamebook.metadata.validator_version, VALIDATOR_VERSION
            ),
        );
    }
}

// ============================================================================
// Tests
// ============================================================================
