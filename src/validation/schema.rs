//! Gamebook Schema Validation
//!
//! Structural pass over the raw JSON document, independent of the typed
//! model so it can reject shapes serde would silently tolerate: legacy
//! fields, malformed endpoints, under-filled `itemsAll`, unknown event
//! kinds, and the forbidden `continue_if` on stat changes.

use serde_json::Value;

use super::report::Report;

const LEGACY_FIELDS: &[&str] = &[
    "navigation",
    "combat",
    "items",
    "statModifications",
    "diceChecks",
    "deathConditions",
];

const EVENT_KINDS: &[&str] = &[
    "choice",
    "stat_change",
    "stat_check",
    "item",
    "item_check",
    "state_check",
    "test_luck",
    "combat",
    "death",
    "conditional",
];

const STATS: &[&str] = &["SKILL", "STAMINA", "LUCK", "GOLD"];
const TERMINALS: &[&str] = &["death", "win", "timeout"];

/// Run the full structural pass.
pub fn validate_schema(doc: &Value) -> Report {
    let mut report = Report::default();

    let Some(root) = doc.as_object() else {
        report.error("schema", None, "document is not a JSON object");
        return report;
    };

    match root.get("metadata") {
        Some(metadata) => validate_metadata(metadata, &mut report),
        None => report.error("schema", None, "metadata is required"),
    }

    let Some(sections) = root.get("sections").and_then(Value::as_array) else {
        report.error("schema", None, "sections array is required");
        return report;
    };

    for section in sections {
        validate_section(section, &mut report);
    }
    report
}

fn validate_metadata(metadata: &Value, report: &mut Report) {
    if metadata.get("startSection").and_then(Value::as_str).is_none() {
        report.error("schema", None, "metadata.startSection must be a string");
    }
    if metadata
        .get("validatorVersion")
        .and_then(Value::as_str)
        .is_none()
    {
        report.error("schema", None, "metadata.validatorVersion must be a string");
    }
    let range_ok = metadata
        .get("expected_range")
        .and_then(Value::as_array)
        .map_or(false, |a| a.len() == 2 && a.iter().all(|v| v.is_u64()));
    if !range_ok {
        report.error(
            "schema",
            None,
            "metadata.expected_range must be [low, high]",
        );
    }
}

fn validate_section(section: &Value, report: &mut Report) {
    let id = section.get("id").and_then(Value::as_str);
    let Some(id) = id else {
        report.error("schema", None, "section without string id");
        return;
    };

    for legacy in LEGACY_FIELDS {
        if section.get(*legacy).is_some() {
            report.error(
                "legacy_field",
                Some(id),
                format!("legacy field {legacy} is forbidden"),
            );
        }
    }

    let Some(sequence) = section.get("sequence").and_then(Value::as_array) else {
        report.error("schema", Some(id), "section.sequence must be an array");
        return;
    };
    for event in sequence {
        validate_event(event, id, report);
    }
}

fn validate_event(event: &Value, section: &str, report: &mut Report) {
    let Some(kind) = event.get("kind").and_then(Value::as_str) else {
        report.error("schema", Some(section), "sequence event without kind");
        return;
    };
    if !EVENT_KINDS.contains(&kind) {
        report.error(
            "schema",
            Some(section),
            format!("unknown event kind {kind}"),
        );
        return;
    }

    match kind {
        "choice" => {
            validate_endpoint_fields(event, section, report);
            if let Some(effects) = event.get("effects") {
                let ok = effects.as_array().map_or(false, |a| {
                    a.iter().all(|e| {
                        e.get("action").and_then(Value::as_str).is_some()
                            && e.get("name").and_then(Value::as_str).is_some()
                    })
                });
                if !ok {
                    report.error("schema", Some(section), "choice.effects malformed");
                }
            }
        }
        "stat_change" => {
            validate_stat(event, section, report);
            let amount_ok = event
                .get("amount")
                .map_or(false, |a| a.is_i64() || a.is_u64() || a.is_string());
            if !amount_ok {
                report.error(
                    "schema",
                    Some(section),
                    "stat_change.amount must be an integer or dice expression",
                );
            }
            if event.get("continue_if").is_some() {
                report.error(
                    "schema",
                    Some(section),
                    "stat_change.continue_if is forbidden; survival is a global rule",
                );
            }
        }
        "stat_check" => {
            validate_stat(event, section, report);
            for branch in ["pass", "fail"] {
                if let Some(e) = event.get(branch) {
                    validate_endpoint(e, section, report);
                }
            }
        }
        "item" => {
            if event.get("action").and_then(Value::as_str).is_none()
                || event.get("name").and_then(Value::as_str).is_none()
            {
                report.error("schema", Some(section), "item event needs action and name");
            }
        }
        "item_check" => {
            let has_name = event.get("itemName").and_then(Value::as_str).is_some();
            let items_all = event.get("itemsAll").and_then(Value::as_array);
            if let Some(items) = items_all {
                if items.len() < 2 {
                    report.error(
                        "schema",
                        Some(section),
                        "item_check.itemsAll requires at least 2 items",
                    );
                }
            } else if !has_name {
                report.error(
                    "schema",
                    Some(section),
                    "item_check needs itemName or itemsAll",
                );
            }
            for branch in ["has", "missing"] {
                if let Some(e) = event.get(branch) {
                    validate_endpoint(e, section, report);
                }
            }
        }
        "state_check" => {
            for branch in ["has", "missing"] {
                if let Some(e) = event.get(branch) {
                    validate_endpoint(e, section, report);
                }
            }
        }
        "test_luck" => {
            for branch in ["lucky", "unlucky"] {
                if let Some(e) = event.get(branch) {
                    validate_endpoint(e, section, report);
                }
            }
        }
        "combat" => {
            let enemies_ok = event.get("enemies").and_then(Value::as_array).map_or(
                false,
                |enemies| {
                    !enemies.is_empty()
                        && enemies.iter().all(|e| {
                            e.get("name").and_then(Value::as_str).is_some()
                                && e.get("SKILL").and_then(Value::as_u64).is_some()
                                && e.get("STAMINA").and_then(Value::as_u64).is_some()
                        })
                },
            );
            if !enemies_ok {
                report.error(
                    "schema",
                    Some(section),
                    "combat.enemies must list name/SKILL/STAMINA blocks",
                );
            }
            if let Some(outcomes) = event.get("outcomes") {
                for branch in ["win", "lose", "escape"] {
                    if let Some(e) = outcomes.get(branch) {
                        validate_endpoint(e, section, report);
                    }
                }
            }
        }
        "death" => {
            let ok = event
                .get("outcome")
                .and_then(Value::as_str)
                .map_or(false, |t| TERMINALS.contains(&t));
            if !ok {
                report.error("schema", Some(section), "death.outcome must be a terminal");
            }
        }
        "conditional" => {
            let condition_ok = event.get("condition").and_then(Value::as_object).map_or(
                false,
                |c| c.get("item").is_some() || c.get("state").is_some(),
            );
            if !condition_ok {
                report.error(
                    "schema",
                    Some(section),
                    "conditional.condition needs item or state",
                );
            }
            match event.get("then").and_then(Value::as_array) {
                Some(then) => {
                    for nested in then {
                        validate_event(nested, section, report);
                    }
                }
                None => report.error("schema", Some(section), "conditional.then must be an array"),
            }
            if let Some(else_events) = event.get("else") {
                match else_events.as_array() {
                    Some(arr) => {
                        for nested in arr {
                            validate_event(nested, section, report);
                        }
                    }
                    None => {
                        report.error("schema", Some(section), "conditional.else must be an array")
                    }
                }
            }
        }
        _ => unreachable!("kind checked against EVENT_KINDS"),
    }
}

fn validate_stat(event: &Value, section: &str, report: &mut Report) {
    let ok = event
        .get("stat")
        .and_then(Value::as_str)
        .map_or(false, |s| STATS.contains(&s));
    if !ok {
        report.error(
            "schema",
            Some(section),
            "stat must be SKILL, STAMINA, LUCK or GOLD",
        );
    }
}

/// An endpoint object must set exactly one of `targetSection`/`terminal`.
fn validate_endpoint(endpoint: &Value, section: &str, report: &mut Report) {
    validate_endpoint_object(endpoint, section, report, false);
}

/// Choice events carry the endpoint fields inline.
fn validate_endpoint_fields(event: &Value, section: &str, report: &mut Report) {
    validate_endpoint_object(event, section, report, true);
}

fn validate_endpoint_object(value: &Value, section: &str, report: &mut Report, inline: bool) {
    let target = value.get("targetSection");
    let terminal = value.get("terminal");
    let context = if inline { "choice" } else { "endpoint" };
    match (target, terminal) {
        (Some(t), None) => {
            if !t.is_string() {
                report.error(
                    "schema",
                    Some(section),
                    format!("{context}.targetSection must be a string"),
                );
            }
        }
        (None, Some(t)) => {
            let ok = t.as_str().map_or(false, |s| TERMINALS.contains(&s));
            if !ok {
                report.error(
                    "schema",
                    Some(section),
                    format!("{context}.terminal must be death, win or timeout"),
                );
            }
        }
        (Some(_), Some(_)) => report.error(
            "schema",
            Some(section),
            format!("{context} sets both targetSection and terminal"),
        ),
        (None, None) => report.error(
            "schema",
            Some(section),
            format!("{context} sets neither targetSection nor terminal"),
        ),
    }
}

// ============================================================================
// Tests
// ============================================================================
