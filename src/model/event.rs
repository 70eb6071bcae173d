//! Gameplay Sequence Events
//!
//! The tagged union carried by every section's `sequence` array, keyed on
//! `kind`. Branch endpoints are `{targetSection}` or `{terminal}` — exactly
//! one of the two. Legacy shapes (top-level `navigation`, `combat`, `items`,
//! `statModifications`, `diceChecks`, `deathConditions`) are forbidden in
//! the emitted schema and rejected by the validator.

use serde::{Deserialize, Serialize};

// ============================================================================
// Endpoints
// ============================================================================

/// Terminal outcomes a branch may end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Terminal {
    Death,
    Win,
    Timeout,
}

/// A branch endpoint: a section to turn to, or a terminal outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Endpoint {
    Target {
        #[serde(rename = "targetSection")]
        target_section: String,
    },
    Terminal { terminal: Terminal },
}

impl Endpoint {
    pub fn target(section: impl Into<String>) -> Self {
        Self::Target {
            target_section: section.into(),
        }
    }

    pub fn terminal(terminal: Terminal) -> Self {
        Self::Terminal { terminal }
    }

    pub fn target_section(&self) -> Option<&str> {
        match self {
            Self::Target { target_section } => Some(target_section),
            Self::Terminal { .. } => None,
        }
    }
}

// ============================================================================
// Event Payload Types
// ============================================================================

/// Player stats a gamebook manipulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Stat {
    Skill,
    Stamina,
    Luck,
    Gold,
}

/// A stat delta: a fixed integer or a dice expression kept verbatim
/// (e.g. `-(1d6+2)`), resolved by the engine at play time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Amount {
    Fixed(i64),
    Dice(String),
}

/// Inventory actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemAction {
    Add,
    Remove,
    Reference,
}

/// An inventory event, standalone or attached to a choice as an effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemEvent {
    pub action: ItemAction,
    pub name: String,
}

/// An enemy stat block inside a combat event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enemy {
    pub name: String,
    #[serde(rename = "SKILL")]
    pub skill: u32,
    #[serde(rename = "STAMINA")]
    pub stamina: u32,
}

/// Branch endpoints keyed by combat result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CombatOutcomes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub win: Option<Endpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lose: Option<Endpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escape: Option<Endpoint>,
}

impl CombatOutcomes {
    pub fn is_empty(&self) -> bool {
        self.win.is_none() && self.lose.is_none() && self.escape.is_none()
    }
}

/// Condition guarding a conditional event: an item held or a state flag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

// ============================================================================
// The Event Union
// ============================================================================

/// One entry of a section's `sequence`, in source-text order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    #[serde(rename_all = "camelCase")]
    Choice {
        #[serde(flatten)]
        endpoint: Endpoint,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        choice_text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        effects: Option<Vec<ItemEvent>>,
    },
    #[serde(rename_all = "camelCase")]
    StatChange {
        stat: Stat,
        amount: Amount,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        permanent: Option<bool>,
    },
    #[serde(rename_all = "camelCase")]
    StatCheck {
        stat: Stat,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dice_roll: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pass_condition: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fail_condition: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pass: Option<Endpoint>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fail: Option<Endpoint>,
    },
    Item {
        action: ItemAction,
        name: String,
    },
    #[serde(rename_all = "camelCase")]
    ItemCheck {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        item_name: Option<String>,
        /// AND-semantics over all listed items; requires at least two.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        items_all: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        has: Option<Endpoint>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        missing: Option<Endpoint>,
    },
    #[serde(rename_all = "camelCase")]
    StateCheck {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        condition_text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        has: Option<Endpoint>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        missing: Option<Endpoint>,
    },
    TestLuck {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lucky: Option<Endpoint>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unlucky: Option<Endpoint>,
    },
    Combat {
        enemies: Vec<Enemy>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        outcomes: Option<CombatOutcomes>,
    },
    Death {
        outcome: Terminal,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Conditional {
        condition: Condition,
        then: Vec<Event>,
        #[serde(rename = "else", default, skip_serializing_if = "Option::is_none")]
        r#else: Option<Vec<Event>>,
    },
}

impl Event {
    /// Convenience constructor for a bare choice.
    pub fn choice_to(section: impl Into<String>) -> Self {
        Event::Choice {
            endpoint: Endpoint::target(section),
            choice_text: None,
            effects: None,
        }
    }

    /// The `kind` tag value, for reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Choice { .. } => "choice",
            Event::StatChange { .. } => "stat_change",
            Event::StatCheck { .. } => "stat_check",
            Event::Item { .. } => "item",
            Event::ItemCheck { .. } => "item_check",
            Event::StateCheck { .. } => "state_check",
            Event::TestLuck { .. } => "test_luck",
            Event::Combat { .. } => "combat",
            Event::Death { .. } => "death",
            Event::Conditional { .. } => "conditional",
        }
    }

    /// Visit every endpoint reachable from this event, including those
    /// nested under `pass`/`fail`, `has`/`missing`, combat outcomes and
    /// `conditional.then`/`else`.
    pub fn walk_endpoints<'a>(&'a self, f: &mut impl FnMut(&'a Endpoint)) {
        match self {
            Event::Choice { endpoint, .. } => f(endpoint),
            Event::StatChange { .. } | Event::Item { .. } | Event::Death { .. } => {}
            Event::StatCheck { pass, fail, .. } => {
                if let Some(e) = pass {
                    f(e);
                }
                if let Some(e) = fail {
                    f(e);
                }
            }
            Event::ItemCheck { has, missing, .. } | Event::StateCheck { has, missing, .. } => {
                if let Some(e) = has {
                    f(e);
                }
                if let Some(e) = missing {
                    f(e);
                }
            }
            Event::TestLuck { lucky, unlucky } => {
                if let Some(e) = lucky {
                    f(e);
                }
                if let Some(e) = unlucky {
                    f(e);
                }
            }
            Event::Combat { outcomes, .. } => {
                if let Some(o) = outcomes {
                    for e in [&o.win, &o.lose, &o.escape].into_iter().flatten() {
                        f(e);
                    }
                }
            }
            Event::Conditional { then, r#else, .. } => {
                for ev in then {
                    ev.walk_endpoints(f);
                }
                if let Some(else_events) = r#else {
                    for ev in else_events {
                        ev.walk_endpoints(f);
                    }
                }
            }
        }
    }

    /// All target section ids reachable from this event.
    pub fn target_sections(&self) -> Vec<String> {
        let mut targets = Vec::new();
        self.walk_endpoints(&mut |e| {
            if let Some(t) = e.target_section() {
                targets.push(t.to_string());
            }
        });
        targets
    }
}

// ============================================================================
// Tests
// ============================================================================
