//! Validation Report Types
//!
//! Shared error/warning shape for the schema and logic passes. An entry
//! carries a stable `code` (what check fired), the section involved when
//! there is one, and a human-readable message.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    pub message: String,
}

impl Entry {
    pub fn new(code: &str, section: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            section: section.map(str::to_string),
            message: message.into(),
        }
    }
}

/// One pass's findings. Pass/fail is decided by `errors` alone; warnings
/// never gate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Report {
    #[serde(default)]
    pub errors: Vec<Entry>,
    #[serde(default)]
    pub warnings: Vec<Entry>,
}

impl Report {
    pub fn error(&mut self, code: &str, section: Option<&str>, message: impl Into<String>) {
        self.errors.push(Entry::new(code, section, message));
    }

    pub fn warn(&mut self, code: &str, section: Option<&str>, message: impl Into<String>) {
        self.warnings.push(Entry::new(code, section, message));
    }

    pub fn passed(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn merge(&mut self, other: Report) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    pub fn count_code(&self, code: &str) -> usize {
        self.errors
            .iter()
            .chain(self.warnings.iter())
            .filter(|e| e.code == code)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_depends_on_errors_only() {
        let mut r = Report::default();
        r.warn("empty_text", Some("7"), "section 7 has no text");
        assert!(r.passed());
        r.error("broken_link", Some("7"), "target 999 does not exist");
        assert!(!r.passed());
    }

    #[test]
    fn test_merge_and_count() {
        let mut a = Report::default();
        a.error("duplicate_id", Some("3"), "dup");
        let mut b = Report::default();
        b.warn("duplicate_id", Some("4"), "dup again");
        a.merge(b);
        assert_eq!(a.count_code("duplicate_id"), 2);
    }
}
