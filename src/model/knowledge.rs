//! Knowledge-base export types.
//!
//! The knowledge base is an external store; these types describe the
//! snapshot it exports. Waymark only reads them.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use super::primitive::{LocatorSpec, Primitive};

/// How many recent outcomes the quarantine rule looks at.
pub const QUARANTINE_WINDOW: usize = 5;

/// Failures within the window that quarantine a pattern.
pub const QUARANTINE_FAILURES: usize = 3;

/// The exported snapshot, as read from disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeExport {
    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub patterns: Vec<LearnedPattern>,

    #[serde(default)]
    pub glossary: Vec<GlossaryEntry>,

    #[serde(default)]
    pub locators: Vec<LocatorOverride>,
}

/// A trigger → primitive pattern learned by the knowledge base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnedPattern {
    pub id: String,

    /// Normalized trigger text. `{name}` placeholders capture part of the
    /// instruction and are substituted into the template.
    pub trigger: String,

    pub template: Primitive,

    /// Suggested timeout for the produced primitive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing_hint_ms: Option<u64>,

    pub confidence: f64,

    /// Recorded outcomes, oldest first.
    #[serde(default)]
    pub outcomes: Vec<PatternOutcome>,

    #[serde(default)]
    pub quarantined: bool,

    #[serde(default)]
    pub provenance: Provenance,
}

impl LearnedPattern {
    /// Quarantined by flag, or by at least three failures in the last five outcomes.
    pub fn is_quarantined(&self) -> bool {
        if self.quarantined {
            return true;
        }
        let recent_failures = self
            .outcomes
            .iter()
            .rev()
            .take(QUARANTINE_WINDOW)
            .filter(|o| **o == PatternOutcome::Failure)
            .count();
        recent_failures >= QUARANTINE_FAILURES
    }
}

/// Result of one use of a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternOutcome {
    Success,
    Failure,
}

/// Where a learned pattern came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    #[serde(default)]
    pub source: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journey_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<Timestamp>,
}

/// A named, reusable operation ("module") keyed by a term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlossaryEntry {
    pub term: String,

    #[serde(default)]
    pub synonyms: Vec<String>,

    pub module: String,

    /// Curated entries default to full confidence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// A better locator for an element the Journey names by its visible text.
///
/// Applied on top of built-in matches when its strategy ranks higher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocatorOverride {
    pub id: String,

    /// The element as authored, e.g. `Sign in`. Compared case-insensitively.
    pub target: String,

    pub locator: LocatorSpec,
    pub confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    use PatternOutcome::{Failure, Success};

    fn pattern(outcomes: Vec<PatternOutcome>) -> LearnedPattern {
        LearnedPattern {
            id: "p1".into(),
            trigger: "open settings".into(),
            template: Primitive::Navigate {
                url: "/settings".into(),
            },
            timing_hint_ms: None,
            confidence: 0.99,
            outcomes,
            quarantined: false,
            provenance: Provenance::default(),
        }
    }

    #[test]
    fn three_failures_in_last_five_quarantines() {
        let p = pattern(vec![Success, Failure, Success, Failure, Failure]);
        assert!(p.is_quarantined());
    }

    #[test]
    fn old_failures_fall_out_of_the_window() {
        let p = pattern(vec![
            Failure, Failure, Failure, Success, Success, Success, Success, Success,
        ]);
        assert!(!p.is_quarantined());
    }

    #[test]
    fn two_failures_is_not_enough() {
        let p = pattern(vec![Failure, Success, Failure]);
        assert!(!p.is_quarantined());
    }

    #[test]
    fn flag_quarantines_regardless_of_history() {
        let mut p = pattern(vec![Success; 5]);
        p.quarantined = true;
        assert!(p.is_quarantined());
    }
}
