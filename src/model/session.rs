//! Refinement sessions: the record of healing one generated artifact.

use std::fmt;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::execution::FailureCategory;

/// The safe transformations healing may apply. Nothing else exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FixFamily {
    /// Move a locator to a more robust strategy.
    UpgradeSelector,

    /// Wait for the element to become visible before acting.
    AddExplicitWait,

    /// Make an ambiguous locator match exactly one element.
    NarrowSelector,

    /// Namespace typed values per run.
    IsolateData,

    /// Give a slow step more time.
    IncreaseTimeout,
}

impl FixFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UpgradeSelector => "upgrade-selector",
            Self::AddExplicitWait => "add-explicit-wait",
            Self::NarrowSelector => "narrow-selector",
            Self::IsolateData => "isolate-data",
            Self::IncreaseTimeout => "increase-timeout",
        }
    }
}

impl fmt::Display for FixFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fix as applied to the program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedFix {
    pub family: FixFamily,

    /// Step id the fix touched, or `program` for whole-test changes.
    pub target: String,

    /// Human-readable before → after.
    pub detail: String,
}

/// One healing attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    /// 1-based.
    pub number: u32,
    pub fix: AppliedFix,
    pub passed: bool,

    /// Fingerprint of the resulting primary failure. Empty when passed.
    #[serde(default)]
    pub fingerprint: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<FailureCategory>,

    /// The resulting primary failure message, verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Number of failures reported by the run.
    pub failures: usize,

    /// Runner time consumed, in milliseconds.
    pub cost_ms: u64,

    pub at: Timestamp,
}

/// Why a healing loop stopped without success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    /// The same fingerprint on two consecutive attempts.
    NonConvergent,

    /// Fingerprints alternating A, B, A, B.
    Oscillating,

    /// Wall-clock or cost budget spent.
    Exhausted,

    /// `max-attempts` reached.
    AttemptsExhausted,

    /// No safe fix applies to the failure.
    Unrepairable,

    /// Cancelled between attempts.
    Cancelled,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NonConvergent => "non-convergent",
            Self::Oscillating => "oscillating",
            Self::Exhausted => "exhausted",
            Self::AttemptsExhausted => "attempts-exhausted",
            Self::Unrepairable => "unrepairable",
            Self::Cancelled => "cancelled",
        }
    }

    /// Every stop except cancellation needs an operator.
    pub fn blocks_pipeline(self) -> bool {
        self != Self::Cancelled
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Circuit-breaker state of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open { reason: StopReason, detail: String },
}

/// Direction of the error signal across attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Trend {
    #[default]
    Unknown,
    Improving,
    Stable,
    Worsening,
    Oscillating,
}

/// The healing record of one generated artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefinementSession {
    pub id: Uuid,
    pub journey_id: String,

    /// The failure that started the session.
    pub initial_message: String,
    pub initial_fingerprint: String,

    pub attempts: Vec<Attempt>,
    pub circuit: CircuitState,
    pub trend: Trend,
    pub healed: bool,

    pub started_at: Timestamp,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<Timestamp>,
}

impl RefinementSession {
    pub fn new(journey_id: impl Into<String>, message: String, fingerprint: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            journey_id: journey_id.into(),
            initial_message: message,
            initial_fingerprint: fingerprint,
            attempts: Vec::new(),
            circuit: CircuitState::Closed,
            trend: Trend::Unknown,
            healed: false,
            started_at: Timestamp::now(),
            closed_at: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }

    /// Total runner time spent across attempts.
    pub fn cost_ms(&self) -> u64 {
        self.attempts.iter().map(|a| a.cost_ms).sum()
    }

    /// The stop reason, when the circuit is open.
    pub fn stop_reason(&self) -> Option<StopReason> {
        match &self.circuit {
            CircuitState::Closed => None,
            CircuitState::Open { reason, .. } => Some(*reason),
        }
    }
}
