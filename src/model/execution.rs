//! Execution results: what happened when a generated test ran.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Terminal status of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Passed,
    Failed,

    /// Hit the hard timeout. Never folded into `Failed`.
    Timeout,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        }
    }
}

/// Repair-relevant bucket for a failure message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureCategory {
    Selector,
    Timing,
    Navigation,
    Data,
    Environment,
    AppBug,

    /// Nothing matched. Routed straight to `blocked`, never repaired.
    Unclassified,
}

impl FailureCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Selector => "selector",
            Self::Timing => "timing",
            Self::Navigation => "navigation",
            Self::Data => "data",
            Self::Environment => "environment",
            Self::AppBug => "app-bug",
            Self::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failure reported by the runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Failure {
    pub message: String,
    pub category: FailureCategory,

    /// The locator named in the message, when one could be extracted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locator: Option<String>,

    /// Line in the generated file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,

    /// The Journey step the failure was attributed to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
}

/// Structured outcome of running one generated test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub journey_id: String,
    pub status: ExecutionStatus,
    pub failures: Vec<Failure>,
    pub duration_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    /// Compressed stdout/stderr capture, relative to the state directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<PathBuf>,
}

impl ExecutionResult {
    pub fn passed(&self) -> bool {
        self.status == ExecutionStatus::Passed
    }

    /// The failure that drives healing: the first one reported.
    pub fn primary_failure(&self) -> Option<&Failure> {
        self.failures.first()
    }
}
