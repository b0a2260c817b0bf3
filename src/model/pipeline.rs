//! Pipeline state: where a working directory stands.

use std::fmt;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

/// A node in the pipeline's progress graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Initial,
    Analyzed,
    Planned,
    Generated,
    Tested,
    Refining,
    Completed,
    Blocked,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Analyzed => "analyzed",
            Self::Planned => "planned",
            Self::Generated => "generated",
            Self::Tested => "tested",
            Self::Refining => "refining",
            Self::Completed => "completed",
            Self::Blocked => "blocked",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One command's effect on the stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRecord {
    pub at: Timestamp,
    pub command: String,
    pub from: Stage,
    pub to: Stage,
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Why the pipeline is blocked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedInfo {
    pub reason: String,
    pub at: Timestamp,
}

/// The persisted pipeline state of one working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineState {
    pub stage: Stage,

    /// Transition log, oldest first, bounded in length.
    #[serde(default)]
    pub history: Vec<TransitionRecord>,

    /// Present exactly when `stage` is `Blocked`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked: Option<BlockedInfo>,

    /// Bumped by one on every successful write.
    pub revision: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            stage: Stage::Initial,
            history: Vec::new(),
            blocked: None,
            revision: 0,
            updated_at: None,
        }
    }
}

impl PipelineState {
    /// Appends a history record, evicting the oldest entries past `limit`.
    pub fn record(&mut self, record: TransitionRecord, limit: usize) {
        self.history.push(record);
        if self.history.len() > limit {
            let excess = self.history.len() - limit;
            self.history.drain(..excess);
        }
    }
}
