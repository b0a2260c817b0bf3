//! Stage snapshots: what `analyze` found and what `plan` compiled.

use std::path::PathBuf;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use super::program::IrProgram;

/// Output of `analyze`: the Journeys on disk and their shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub journeys: Vec<AnalyzedJourney>,
    pub analyzed_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzedJourney {
    pub id: String,
    pub title: String,
    pub tier: String,
    pub path: PathBuf,

    /// Hex SHA-256 of the Journey text at analysis time.
    pub sha256: String,

    pub steps: usize,
    pub instructions: usize,
}

/// Output of `plan`: one IR program per Journey plus the versions of the
/// tables that produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub builtin_table_version: String,
    pub knowledge_version: String,
    pub confidence_policy: String,
    pub confidence_threshold: f64,
    pub programs: Vec<IrProgram>,
    pub planned_at: Timestamp,
}

impl Plan {
    pub fn program(&self, journey_id: &str) -> Option<&IrProgram> {
        self.programs.iter().find(|p| p.journey_id == journey_id)
    }
}
