//! Learning events: what worked and what didn't, reported to the knowledge base.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::knowledge::PatternOutcome;

/// One report to the external knowledge base, serialized as a JSONL line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningEvent {
    pub id: Uuid,

    /// A knowledge-base pattern id, or `fix:<family>` for a healing fix.
    pub pattern_id: String,
    pub outcome: PatternOutcome,
    pub journey_id: String,

    /// The selector that worked (or failed), when one applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,

    pub recorded_at: Timestamp,
}

impl LearningEvent {
    pub fn new(
        pattern_id: impl Into<String>,
        outcome: PatternOutcome,
        journey_id: impl Into<String>,
        selector: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            pattern_id: pattern_id.into(),
            outcome,
            journey_id: journey_id.into(),
            selector,
            recorded_at: Timestamp::now(),
        }
    }
}
