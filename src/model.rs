//! Core data model for Waymark.
//!
//! Journeys as parsed, the IR they compile into, the knowledge-base
//! snapshot consumed while matching, and the records the pipeline
//! persists: state, execution results, refinement sessions, and
//! learning events.

mod execution;
mod journey;
mod knowledge;
mod learning;
mod pipeline;
mod plan;
mod primitive;
mod program;
mod session;

pub use execution::{ExecutionResult, ExecutionStatus, Failure, FailureCategory};
pub use journey::{CompletionKind, CompletionSignal, JourneyDocument, SourceInfo, Step};
pub use knowledge::{
    GlossaryEntry, KnowledgeExport, LearnedPattern, LocatorOverride, PatternOutcome,
};
#[cfg(test)]
pub use knowledge::Provenance;
pub use learning::LearningEvent;
pub use pipeline::{BlockedInfo, PipelineState, Stage, TransitionRecord};
pub use plan::{Analysis, AnalyzedJourney, Plan};
pub use primitive::{
    LocatorOptions, LocatorSpec, LocatorStrategy, MatchSource, MatchedPrimitive, Primitive,
    Suggestion, ValueSpec,
};
pub use program::{IrProgram, IrStats, IrStep};
pub use session::{
    AppliedFix, Attempt, CircuitState, FixFamily, RefinementSession, StopReason, Trend,
};
