//! Learning-event reporting.
//!
//! Outcomes flow back to the knowledge base as JSON lines. The knowledge
//! base owns the merge and decay bookkeeping; waymark only appends.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use crate::codegen::locator_expr;
use crate::model::{
    ExecutionResult, IrProgram, LearningEvent, MatchSource, PatternOutcome, RefinementSession,
};

#[derive(Debug, thiserror::Error)]
pub enum LearningError {
    #[error("failed to write learning event to {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Somewhere learning events go.
pub trait LearningSink {
    fn report(&mut self, event: &LearningEvent) -> Result<(), LearningError>;
}

/// Appends events to a JSONL file.
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Every event recorded so far. A missing file is empty.
    pub fn load(&self) -> Result<Vec<LearningEvent>, LearningError> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(self.io(source)),
        };
        let mut events = Vec::new();
        for line in io::BufReader::new(file).lines() {
            let line = line.map_err(|e| self.io(e))?;
            if !line.is_empty() {
                events.push(serde_json::from_str(&line)?);
            }
        }
        Ok(events)
    }

    fn io(&self, source: io::Error) -> LearningError {
        LearningError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl LearningSink for JsonlSink {
    fn report(&mut self, event: &LearningEvent) -> Result<(), LearningError> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io(e))?;
        file.write_all(line.as_bytes()).map_err(|e| self.io(e))
    }
}

/// Collects events in memory.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemorySink {
    pub events: Vec<LearningEvent>,
}

#[cfg(test)]
impl LearningSink for MemorySink {
    fn report(&mut self, event: &LearningEvent) -> Result<(), LearningError> {
        self.events.push(event.clone());
        Ok(())
    }
}

/// Outcomes for the knowledge-sourced primitives of one run.
///
/// A passing run credits every pattern it used. A failing run debits only
/// the patterns in the step the failure was attributed to.
pub fn run_events(program: &IrProgram, result: &ExecutionResult) -> Vec<LearningEvent> {
    let failed_step = result.primary_failure().and_then(|f| f.step_id.as_deref());
    let mut events = Vec::new();
    for step in program.all_steps() {
        let outcome = if result.passed() {
            PatternOutcome::Success
        } else if failed_step == Some(step.id.as_str()) {
            PatternOutcome::Failure
        } else {
            continue;
        };
        for matched in step.actions.iter().chain(&step.assertions) {
            let pattern_id = match &matched.source {
                MatchSource::Knowledge { pattern_id, .. } => pattern_id,
                MatchSource::Builtin {
                    locator_override: Some(pattern_id),
                    ..
                } => pattern_id,
                _ => continue,
            };
            let selector = matched.primitive.locator().map(locator_expr);
            events.push(LearningEvent::new(
                pattern_id.clone(),
                outcome,
                &result.journey_id,
                selector,
            ));
        }
    }
    events
}

/// Outcomes for the fixes a healing session applied: the fix of a passing
/// attempt succeeded, every other attempted fix failed.
pub fn session_events(session: &RefinementSession, program: &IrProgram) -> Vec<LearningEvent> {
    session
        .attempts
        .iter()
        .map(|attempt| {
            let outcome = if attempt.passed {
                PatternOutcome::Success
            } else {
                PatternOutcome::Failure
            };
            let selector = program
                .step(&attempt.fix.target)
                .and_then(|step| step.primitives().find_map(|p| p.locator()))
                .map(locator_expr);
            LearningEvent::new(
                format!("fix:{}", attempt.fix.family),
                outcome,
                &session.journey_id,
                selector,
            )
        })
        .collect()
}

/// Reports every event, stopping at the first sink error.
pub fn report_all(
    sink: &mut dyn LearningSink,
    events: &[LearningEvent],
) -> Result<(), LearningError> {
    for event in events {
        sink.report(event)?;
    }
    Ok(())
}
