//! Bounded healing loop.
//!
//! One session per failing test. Each iteration picks one untried safe fix,
//! checks it keeps the test's meaning, regenerates and validates the file,
//! then reruns. The loop stops on success or when the circuit opens:
//! repeated or alternating failures, spent budgets, cancellation, or a
//! failure no safe fix addresses. A session that doesn't heal puts the
//! original code back.

mod circuit;
mod fixes;
mod guard;

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use jiff::Timestamp;

use crate::classify;
use crate::codegen::{self, MergeError};
use crate::config::HealingConfig;
use crate::model::{
    Attempt, CircuitState, ExecutionResult, FixFamily, IrProgram, RefinementSession, StopReason,
    Trend,
};
use crate::runner::{self, RunRequest, RunnerError, TestRunner};
use crate::storage::{Storage, StorageError, write_atomic};
use crate::validate;

#[derive(Debug, thiserror::Error)]
pub enum HealError {
    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("cannot regenerate test: {0}")]
    Merge(#[from] MergeError),

    #[error("cannot update {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// Bounds on one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealLimits {
    pub max_attempts: u32,
    pub time_budget: Duration,
    pub cost_budget_ms: u64,
    pub max_timeout_ms: u64,
}

impl From<&HealingConfig> for HealLimits {
    fn from(config: &HealingConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            time_budget: Duration::from_secs(config.time_budget_secs),
            cost_budget_ms: config.cost_budget_ms,
            max_timeout_ms: config.max_timeout_ms,
        }
    }
}

/// What a session ended with.
#[derive(Debug)]
pub struct HealReport {
    pub session: RefinementSession,

    /// The healed program, or the original one if healing failed.
    pub program: IrProgram,

    /// The last run.
    pub result: ExecutionResult,
}

impl HealReport {
    pub fn healed(&self) -> bool {
        self.session.healed
    }
}

pub struct Healer<'a> {
    runner: &'a mut dyn TestRunner,
    storage: &'a Storage,
    limits: HealLimits,
}

impl<'a> Healer<'a> {
    pub fn new(runner: &'a mut dyn TestRunner, storage: &'a Storage, limits: HealLimits) -> Self {
        Self {
            runner,
            storage,
            limits,
        }
    }

    /// Heal the test at `spec_path`, generated from `program`, whose last
    /// run was `initial`.
    pub fn heal(
        &mut self,
        program: &IrProgram,
        spec_path: &Path,
        initial: &ExecutionResult,
    ) -> Result<HealReport, HealError> {
        let journey_id = program.journey_id.as_str();
        let Some(first) = initial.primary_failure() else {
            let mut session = RefinementSession::new(journey_id, String::new(), String::new());
            session.healed = true;
            session.closed_at = Some(Timestamp::now());
            self.storage.save_session(&session)?;
            return Ok(HealReport {
                session,
                program: program.clone(),
                result: initial.clone(),
            });
        };

        let mut session = RefinementSession::new(
            journey_id,
            first.message.clone(),
            classify::fingerprint(first.category, &first.message),
        );
        self.storage.save_session(&session)?;
        tracing::info!(journey = journey_id, session = %session.id, "healing started");

        let started = Instant::now();
        let mut current = program.clone();
        let mut last = initial.clone();
        let mut focus: Option<String> = None;
        let mut tried: HashSet<(FixFamily, String, String)> = HashSet::new();

        loop {
            if let Some((reason, detail)) = self.preflight(&session, started, &last) {
                open(&mut session, reason, detail);
                break;
            }
            let Some(failure) = last.primary_failure() else {
                break;
            };

            let mut chosen = None;
            for candidate in fixes::candidates(&current, failure, focus.as_deref(), self.limits.max_timeout_ms) {
                let key = (
                    candidate.fix.family,
                    candidate.fix.target.clone(),
                    candidate.fix.detail.clone(),
                );
                if !tried.insert(key) {
                    continue;
                }
                if let Err(violation) = guard::check(program, &candidate.program) {
                    tracing::warn!(journey = journey_id, fix = %candidate.fix.family, %violation, "fix rejected");
                    continue;
                }
                let text = codegen::generate(&candidate.program, read_spec(spec_path)?.as_deref())?;
                if let Err(invalid) = validate::check(&text, &candidate.program) {
                    tracing::warn!(journey = journey_id, fix = %candidate.fix.family, %invalid, "fix rejected");
                    continue;
                }
                write_spec(spec_path, &text)?;
                chosen = Some(candidate);
                break;
            }
            let Some(candidate) = chosen else {
                open(
                    &mut session,
                    StopReason::Unrepairable,
                    format!(
                        "no untried safe fix for {} failure: {}",
                        failure.category, failure.message
                    ),
                );
                break;
            };

            let request = RunRequest {
                journey_id,
                spec_path,
            };
            let result = runner::execute(&mut *self.runner, &request)?;
            self.storage.save_result(&result)?;

            let primary = result.primary_failure();
            let attempt = Attempt {
                number: u32::try_from(session.attempts.len() + 1).unwrap_or(u32::MAX),
                fix: candidate.fix.clone(),
                passed: result.passed(),
                fingerprint: primary
                    .map(|f| classify::fingerprint(f.category, &f.message))
                    .unwrap_or_default(),
                category: primary.map(|f| f.category),
                message: primary.map(|f| f.message.clone()),
                failures: result.failures.len(),
                cost_ms: result.duration_ms,
                at: Timestamp::now(),
            };
            tracing::info!(
                journey = journey_id,
                attempt = attempt.number,
                fix = %attempt.fix.family,
                target = %attempt.fix.target,
                passed = attempt.passed,
                "healing attempt finished"
            );
            session.attempts.push(attempt);
            session.trend = circuit::trend(initial.failures.len(), &session.attempts);

            if candidate.fix.target != "program" {
                focus = Some(candidate.fix.target.clone());
            }
            current = candidate.program;
            last = result;

            if last.passed() {
                session.healed = true;
                break;
            }
            if let Some((reason, detail)) =
                circuit::evaluate(&session.initial_fingerprint, &session.attempts)
            {
                if reason == StopReason::Oscillating {
                    session.trend = Trend::Oscillating;
                }
                open(&mut session, reason, detail);
                break;
            }
            self.storage.save_session(&session)?;
        }

        session.closed_at = Some(Timestamp::now());
        self.storage.save_session(&session)?;

        if session.healed {
            tracing::info!(journey = journey_id, attempts = session.attempts.len(), "healed");
            return Ok(HealReport {
                session,
                program: current,
                result: last,
            });
        }

        if !session.attempts.is_empty() {
            let text = codegen::generate(program, read_spec(spec_path)?.as_deref())?;
            write_spec(spec_path, &text)?;
        }
        if let Some(reason) = session.stop_reason() {
            tracing::warn!(journey = journey_id, %reason, attempts = session.attempts.len(), "healing stopped");
        }
        Ok(HealReport {
            session,
            program: program.clone(),
            result: last,
        })
    }

    /// Stop conditions checked before each attempt.
    fn preflight(
        &self,
        session: &RefinementSession,
        started: Instant,
        last: &ExecutionResult,
    ) -> Option<(StopReason, String)> {
        if self.storage.cancel_requested() {
            return Some((StopReason::Cancelled, "cancelled by operator".to_string()));
        }
        let attempts = session.attempts.len();
        if attempts >= self.limits.max_attempts as usize {
            return Some((
                StopReason::AttemptsExhausted,
                format!("{attempts} of {} attempts used", self.limits.max_attempts),
            ));
        }
        if started.elapsed() >= self.limits.time_budget {
            return Some((
                StopReason::Exhausted,
                format!("time budget of {}s spent", self.limits.time_budget.as_secs()),
            ));
        }
        let cost = session.cost_ms();
        if cost >= self.limits.cost_budget_ms {
            return Some((
                StopReason::Exhausted,
                format!("cost budget of {}ms spent ({cost}ms used)", self.limits.cost_budget_ms),
            ));
        }
        let failure = last.primary_failure()?;
        if !fixes::is_repairable(failure.category) {
            return Some((
                StopReason::Unrepairable,
                format!("{} failure: {}", failure.category, failure.message),
            ));
        }
        None
    }
}

fn open(session: &mut RefinementSession, reason: StopReason, detail: String) {
    session.circuit = CircuitState::Open { reason, detail };
}

fn read_spec(path: &Path) -> Result<Option<String>, HealError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(HealError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn write_spec(path: &Path, text: &str) -> Result<(), HealError> {
    write_atomic(path, text.as_bytes()).map_err(|source| HealError::Io {
        path: path.to_path_buf(),
        source,
    })
}
