//! Pipeline commands: move a working directory through its stages.
//!
//! Every command loads the state, checks the transition before touching
//! anything, does its work, then saves against the revision it loaded. A
//! rejected transition leaves the state file as it was. A command that
//! fails after validation records a failed history entry and stays put.

mod graph;

pub use graph::{Command, TransitionError};

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use jiff::Timestamp;
use serde::Serialize;

use crate::classify;
use crate::codegen::{self, MergeError};
use crate::config::{Config, ConfigError, STATE_DIR};
use crate::diagnostics::WarnOnce;
use crate::heal::{HealError, HealLimits, Healer};
use crate::ir;
use crate::journey::{self, ParseError};
use crate::learning::{self, JsonlSink, LearningError};
use crate::matcher::{BUILTIN_TABLE_VERSION, KnowledgeBase, KnowledgeError, Matcher};
use crate::model::{
    Analysis, AnalyzedJourney, BlockedInfo, CircuitState, ExecutionResult, FailureCategory,
    PipelineState, Plan, RefinementSession, Stage, StopReason, TransitionRecord,
};
use crate::runner::{self, RunRequest, RunnerError, TestRunner};
use crate::storage::{ANALYSIS_FILE, PLAN_FILE, StateLock, Storage, StorageError, write_atomic};
use crate::validate::{self, ValidationFailure};

/// Everything a command can fail with.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{path}: {source}")]
    Parse { path: PathBuf, source: ParseError },

    #[error(transparent)]
    Knowledge(#[from] KnowledgeError),

    #[error(transparent)]
    Validation(#[from] ValidationFailure),

    #[error("cannot merge generated code: {0}")]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error(transparent)]
    Heal(#[from] HealError),

    #[error(transparent)]
    Learning(#[from] LearningError),

    #[error("cannot write {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("journey id {id} is used by both {first} and {second}")]
    DuplicateJourney {
        id: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("no journeys found under {0}")]
    NoJourneys(PathBuf),

    #[error("{artifact} is missing; run `waymark {command}` first")]
    Missing { artifact: String, command: Command },

    #[error("healing stopped: {0}")]
    CircuitOpen(String),
}

impl PipelineError {
    /// Short machine-readable name, used as `error` in JSON output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transition(TransitionError::Invalid { .. }) => "transition",
            Self::Transition(TransitionError::Blocked { .. }) => "blocked",
            Self::Storage(e) | Self::Heal(HealError::Storage(e)) => storage_kind(e),
            Self::Config(_) => "config",
            Self::Parse { .. } => "parse",
            Self::Knowledge(_) => "knowledge-base",
            Self::Validation(_) => "validation",
            Self::Merge(_) => "codegen",
            Self::Runner(_) | Self::Heal(HealError::Runner(_)) => "runner",
            Self::Heal(_) => "heal",
            Self::Learning(_) => "learning",
            Self::Io { .. } => "io",
            Self::Json(_) => "json",
            Self::DuplicateJourney { .. } => "duplicate-journey",
            Self::NoJourneys(_) => "no-journeys",
            Self::Missing { .. } => "missing-artifact",
            Self::CircuitOpen(_) => "circuit-open",
        }
    }

    /// Whether running the same command again may succeed.
    pub fn retryable(&self) -> bool {
        match self {
            Self::Storage(e) | Self::Heal(HealError::Storage(e)) => e.is_retryable(),
            _ => false,
        }
    }

    /// Process exit code: 2 for transitions, 3 for conflicts and lock
    /// timeouts, 4 when the circuit breaker blocked the pipeline.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Transition(TransitionError::Invalid { .. }) => 2,
            Self::Transition(TransitionError::Blocked { .. }) | Self::CircuitOpen(_) => 4,
            _ if self.retryable() => 3,
            _ => 1,
        }
    }
}

fn storage_kind(error: &StorageError) -> &'static str {
    match error {
        StorageError::ConcurrencyConflict { .. } => "conflict",
        StorageError::LockTimeout { .. } => "lock-timeout",
        _ => "storage",
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

// ── Summaries ──

/// One file written by `generate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    pub journey_id: String,
    pub path: PathBuf,

    /// False when the file already had this content.
    pub changed: bool,

    pub blocked: usize,
    pub warnings: usize,
}

/// Outcome of `run`.
#[derive(Debug)]
pub struct RunSummary {
    pub results: Vec<ExecutionResult>,
    pub stage: Stage,
}

impl RunSummary {
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.passed()).count()
    }

    pub fn categories(&self) -> BTreeMap<FailureCategory, usize> {
        classify::category_counts(&self.results)
    }
}

/// Outcome of `refine`.
#[derive(Debug)]
pub struct RefineSummary {
    pub sessions: Vec<RefinementSession>,

    /// The latest result per Journey after healing.
    pub results: Vec<ExecutionResult>,

    pub stage: Stage,

    /// Why the pipeline blocked, when it did.
    pub blocked: Option<String>,
}

impl RefineSummary {
    pub fn categories(&self) -> BTreeMap<FailureCategory, usize> {
        classify::category_counts(&self.results)
    }
}

/// What `status` reports.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub state: PipelineState,
    pub journeys: usize,
    pub results: Vec<ExecutionResult>,
    pub sessions: Vec<RefinementSession>,
}

/// Opens the state directory for a working directory.
pub fn open_storage(dir: &Path, config: &Config) -> Result<Storage> {
    Ok(Storage::open(dir.join(STATE_DIR), &config.state)?)
}

// ── Pipeline ──

pub struct Pipeline<'a> {
    config: &'a Config,
    storage: &'a Storage,
    warnings: WarnOnce,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Config, storage: &'a Storage) -> Self {
        Self {
            config,
            storage,
            warnings: WarnOnce::default(),
        }
    }

    /// Read-only view of the working directory.
    pub fn status(&self) -> Result<Status> {
        let state = self.storage.load_state()?;
        let journeys = match self.storage.load_plan()? {
            Some(plan) => plan.programs.len(),
            None => self
                .storage
                .load_analysis()?
                .map_or(0, |a| a.journeys.len()),
        };
        Ok(Status {
            state,
            journeys,
            results: self.storage.load_results()?,
            sessions: self.storage.load_sessions()?,
        })
    }

    /// Discover and parse every Journey.
    pub fn analyze(&mut self) -> Result<Analysis> {
        let (lock, state, to) = self.begin(Command::Analyze)?;
        let analysis = self.attempt(&lock, &state, Command::Analyze, Self::analyze_journeys)?;
        let detail = format!("{} journey(s)", analysis.journeys.len());
        self.commit(&lock, state, Command::Analyze, to, Some(detail))?;
        Ok(analysis)
    }

    /// Compile every analyzed Journey into an IR program.
    pub fn plan(&mut self) -> Result<Plan> {
        let (lock, state, to) = self.begin(Command::Plan)?;
        let plan = self.attempt(&lock, &state, Command::Plan, Self::plan_programs)?;
        let blocked: usize = plan.programs.iter().map(|p| p.stats.blocked).sum();
        let detail = format!("{} program(s), {blocked} blocked step(s)", plan.programs.len());
        self.commit(&lock, state, Command::Plan, to, Some(detail))?;
        Ok(plan)
    }

    /// Render, validate, and write every planned test.
    pub fn generate(&mut self) -> Result<Vec<GeneratedFile>> {
        let (lock, state, to) = self.begin(Command::Generate)?;
        let files = self.attempt(&lock, &state, Command::Generate, Self::generate_files)?;
        let changed = files.iter().filter(|f| f.changed).count();
        let detail = format!("{} file(s), {changed} changed", files.len());
        self.commit(&lock, state, Command::Generate, to, Some(detail))?;
        Ok(files)
    }

    /// Run every generated test.
    pub fn run(&mut self, runner: &mut dyn TestRunner) -> Result<RunSummary> {
        let (lock, state, to) = self.begin(Command::Run)?;
        let mut leased = self.leased(runner, &lock);
        let results = self.attempt(&lock, &state, Command::Run, |p| p.run_tests(&mut leased))?;

        let passed = results.iter().filter(|r| r.passed()).count();
        let detail = format!("{passed}/{} passed", results.len());
        let mut state = self.commit(&lock, state, Command::Run, to, Some(detail))?;
        if passed == results.len() {
            state = self.commit(
                &lock,
                state,
                Command::Run,
                Stage::Completed,
                Some("every test passed".to_string()),
            )?;
        }
        Ok(RunSummary {
            results,
            stage: state.stage,
        })
    }

    /// Heal every failing test, one bounded session each.
    pub fn refine(&mut self, runner: &mut dyn TestRunner) -> Result<RefineSummary> {
        let (lock, state, to) = self.begin(Command::Refine)?;
        self.storage.clear_cancel()?;
        let state = self.commit(&lock, state, Command::Refine, to, None)?;

        let mut leased = self.leased(runner, &lock);
        let (sessions, results) = match self.heal_failures(&mut leased) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.record_failure(&lock, &state, Command::Refine, &e);
                return Err(e);
            }
        };

        let (stage, detail) = refine_outcome(&sessions, &results);
        let state = self.commit(&lock, state, Command::Refine, stage, Some(detail))?;
        self.storage.clear_cancel()?;
        Ok(RefineSummary {
            sessions,
            results,
            stage: state.stage,
            blocked: state.blocked.map(|b| b.reason),
        })
    }

    /// Ask a running `refine` to stop before its next attempt.
    ///
    /// Only drops the marker, so it never waits on the lock a running
    /// refine holds. Returns whether a refine appeared to be running.
    pub fn cancel(&self) -> Result<bool> {
        self.storage.request_cancel()?;
        let running = self.storage.load_state()?.stage == Stage::Refining;
        tracing::info!(running, "cancellation requested");
        Ok(running)
    }

    /// Remove generated state and reset to `initial`. Runs from any stage.
    pub fn clean(&mut self) -> Result<()> {
        let (lock, state, to) = self.begin(Command::Clean)?;
        self.attempt(&lock, &state, Command::Clean, |p| Ok(p.storage.clean()?))?;
        self.commit(&lock, state, Command::Clean, to, None)?;
        Ok(())
    }

    // ── Transitions ──

    /// Take the state lock and check the transition against the state read
    /// under it. The lock is held until the command has committed.
    fn begin(&self, command: Command) -> Result<(StateLock, PipelineState, Stage)> {
        let lock = self.storage.lock_state()?;
        let state = self.storage.load_state()?;
        let to = graph::check(command, &state).inspect_err(|e| {
            tracing::warn!(%command, stage = %state.stage, error = %e, "transition rejected");
        })?;
        tracing::info!(%command, from = %state.stage, to = %to, "command started");
        Ok((lock, state, to))
    }

    /// Record a successful transition and save it against the loaded revision.
    fn commit(
        &self,
        lock: &StateLock,
        state: PipelineState,
        command: Command,
        to: Stage,
        detail: Option<String>,
    ) -> Result<PipelineState> {
        if command != Command::Clean {
            graph::step(command, state.stage, to)?;
        }
        let expected = state.revision;
        let mut next = state;
        next.record(
            TransitionRecord {
                at: Timestamp::now(),
                command: command.as_str().to_string(),
                from: next.stage,
                to,
                success: true,
                detail: detail.clone(),
            },
            self.storage.history_limit(),
        );
        next.stage = to;
        next.blocked = (to == Stage::Blocked).then(|| BlockedInfo {
            reason: detail.unwrap_or_else(|| "blocked".to_string()),
            at: Timestamp::now(),
        });
        let saved = self.storage.save_state_locked(lock, &next, expected)?;
        tracing::info!(%command, stage = %saved.stage, revision = saved.revision, "stage saved");
        Ok(saved)
    }

    /// Run a command body; on failure, note it in the history.
    fn attempt<T>(
        &mut self,
        lock: &StateLock,
        state: &PipelineState,
        command: Command,
        body: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        match body(self) {
            Ok(value) => Ok(value),
            Err(e) => {
                self.record_failure(lock, state, command, &e);
                Err(e)
            }
        }
    }

    fn record_failure(
        &self,
        lock: &StateLock,
        state: &PipelineState,
        command: Command,
        error: &PipelineError,
    ) {
        tracing::warn!(%command, kind = error.kind(), %error, "command failed");
        let mut next = state.clone();
        next.record(
            TransitionRecord {
                at: Timestamp::now(),
                command: command.as_str().to_string(),
                from: state.stage,
                to: state.stage,
                success: false,
                detail: Some(error.to_string()),
            },
            self.storage.history_limit(),
        );
        if let Err(e) = self.storage.save_state_locked(lock, &next, state.revision) {
            tracing::warn!(%command, error = %e, "could not record failure in history");
        }
    }

    /// Wraps `runner` so the held lock is renewed before every test run.
    fn leased<'r>(&self, runner: &'r mut dyn TestRunner, lock: &'r StateLock) -> Leased<'r> {
        let timeout = Duration::from_secs(self.config.runner.timeout_secs);
        let stale = Duration::from_secs(self.config.state.lock_stale_secs);
        Leased {
            runner,
            lock,
            lease: timeout.saturating_add(stale),
        }
    }

    // ── Command bodies ──

    fn analyze_journeys(&mut self) -> Result<Analysis> {
        let root = &self.config.journeys_dir;
        let paths = journey::discover(root);
        if paths.is_empty() {
            return Err(PipelineError::NoJourneys(root.clone()));
        }

        let mut seen: HashMap<String, PathBuf> = HashMap::new();
        let mut journeys = Vec::with_capacity(paths.len());
        for path in paths {
            let doc = journey::parse_file(&path).map_err(|source| PipelineError::Parse {
                path: path.clone(),
                source,
            })?;
            if let Some(first) = seen.insert(doc.id.clone(), path.clone()) {
                return Err(PipelineError::DuplicateJourney {
                    id: doc.id,
                    first,
                    second: path,
                });
            }

            let all_steps = || doc.setup.iter().chain(&doc.steps).chain(&doc.cleanup);
            let steps = all_steps().count();
            let instructions: usize = all_steps().map(|s| s.instructions.len()).sum();
            tracing::debug!(journey = %doc.id, steps, instructions, "analyzed journey");

            journeys.push(AnalyzedJourney {
                id: doc.id.clone(),
                title: doc.title.clone(),
                tier: doc.tier.clone(),
                path,
                sha256: doc.source.sha256.clone(),
                steps,
                instructions,
            });
        }

        let analysis = Analysis {
            journeys,
            analyzed_at: Timestamp::now(),
        };
        self.storage.save_analysis(&analysis)?;
        Ok(analysis)
    }

    fn plan_programs(&mut self) -> Result<Plan> {
        let analysis = self
            .storage
            .load_analysis()?
            .ok_or_else(|| missing(ANALYSIS_FILE, Command::Analyze))?;

        let kb = KnowledgeBase::load(&self.config.knowledge_base)?;
        for note in kb.diagnostics() {
            self.warnings.warn(note, format_args!("knowledge base: {note}"));
        }
        let policy = self.config.confidence_policy.policy();
        let matcher = Matcher::new(&kb, policy.as_ref(), self.config.confidence_threshold);

        let mut programs = Vec::with_capacity(analysis.journeys.len());
        for entry in &analysis.journeys {
            let doc = journey::parse_file(&entry.path).map_err(|source| PipelineError::Parse {
                path: entry.path.clone(),
                source,
            })?;
            if doc.source.sha256 != entry.sha256 {
                self.warnings.warn(
                    &format!("changed:{}", entry.id),
                    format_args!("journey {} changed since analyze; planning the current text", entry.id),
                );
            }

            let program = ir::build(&doc, &matcher);
            for note in &program.diagnostics {
                self.warnings.warn(note, format_args!("{}: {note}", program.journey_id));
            }
            if program.stats.blocked > 0 {
                tracing::warn!(
                    journey = %program.journey_id,
                    blocked = program.stats.blocked,
                    "instructions could not be mapped"
                );
            }
            programs.push(program);
        }

        let plan = Plan {
            builtin_table_version: BUILTIN_TABLE_VERSION.to_string(),
            knowledge_version: kb.version().to_string(),
            confidence_policy: policy.name().to_string(),
            confidence_threshold: self.config.confidence_threshold,
            programs,
            planned_at: Timestamp::now(),
        };
        self.storage.save_plan(&plan)?;
        Ok(plan)
    }

    fn generate_files(&mut self) -> Result<Vec<GeneratedFile>> {
        let plan = self.load_plan()?;

        // Validate everything before writing anything.
        let mut rendered = Vec::with_capacity(plan.programs.len());
        for program in &plan.programs {
            let path = self.spec_path(&program.journey_id);
            let previous = read_optional(&path)?;
            let text = codegen::generate(program, previous.as_deref())?;
            let report = validate::check(&text, program)?;
            for warning in report.warnings() {
                self.warnings.warn(
                    &format!("{}:{}:{}", program.journey_id, warning.rule, warning.line),
                    format_args!("{}: {warning}", program.journey_id),
                );
            }
            let changed = previous.as_deref() != Some(text.as_str());
            let file = GeneratedFile {
                journey_id: program.journey_id.clone(),
                path,
                changed,
                blocked: program.stats.blocked,
                warnings: report.warnings().count(),
            };
            rendered.push((file, text));
        }

        fs::create_dir_all(&self.config.output_dir).map_err(|source| PipelineError::Io {
            path: self.config.output_dir.clone(),
            source,
        })?;
        let mut files = Vec::with_capacity(rendered.len());
        for (file, text) in rendered {
            if file.changed {
                write_atomic(&file.path, text.as_bytes()).map_err(|source| PipelineError::Io {
                    path: file.path.clone(),
                    source,
                })?;
            }
            tracing::info!(journey = %file.journey_id, path = %file.path.display(), changed = file.changed, "generated test");
            files.push(file);
        }
        Ok(files)
    }

    fn run_tests(&mut self, runner: &mut dyn TestRunner) -> Result<Vec<ExecutionResult>> {
        let plan = self.load_plan()?;
        let mut sink = JsonlSink::new(self.storage.learning_events_path());

        let mut results = Vec::with_capacity(plan.programs.len());
        for program in &plan.programs {
            let spec_path = self.spec_path(&program.journey_id);
            if !spec_path.exists() {
                return Err(missing(&spec_path.display().to_string(), Command::Generate));
            }
            let request = RunRequest {
                journey_id: &program.journey_id,
                spec_path: &spec_path,
            };
            let result = runner::execute(runner, &request)?;
            self.storage.save_result(&result)?;
            learning::report_all(&mut sink, &learning::run_events(program, &result))?;

            for failure in &result.failures {
                if failure.category == FailureCategory::Unclassified {
                    self.warnings.warn(
                        &format!("unclassified:{}", program.journey_id),
                        format_args!("{}: unclassified failure; healing will not touch it", program.journey_id),
                    );
                }
            }
            results.push(result);
        }
        Ok(results)
    }

    fn heal_failures(
        &mut self,
        runner: &mut dyn TestRunner,
    ) -> Result<(Vec<RefinementSession>, Vec<ExecutionResult>)> {
        let mut plan = self.load_plan()?;
        let limits = HealLimits::from(&self.config.healing);
        let mut sink = JsonlSink::new(self.storage.learning_events_path());

        let mut sessions = Vec::new();
        let mut results = Vec::new();
        let mut healed_any = false;
        let mut pending = self.storage.load_results()?.into_iter();

        for result in pending.by_ref() {
            if result.passed() {
                results.push(result);
                continue;
            }
            let Some(index) = plan
                .programs
                .iter()
                .position(|p| p.journey_id == result.journey_id)
            else {
                self.warnings.warn(
                    &format!("unplanned:{}", result.journey_id),
                    format_args!("{}: result has no planned program; skipping", result.journey_id),
                );
                results.push(result);
                continue;
            };

            let spec_path = self.spec_path(&result.journey_id);
            let report = Healer::new(&mut *runner, self.storage, limits).heal(
                &plan.programs[index],
                &spec_path,
                &result,
            )?;

            if report.healed() {
                learning::report_all(
                    &mut sink,
                    &learning::session_events(&report.session, &report.program),
                )?;
                learning::report_all(&mut sink, &learning::run_events(&report.program, &report.result))?;
                plan.programs[index] = report.program;
                healed_any = true;
            }
            let cancelled = report.session.stop_reason() == Some(StopReason::Cancelled);
            results.push(report.result);
            sessions.push(report.session);
            if cancelled {
                break;
            }
        }
        // Journeys left unvisited after a cancel keep their last result.
        results.extend(pending);

        if healed_any {
            self.storage.save_plan(&plan)?;
        }
        Ok((sessions, results))
    }

    // ── Helpers ──

    fn load_plan(&self) -> Result<Plan> {
        self.storage
            .load_plan()?
            .ok_or_else(|| missing(PLAN_FILE, Command::Plan))
    }

    fn spec_path(&self, journey_id: &str) -> PathBuf {
        self.config
            .output_dir
            .join(codegen::spec_file_name(journey_id))
    }
}

/// A runner that keeps the state lock alive across long test runs.
struct Leased<'r> {
    runner: &'r mut dyn TestRunner,
    lock: &'r StateLock,
    lease: Duration,
}

impl TestRunner for Leased<'_> {
    fn run(&mut self, request: &RunRequest<'_>) -> std::result::Result<ExecutionResult, RunnerError> {
        if let Err(e) = self.lock.renew(self.lease) {
            tracing::warn!(error = %e, "could not renew the state lock");
        }
        self.runner.run(request)
    }
}

/// Where `refine` lands: blocked if any session stopped for good,
/// back to tested on cancel or leftover failures, completed otherwise.
fn refine_outcome(
    sessions: &[RefinementSession],
    results: &[ExecutionResult],
) -> (Stage, String) {
    let stops: Vec<String> = sessions
        .iter()
        .filter_map(|s| match &s.circuit {
            CircuitState::Open { reason, detail } if reason.blocks_pipeline() => {
                Some(format!("{}: {reason}: {detail}", s.journey_id))
            }
            _ => None,
        })
        .collect();
    if let Some(first) = stops.first() {
        let reason = match stops.len() {
            1 => first.clone(),
            n => format!("{first} (and {} more)", n - 1),
        };
        return (Stage::Blocked, reason);
    }

    if sessions
        .iter()
        .any(|s| s.stop_reason() == Some(StopReason::Cancelled))
    {
        return (Stage::Tested, "cancelled".to_string());
    }

    let healed = sessions.iter().filter(|s| s.healed).count();
    if results.iter().all(ExecutionResult::passed) {
        (Stage::Completed, format!("{healed} healed"))
    } else {
        (Stage::Tested, format!("{healed} healed, failures remain"))
    }
}

fn missing(artifact: &str, command: Command) -> PipelineError {
    PipelineError::Missing {
        artifact: artifact.to_string(),
        command,
    }
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(PipelineError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
