//! Execution runner: run one generated test and describe what happened.
//!
//! The real runner shells out to Playwright with a hard timeout. Output
//! goes to files rather than pipes so a chatty test can't deadlock us, and
//! is archived as zstd evidence once the process exits. Everything above
//! this module talks to the [`TestRunner`] trait so tests can script
//! outcomes.

pub mod report;

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::classify;
use crate::codegen;
use crate::model::{ExecutionResult, ExecutionStatus, Failure, FailureCategory};
use crate::storage::{Storage, StorageError};

const POLL: Duration = Duration::from_millis(50);

/// Lines of stderr kept as the failure message when no report is readable.
const STDERR_TAIL: usize = 12;

const ZSTD_LEVEL: i32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("failed to start `{program}`: {source}")]
    Spawn { program: String, source: io::Error },

    #[error("runner I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// One test to run.
#[derive(Debug, Clone, Copy)]
pub struct RunRequest<'a> {
    pub journey_id: &'a str,
    pub spec_path: &'a Path,
}

/// Runs a generated test to completion.
pub trait TestRunner {
    fn run(&mut self, request: &RunRequest<'_>) -> Result<ExecutionResult, RunnerError>;
}

/// Run, then classify every failure and attribute it to a step.
pub fn execute(
    runner: &mut dyn TestRunner,
    request: &RunRequest<'_>,
) -> Result<ExecutionResult, RunnerError> {
    let mut result = runner.run(request)?;
    classify::classify_result(&mut result);

    if result.failures.iter().any(|f| f.step_id.is_none() && f.line.is_some())
        && let Ok(source) = fs::read_to_string(request.spec_path)
    {
        for failure in &mut result.failures {
            if failure.step_id.is_none()
                && let Some(line) = failure.line
            {
                failure.step_id = codegen::block_at_line(&source, line as usize)
                    .filter(|id| is_step_block(id));
            }
        }
    }

    tracing::info!(
        journey = request.journey_id,
        status = ?result.status,
        failures = result.failures.len(),
        duration_ms = result.duration_ms,
        "test run finished"
    );
    Ok(result)
}

/// Step blocks are the ones named after Journey steps.
fn is_step_block(id: &str) -> bool {
    ["step-", "setup-", "cleanup-"]
        .iter()
        .any(|prefix| id.starts_with(prefix))
}

// ── Playwright ──

/// Runs tests through the configured Playwright command.
pub struct PlaywrightRunner<'s> {
    command: Vec<String>,
    args: Vec<String>,
    timeout: Duration,
    work_dir: PathBuf,
    storage: &'s Storage,
}

impl<'s> PlaywrightRunner<'s> {
    pub fn new(
        command: Vec<String>,
        args: Vec<String>,
        timeout: Duration,
        work_dir: impl Into<PathBuf>,
        storage: &'s Storage,
    ) -> Self {
        Self {
            command,
            args,
            timeout,
            work_dir: work_dir.into(),
            storage,
        }
    }
}

struct Exit {
    status: Option<ExitStatus>,
    timed_out: bool,
    elapsed: Duration,
}

impl TestRunner for PlaywrightRunner<'_> {
    fn run(&mut self, request: &RunRequest<'_>) -> Result<ExecutionResult, RunnerError> {
        let Some((program, leading)) = self.command.split_first() else {
            return Err(RunnerError::Spawn {
                program: String::new(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "empty runner command"),
            });
        };

        let number = self.storage.next_evidence_number(request.journey_id)?;
        let scratch = self.storage.evidence_dir(request.journey_id);
        fs::create_dir_all(&scratch)?;
        let stdout_path = scratch.join(format!("{number}.stdout"));
        let stderr_path = scratch.join(format!("{number}.stderr"));

        tracing::debug!(journey = request.journey_id, %program, spec = %request.spec_path.display(), "starting runner");
        let mut child = Command::new(program)
            .args(leading)
            .arg(request.spec_path)
            .args(&self.args)
            .current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(File::create(&stdout_path)?))
            .stderr(Stdio::from(File::create(&stderr_path)?))
            .spawn()
            .map_err(|source| RunnerError::Spawn {
                program: program.clone(),
                source,
            })?;

        let exit = wait_with_timeout(&mut child, self.timeout)?;

        let stdout = String::from_utf8_lossy(&fs::read(&stdout_path)?).into_owned();
        let stderr = String::from_utf8_lossy(&fs::read(&stderr_path)?).into_owned();
        let _ = fs::remove_file(&stdout_path);
        let _ = fs::remove_file(&stderr_path);

        let capture = format!("--- stdout ---\n{stdout}\n--- stderr ---\n{stderr}");
        let compressed = zstd::encode_all(capture.as_bytes(), ZSTD_LEVEL)?;
        let evidence = self
            .storage
            .write_evidence(request.journey_id, number, &compressed)?;

        let mut result = interpret(request.journey_id, &exit, &stdout, &stderr, self.timeout);
        result.evidence = Some(evidence);
        Ok(result)
    }
}

/// Poll until the child exits or `timeout` passes, killing it on expiry.
fn wait_with_timeout(child: &mut std::process::Child, timeout: Duration) -> io::Result<Exit> {
    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Exit {
                status: Some(status),
                timed_out: false,
                elapsed: started.elapsed(),
            });
        }
        if started.elapsed() >= timeout {
            let _ = child.kill();
            let status = child.wait()?;
            tracing::warn!(timeout_secs = timeout.as_secs(), "runner killed after timeout");
            return Ok(Exit {
                status: Some(status),
                timed_out: true,
                elapsed: started.elapsed(),
            });
        }
        thread::sleep(POLL);
    }
}

/// Turn process output into a result: the JSON report when readable,
/// otherwise exit code plus stderr.
fn interpret(
    journey_id: &str,
    exit: &Exit,
    stdout: &str,
    stderr: &str,
    timeout: Duration,
) -> ExecutionResult {
    let exit_code = exit.status.and_then(|s| s.code());
    let duration_ms = u64::try_from(exit.elapsed.as_millis()).unwrap_or(u64::MAX);
    let mut result = ExecutionResult {
        journey_id: journey_id.to_string(),
        status: ExecutionStatus::Failed,
        failures: Vec::new(),
        duration_ms,
        exit_code,
        evidence: None,
    };

    if exit.timed_out {
        result.status = ExecutionStatus::Timeout;
        result.failures.push(failure(
            format!("runner timed out after {}s", timeout.as_secs_f64()),
            None,
        ));
        return result;
    }

    let succeeded = exit_code == Some(0);
    match report::parse(stdout) {
        Some(parsed) => {
            result.failures = parsed
                .failures
                .into_iter()
                .map(|f| failure(f.message, f.line))
                .collect();
            if result.failures.is_empty() && !succeeded {
                result.failures.push(failure(fallback_message(stderr, exit_code), None));
            }
        }
        None if !succeeded => {
            tracing::debug!(journey = journey_id, "no readable report, falling back to stderr");
            result.failures.push(failure(fallback_message(stderr, exit_code), None));
        }
        None => {}
    }

    if result.failures.is_empty() {
        result.status = ExecutionStatus::Passed;
    }
    result
}

fn failure(message: String, line: Option<u32>) -> Failure {
    Failure {
        message,
        category: FailureCategory::Unclassified,
        locator: None,
        line,
        step_id: None,
    }
}

fn fallback_message(stderr: &str, exit_code: Option<i32>) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() {
        return match exit_code {
            Some(code) => format!("runner exited with code {code}"),
            None => "runner was terminated by a signal".to_string(),
        };
    }
    let tail = &lines[lines.len().saturating_sub(STDERR_TAIL)..];
    tail.join("\n")
}

// ── Scripted ──

/// Replays canned results in order. Once the script runs out, the last
/// result repeats.
#[cfg(test)]
pub struct ScriptedRunner {
    script: Vec<ExecutionResult>,
    pub calls: usize,
}

#[cfg(test)]
impl ScriptedRunner {
    pub fn new(script: Vec<ExecutionResult>) -> Self {
        Self { script, calls: 0 }
    }

    /// A runner whose every run fails with the given messages in turn.
    pub fn failing(journey_id: &str, messages: &[&str]) -> Self {
        Self::new(
            messages
                .iter()
                .map(|m| ExecutionResult {
                    journey_id: journey_id.to_string(),
                    status: ExecutionStatus::Failed,
                    failures: vec![failure((*m).to_string(), None)],
                    duration_ms: 100,
                    exit_code: Some(1),
                    evidence: None,
                })
                .collect(),
        )
    }

    pub fn passing(journey_id: &str) -> ExecutionResult {
        ExecutionResult {
            journey_id: journey_id.to_string(),
            status: ExecutionStatus::Passed,
            failures: Vec::new(),
            duration_ms: 100,
            exit_code: Some(0),
            evidence: None,
        }
    }
}

#[cfg(test)]
impl TestRunner for ScriptedRunner {
    fn run(&mut self, _request: &RunRequest<'_>) -> Result<ExecutionResult, RunnerError> {
        let index = self.calls.min(self.script.len().saturating_sub(1));
        self.calls += 1;
        self.script
            .get(index)
            .cloned()
            .ok_or_else(|| RunnerError::Io(io::Error::other("empty script")))
    }
}
