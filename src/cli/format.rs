//! Output formatting for CLI display.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::Path;

use crate::model::{Analysis, ExecutionResult, FailureCategory, Plan, RefinementSession};
use crate::pipeline::{GeneratedFile, RefineSummary, RunSummary, Status};

/// History entries shown by `status`.
const RECENT_HISTORY: usize = 5;

pub(super) fn analysis(analysis: &Analysis) -> String {
    let mut out = String::new();
    for j in &analysis.journeys {
        let _ = writeln!(
            out,
            "{}  [{}]  {} step(s), {} instruction(s)  {}",
            j.id, j.tier, j.steps, j.instructions, j.title
        );
    }
    let _ = writeln!(out, "{} journey(s) analyzed", analysis.journeys.len());
    out
}

pub(super) fn plan(plan: &Plan) -> String {
    let mut out = String::new();
    for p in &plan.programs {
        let _ = writeln!(
            out,
            "{}  {} mapped, {} blocked, {} selector debt",
            p.journey_id, p.stats.mapped, p.stats.blocked, p.stats.selector_debt
        );
    }
    let kb = if plan.knowledge_version.is_empty() {
        "none"
    } else {
        plan.knowledge_version.as_str()
    };
    let _ = writeln!(
        out,
        "{} program(s); built-in table v{}, knowledge base {kb}, {} policy at {}",
        plan.programs.len(),
        plan.builtin_table_version,
        plan.confidence_policy,
        plan.confidence_threshold
    );
    out
}

pub(super) fn generated(files: &[GeneratedFile], dir: &Path) -> String {
    let mut out = String::new();
    for f in files {
        let path = f.path.strip_prefix(dir).unwrap_or(&f.path);
        let verb = if f.changed { "written" } else { "unchanged" };
        let _ = write!(out, "{}  {verb}", path.display());
        if f.blocked > 0 || f.warnings > 0 {
            let _ = write!(out, "  ({} blocked, {} warning(s))", f.blocked, f.warnings);
        }
        out.push('\n');
    }
    out
}

/// `selector 2, timing 1`, or `none`.
pub(super) fn categories(counts: &BTreeMap<FailureCategory, usize>) -> String {
    if counts.is_empty() {
        return "none".to_string();
    }
    counts
        .iter()
        .map(|(category, n)| format!("{category} {n}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn result_line(out: &mut String, result: &ExecutionResult) {
    let _ = write!(
        out,
        "{}  {}  {}ms",
        result.journey_id,
        result.status.as_str(),
        result.duration_ms
    );
    if let Some(failure) = result.primary_failure() {
        let first_line = failure.message.lines().next().unwrap_or_default();
        let _ = write!(out, "  [{}] {first_line}", failure.category);
    }
    out.push('\n');
}

pub(super) fn run_summary(summary: &RunSummary) -> String {
    let mut out = String::new();
    for result in &summary.results {
        result_line(&mut out, result);
    }
    let _ = writeln!(
        out,
        "{}/{} passed; failures: {}; stage {}",
        summary.passed(),
        summary.results.len(),
        categories(&summary.categories()),
        summary.stage
    );
    out
}

fn session_line(out: &mut String, session: &RefinementSession) {
    let attempts = session.attempts.len();
    let _ = write!(out, "{}  ", session.journey_id);
    match session.stop_reason() {
        _ if session.healed => {
            let _ = write!(out, "healed after {attempts} attempt(s)");
        }
        Some(reason) => {
            let _ = write!(out, "stopped ({reason}) after {attempts} attempt(s)");
        }
        None => {
            let _ = write!(out, "open after {attempts} attempt(s)");
        }
    }
    for a in &session.attempts {
        let outcome = if a.passed { "passed" } else { "failed" };
        let _ = write!(out, "\n    {}. {} on {}: {outcome}", a.number, a.fix.family, a.fix.target);
    }
    out.push('\n');
}

pub(super) fn refine_summary(summary: &RefineSummary) -> String {
    let mut out = String::new();
    if summary.sessions.is_empty() {
        out.push_str("Nothing to heal\n");
    }
    for session in &summary.sessions {
        session_line(&mut out, session);
    }
    let _ = writeln!(
        out,
        "{} healed; failures: {}; stage {}",
        summary.sessions.iter().filter(|s| s.healed).count(),
        categories(&summary.categories()),
        summary.stage
    );
    if let Some(reason) = &summary.blocked {
        let _ = writeln!(out, "Blocked: {reason}");
    }
    out
}

pub(super) fn status(status: &Status) -> String {
    let state = &status.state;
    let mut out = String::new();
    let _ = writeln!(out, "Stage: {} (revision {})", state.stage, state.revision);
    if let Some(blocked) = &state.blocked {
        let _ = writeln!(out, "Blocked: {} (since {})", blocked.reason, blocked.at);
    }
    let passed = status.results.iter().filter(|r| r.passed()).count();
    let _ = writeln!(
        out,
        "Journeys: {}; results: {passed}/{} passed; failures: {}",
        status.journeys,
        status.results.len(),
        categories(&crate::classify::category_counts(&status.results))
    );
    for session in &status.sessions {
        session_line(&mut out, session);
    }
    let skip = state.history.len().saturating_sub(RECENT_HISTORY);
    for record in &state.history[skip..] {
        let mark = if record.success { "ok" } else { "failed" };
        let _ = write!(
            out,
            "{}  {} {} -> {} {mark}",
            record.at, record.command, record.from, record.to
        );
        if let Some(detail) = &record.detail {
            let _ = write!(out, ": {detail}");
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    use jiff::Timestamp;

    use crate::model::{
        AppliedFix, Attempt, CircuitState, ExecutionStatus, Failure, FixFamily, PipelineState,
        Stage, StopReason,
    };

    fn failed(id: &str, message: &str, category: FailureCategory) -> ExecutionResult {
        ExecutionResult {
            journey_id: id.into(),
            status: ExecutionStatus::Failed,
            failures: vec![Failure {
                message: message.into(),
                category,
                locator: None,
                line: None,
                step_id: None,
            }],
            duration_ms: 1200,
            exit_code: Some(1),
            evidence: None,
        }
    }

    #[test]
    fn category_counts_read_naturally() {
        let mut counts = BTreeMap::new();
        assert_eq!(categories(&counts), "none");
        counts.insert(FailureCategory::Timing, 1);
        counts.insert(FailureCategory::Selector, 2);
        assert_eq!(categories(&counts), "selector 2, timing 1");
    }

    #[test]
    fn run_summary_lists_each_result() {
        let summary = RunSummary {
            results: vec![
                failed("J-1", "selector not found: #submit\n  at line 9", FailureCategory::Selector),
                ExecutionResult {
                    status: ExecutionStatus::Passed,
                    failures: Vec::new(),
                    ..failed("J-2", "", FailureCategory::Selector)
                },
            ],
            stage: Stage::Tested,
        };
        assert_eq!(
            run_summary(&summary),
            "J-1  failed  1200ms  [selector] selector not found: #submit\n\
             J-2  passed  1200ms\n\
             1/2 passed; failures: selector 1; stage tested\n"
        );
    }

    #[test]
    fn refine_summary_names_the_stop() {
        let mut session = RefinementSession::new("J", "m".into(), "f".into());
        session.attempts.push(Attempt {
            number: 1,
            fix: AppliedFix {
                family: FixFamily::UpgradeSelector,
                target: "step-2".into(),
                detail: String::new(),
            },
            passed: false,
            fingerprint: "f".into(),
            category: Some(FailureCategory::Selector),
            message: Some("m".into()),
            failures: 1,
            cost_ms: 10,
            at: Timestamp::now(),
        });
        session.circuit = CircuitState::Open {
            reason: StopReason::AttemptsExhausted,
            detail: "1 of 1 attempts used".into(),
        };
        let summary = RefineSummary {
            sessions: vec![session],
            results: vec![failed("J", "m", FailureCategory::Selector)],
            stage: Stage::Blocked,
            blocked: Some("J: attempts-exhausted: 1 of 1 attempts used".into()),
        };
        assert_eq!(
            refine_summary(&summary),
            "J  stopped (attempts-exhausted) after 1 attempt(s)\n    \
             1. upgrade-selector on step-2: failed\n\
             0 healed; failures: selector 1; stage blocked\n\
             Blocked: J: attempts-exhausted: 1 of 1 attempts used\n"
        );
    }

    #[test]
    fn status_shows_stage_and_revision() {
        let snapshot = Status {
            state: PipelineState {
                revision: 3,
                ..PipelineState::default()
            },
            journeys: 2,
            results: Vec::new(),
            sessions: Vec::new(),
        };
        assert_eq!(
            status(&snapshot),
            "Stage: initial (revision 3)\nJourneys: 2; results: 0/0 passed; failures: none\n"
        );
    }
}
