//! Static policy checks over generated test code.
//!
//! Rules run line by line. Most see the line with string-literal contents
//! blanked out, so a blocked step's reason can quote `sleep(` without
//! tripping a rule. Rules about string options (`'networkidle'`) see the
//! raw line but skip the lines that only carry generated titles and
//! blocked-step messages. Comment lines are skipped.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::codegen::{BLOCKED_MARKER, journey_tag, tier_tag};
use crate::model::{IrProgram, Primitive};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// One rule broken at one place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    pub rule: &'static str,
    pub severity: Severity,

    /// 1-based.
    pub line: usize,

    /// 1-based.
    pub column: usize,

    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} {} ({})",
            self.line, self.column, self.message, self.rule
        )
    }
}

/// Error-severity violations. The pipeline does not run code that has any.
#[derive(Debug, Clone, thiserror::Error)]
#[error("generated test for {journey_id} failed validation: {}", summary(.violations))]
pub struct ValidationFailure {
    pub journey_id: String,
    pub violations: Vec<Violation>,
}

fn summary(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

struct Rule {
    id: &'static str,
    severity: Severity,
    regex: Regex,
    message: &'static str,

    /// Match inside string literals too.
    raw: bool,
}

fn rule(id: &'static str, severity: Severity, pattern: &str, message: &'static str) -> Rule {
    Rule {
        id,
        severity,
        regex: Regex::new(pattern).expect("validator rule is valid"),
        message,
        raw: false,
    }
}

fn raw_rule(id: &'static str, severity: Severity, pattern: &str, message: &'static str) -> Rule {
    Rule {
        raw: true,
        ..rule(id, severity, pattern, message)
    }
}

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        rule(
            "no-hard-wait",
            Severity::Error,
            r"(?:\b(waitForTimeout)|(?:^|[^.\w$])(setTimeout|sleep))\s*\(",
            "hard waits are not allowed; wait for a condition instead",
        ),
        rule(
            "no-force-action",
            Severity::Error,
            r"\b(force)\s*:\s*true\b",
            "forced interactions bypass actionability checks",
        ),
        raw_rule(
            "no-network-idle",
            Severity::Error,
            r"\b(networkidle)\b",
            "network-idle waits are not allowed",
        ),
        rule(
            "no-skip",
            Severity::Error,
            r"\b(test\.(?:skip|fixme))\s*\(|(\.only)\s*\(",
            "skipped or focused tests are not allowed",
        ),
    ]
});

static CSS_LOCATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.locator\(\s*'").expect("css locator pattern is valid"));

/// Result of validating one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn errors(&self) -> impl Iterator<Item = &Violation> {
        self.violations
            .iter()
            .filter(|v| v.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Violation> {
        self.violations
            .iter()
            .filter(|v| v.severity == Severity::Warning)
    }

    pub fn passed(&self) -> bool {
        self.errors().next().is_none()
    }
}

/// Check generated code for the given program.
pub fn validate(text: &str, program: &IrProgram) -> ValidationReport {
    let mut violations = Vec::new();
    let mut describe_line = None;
    let mut blocked_throws = 0;
    let throw_prefix = format!("throw new Error('{BLOCKED_MARKER} ");

    for (index, line) in text.lines().enumerate() {
        let line_no = index + 1;
        let trimmed = line.trim_start();
        if is_comment(trimmed) {
            continue;
        }

        if trimmed.starts_with(&throw_prefix) {
            blocked_throws += 1;
        }
        if describe_line.is_none() && trimmed.starts_with("test.describe(") {
            describe_line = Some((line_no, line));
        }

        let code = blank_strings(line);
        let title_only = trimmed.starts_with(&throw_prefix)
            || trimmed.starts_with("await test.step(")
            || trimmed.starts_with("test.describe(")
            || trimmed.starts_with("test(");
        for rule in RULES.iter() {
            let haystack = if rule.raw {
                if title_only {
                    continue;
                }
                line
            } else {
                code.as_str()
            };
            for caps in rule.regex.captures_iter(haystack) {
                let start = caps
                    .iter()
                    .skip(1)
                    .flatten()
                    .next()
                    .or_else(|| caps.get(0))
                    .map_or(0, |m| m.start());
                violations.push(Violation {
                    rule: rule.id,
                    severity: rule.severity,
                    line: line_no,
                    column: start + 1,
                    message: rule.message.to_string(),
                });
            }
        }

        for m in CSS_LOCATOR.find_iter(&code) {
            let literal_start = m.end();
            let selector = literal_at(line, literal_start);
            if !selector.starts_with("[data-") {
                violations.push(Violation {
                    rule: "selector-debt",
                    severity: Severity::Warning,
                    line: line_no,
                    column: m.start() + 1,
                    message: format!("raw css locator `{selector}`; prefer a test id, role, or label"),
                });
            }
        }
    }

    check_tags(program, describe_line, &mut violations);

    let expected = program
        .primitives()
        .filter(|m| matches!(m.primitive, Primitive::Blocked { .. }))
        .count();
    if blocked_throws != expected {
        violations.push(Violation {
            rule: "blocked-step-visible",
            severity: Severity::Error,
            line: 1,
            column: 1,
            message: format!(
                "expected {expected} {BLOCKED_MARKER} throw(s) for blocked steps, found {blocked_throws}"
            ),
        });
    }

    ValidationReport { violations }
}

/// Validate and turn error-severity violations into a failure.
pub fn check(text: &str, program: &IrProgram) -> Result<ValidationReport, ValidationFailure> {
    let report = validate(text, program);
    if report.passed() {
        Ok(report)
    } else {
        Err(ValidationFailure {
            journey_id: program.journey_id.clone(),
            violations: report.errors().cloned().collect(),
        })
    }
}

fn check_tags(program: &IrProgram, describe: Option<(usize, &str)>, out: &mut Vec<Violation>) {
    let Some((line_no, line)) = describe else {
        out.push(Violation {
            rule: "required-tags",
            severity: Severity::Error,
            line: 1,
            column: 1,
            message: "no test.describe found to carry the journey and tier tags".to_string(),
        });
        return;
    };
    for tag in [journey_tag(&program.journey_id), tier_tag(&program.tier)] {
        if !line.contains(&format!("'{tag}'")) {
            out.push(Violation {
                rule: "required-tags",
                severity: Severity::Error,
                line: line_no,
                column: 1,
                message: format!("describe is missing tag {tag}"),
            });
        }
    }
}

fn is_comment(trimmed: &str) -> bool {
    trimmed.starts_with("//") || trimmed.starts_with("/*") || trimmed.starts_with('*')
}

/// The line with every string literal's contents replaced by spaces.
/// Byte offsets are preserved.
fn blank_strings(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in line.chars() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                    push_blank(&mut out, c);
                } else if c == '\\' {
                    escaped = true;
                    out.push(' ');
                } else if c == q {
                    quote = None;
                    out.push(c);
                } else {
                    push_blank(&mut out, c);
                }
            }
            None => {
                if matches!(c, '\'' | '"' | '`') {
                    quote = Some(c);
                }
                out.push(c);
            }
        }
    }
    out
}

fn push_blank(out: &mut String, c: char) {
    for _ in 0..c.len_utf8() {
        out.push(' ');
    }
}

/// The contents of the single-quoted literal starting at byte `start`.
fn literal_at(line: &str, start: usize) -> String {
    let mut out = String::new();
    let mut escaped = false;
    for c in line[start..].chars() {
        if escaped {
            out.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '\'' {
            break;
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::codegen;
    use crate::ir;
    use crate::journey;
    use crate::matcher::{DEFAULT_CONFIDENCE_THRESHOLD, KnowledgeBase, Matcher, RawConfidence};

    fn program(body: &str) -> IrProgram {
        let text = format!(
            "+++\nid = \"JRN-7\"\ntitle = \"T\"\ntier = \"smoke\"\nactor = \"a\"\n+++\n## Steps\n{body}"
        );
        let doc = journey::parse(&text).unwrap();
        let kb = KnowledgeBase::empty();
        let matcher = Matcher::new(&kb, &RawConfidence, DEFAULT_CONFIDENCE_THRESHOLD);
        ir::build(&doc, &matcher)
    }

    fn rules(report: &ValidationReport) -> Vec<&'static str> {
        report.violations.iter().map(|v| v.rule).collect()
    }

    #[test]
    fn generated_code_passes() {
        let p = program("- Navigate to /login\n- Click 'Sign in' button\n");
        let report = validate(&codegen::render(&p), &p);
        assert!(report.violations.is_empty(), "{:?}", report.violations);
    }

    #[test]
    fn blocked_step_still_passes_validation() {
        let p = program("- do the thing\n");
        let report = check(&codegen::render(&p), &p).unwrap();
        assert!(report.passed());
    }

    #[test]
    fn forbidden_constructs_are_errors_with_location() {
        let p = program("- Navigate to /\n");
        let code = codegen::render(&p).replace(
            "      await page.goto('/');",
            "      await page.waitForTimeout(500);\n      await page.getByText('x').click({ force: true });\n      await page.waitForLoadState('networkidle');\n      test.skip();",
        );
        let report = validate(&code, &p);
        assert_eq!(
            rules(&report),
            ["no-hard-wait", "no-force-action", "no-network-idle", "no-skip"]
        );
        let wait = &report.violations[0];
        assert_eq!(wait.column, "      await page.".len() + 1);
    }

    #[test]
    fn network_idle_in_a_step_title_is_not_code() {
        let p = program("- wait until networkidle\n");
        assert!(validate(&codegen::render(&p), &p).passed());
    }

    #[test]
    fn test_set_timeout_is_not_a_hard_wait() {
        let mut p = program("- Navigate to /\n");
        p.timeout_ms = Some(60_000);
        let code = codegen::render(&p);
        assert!(code.contains("test.setTimeout(60000);"));
        assert!(validate(&code, &p).passed());
    }

    #[test]
    fn quoted_text_does_not_trip_rules() {
        let p = program("- wait using sleep(5) and force: true\n");
        let report = validate(&codegen::render(&p), &p);
        assert!(report.passed(), "{:?}", report.violations);
    }

    #[test]
    fn comments_are_ignored() {
        let p = program("- Navigate to /\n");
        let code = codegen::render(&p).replace(
            "      await page.goto('/');",
            "      // await page.waitForTimeout(500);\n      await page.goto('/');",
        );
        assert!(validate(&code, &p).passed());
    }

    #[test]
    fn missing_tags_are_errors() {
        let p = program("- Navigate to /\n");
        let code = codegen::render(&p).replace("'@tier-smoke'", "'@tier-nightly'");
        let failure = check(&code, &p).unwrap_err();
        assert_eq!(failure.violations[0].rule, "required-tags");
        assert!(failure.violations[0].message.contains("@tier-smoke"));
    }

    #[test]
    fn hidden_blocked_step_is_an_error() {
        let p = program("- do the thing\n");
        let code = codegen::render(&p).replace("throw new Error(", "console.log(");
        assert_eq!(rules(&validate(&code, &p)), ["blocked-step-visible"]);
    }

    #[test]
    fn raw_css_is_a_warning_not_an_error() {
        let p = program("- Go @wm(action=click, css=\"form > button\")\n");
        let report = validate(&codegen::render(&p), &p);
        assert!(report.passed());
        assert_eq!(report.warnings().count(), 1);
    }

    #[test]
    fn data_attribute_css_is_fine() {
        let p = program("- Go @wm(action=click, css=\"[data-qa=go]\")\n");
        let report = validate(&codegen::render(&p), &p);
        assert!(report.violations.is_empty());
    }
}
