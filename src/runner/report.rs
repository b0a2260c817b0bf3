//! Playwright JSON reporter output.
//!
//! Only the fields waymark needs are modeled; everything else is ignored.
//! Suites nest arbitrarily, so failures are collected recursively.

use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JsonReport {
    suites: Vec<Suite>,
    errors: Vec<ReportError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Suite {
    specs: Vec<Spec>,
    suites: Vec<Suite>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Spec {
    title: String,
    tests: Vec<TestEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TestEntry {
    results: Vec<TestResult>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TestResult {
    status: String,
    error: Option<ReportError>,
    errors: Vec<ReportError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReportError {
    message: String,
    location: Option<Location>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Location {
    line: u32,
}

/// One failure as the reporter described it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportedFailure {
    pub message: String,

    /// Line in the spec file, when the reporter located the error.
    pub line: Option<u32>,
}

/// What a report says about one run.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Report {
    /// Tests that produced a final result.
    pub tests: usize,
    pub failures: Vec<ReportedFailure>,
}

impl Report {
    pub fn passed(&self) -> bool {
        self.tests > 0 && self.failures.is_empty()
    }
}

/// Parse reporter output. Leading non-JSON noise is skipped; anything
/// that isn't a report is `None`.
pub fn parse(stdout: &str) -> Option<Report> {
    let start = stdout.find('{')?;
    let raw = serde_json::Deserializer::from_str(&stdout[start..])
        .into_iter::<JsonReport>()
        .next()?
        .ok()?;

    let mut report = Report::default();
    for error in raw.errors {
        report.failures.push(reported(error));
    }
    for suite in raw.suites {
        collect(suite, &mut report);
    }
    Some(report)
}

fn collect(suite: Suite, report: &mut Report) {
    for spec in suite.specs {
        for test in spec.tests {
            // Retries append results; the last one is the verdict.
            let Some(result) = test.results.into_iter().last() else {
                continue;
            };
            report.tests += 1;
            if matches!(result.status.as_str(), "passed" | "skipped") {
                continue;
            }
            let mut errors = result.errors;
            if errors.is_empty()
                && let Some(error) = result.error
            {
                errors.push(error);
            }
            if errors.is_empty() {
                report.failures.push(ReportedFailure {
                    message: format!("test '{}' ended with status {}", spec.title, result.status),
                    line: None,
                });
            }
            report.failures.extend(errors.into_iter().map(reported));
        }
    }
    for child in suite.suites {
        collect(child, report);
    }
}

fn reported(error: ReportError) -> ReportedFailure {
    ReportedFailure {
        message: error.message,
        line: error.location.map(|l| l.line).filter(|&l| l > 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAILING: &str = r#"Running 1 test using 1 worker
{
  "config": {},
  "suites": [
    {
      "title": "JRN-0001.spec.ts",
      "specs": [],
      "suites": [
        {
          "title": "JRN-0001: User signs in",
          "specs": [
            {
              "title": "User signs in",
              "ok": false,
              "tests": [
                {
                  "status": "unexpected",
                  "results": [
                    { "status": "failed", "errors": [{ "message": "first try" }] },
                    {
                      "status": "failed",
                      "errors": [
                        {
                          "message": "Error: selector not found: #submit",
                          "location": { "file": "/w/tests/journeys/JRN-0001.spec.ts", "line": 17, "column": 7 }
                        }
                      ]
                    }
                  ]
                }
              ]
            }
          ]
        }
      ]
    }
  ],
  "errors": []
}
"#;

    #[test]
    fn collects_nested_failures_from_the_last_retry() {
        let report = parse(FAILING).unwrap();
        assert_eq!(report.tests, 1);
        assert_eq!(
            report.failures,
            [ReportedFailure {
                message: "Error: selector not found: #submit".into(),
                line: Some(17),
            }]
        );
        assert!(!report.passed());
    }

    #[test]
    fn passing_report() {
        let json = r#"{"suites":[{"specs":[{"title":"t","tests":[{"results":[{"status":"passed"}]}]}]}]}"#;
        let report = parse(json).unwrap();
        assert!(report.passed());
    }

    #[test]
    fn top_level_errors_are_failures() {
        let json = r#"{"suites":[],"errors":[{"message":"Error: No tests found"}]}"#;
        let report = parse(json).unwrap();
        assert_eq!(report.failures[0].message, "Error: No tests found");
        assert!(!report.passed());
    }

    #[test]
    fn result_without_errors_still_fails() {
        let json = r#"{"suites":[{"specs":[{"title":"t","tests":[{"results":[{"status":"interrupted"}]}]}]}]}"#;
        let report = parse(json).unwrap();
        assert_eq!(report.failures[0].message, "test 't' ended with status interrupted");
    }

    #[test]
    fn garbage_is_none() {
        assert!(parse("npm ERR! missing script").is_none());
        assert!(parse("{ not json").is_none());
    }
}
