//! Failure classification and fingerprinting.
//!
//! Categories come from ordered regex heuristics; the first match wins.
//! Anything unmatched, and every blocked-step marker, is `unclassified`
//! and never repaired.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::codegen::BLOCKED_MARKER;
use crate::model::{ExecutionResult, FailureCategory};

/// Hex characters kept from the SHA-256 digest.
pub const FINGERPRINT_LEN: usize = 16;

static HEURISTICS: LazyLock<Vec<(FailureCategory, Regex)>> = LazyLock::new(|| {
    let table = [
        (
            FailureCategory::Environment,
            r"ECONNREFUSED|ENOTFOUND|EAI_AGAIN|EADDRINUSE|net::ERR_(?:CONNECTION_\w+|NAME_NOT_RESOLVED|INTERNET_DISCONNECTED|ADDRESS_UNREACHABLE)|browserType\.launch|executable doesn't exist|spawn \S+ ENOENT|command not found|cannot find module|no tests found",
        ),
        (
            FailureCategory::Navigation,
            r"page\.goto|net::ERR_ABORTED|navigation (?:to \S+ )?(?:failed|interrupted)|waiting for navigation|waitForURL|toHaveURL|frame was detached|404 not found",
        ),
        (
            FailureCategory::Data,
            r"duplicate key|already exists|unique constraint|violates \w+ constraint|\b409\b|conflict|validation error|invalid (?:input|value)",
        ),
        (
            FailureCategory::AppBug,
            r"internal server error|\b5\d\d\b|uncaught|unhandled|pageerror|TypeError|ReferenceError|toHaveText|toContainText|toHaveValue|toHaveTitle",
        ),
        (
            FailureCategory::Selector,
            r"strict mode violation|resolved to \d+ elements|waiting for (?:locator|selector|getBy)|(?:selector|element|locator)s? not found|no element|element is not (?:visible|attached|enabled)|element is outside|getBy\w+\(|locator\(",
        ),
        (
            FailureCategory::Timing,
            r"timeout|timed out|exceeded|took too long|still (?:loading|pending)",
        ),
    ];
    table
        .into_iter()
        .map(|(category, pattern)| {
            let regex = Regex::new(&format!("(?i){pattern}")).expect("heuristic is valid");
            (category, regex)
        })
        .collect()
});

static ANSI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").expect("ansi pattern is valid"));

static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("digit pattern is valid"));

static STRICT_MODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)strict mode violation|resolved to \d+ elements").expect("strict pattern is valid")
});

static LOCATOR_IN_MESSAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(getBy\w+\([^)]*\)(?:\.nth\(\d+\))?|locator\((?:'[^']*'|"[^"]*")\))|(?i:(?:selector|element|locator) not found):?\s*(\S+)"#,
    )
    .expect("locator pattern is valid")
});

/// Category of one failure message.
pub fn classify(message: &str) -> FailureCategory {
    if message.contains(BLOCKED_MARKER) {
        return FailureCategory::Unclassified;
    }
    HEURISTICS
        .iter()
        .find(|(_, regex)| regex.is_match(message))
        .map_or(FailureCategory::Unclassified, |(category, _)| *category)
}

/// The message with ANSI codes stripped, numbers replaced by `#`, and
/// whitespace collapsed.
pub fn normalize_message(message: &str) -> String {
    let plain = ANSI.replace_all(message, "");
    let numbered = DIGITS.replace_all(&plain, "#");
    numbered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Stable identity of a failure: same category and same message modulo
/// noise give the same fingerprint.
pub fn fingerprint(category: FailureCategory, message: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(category.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(normalize_message(message).as_bytes());
    let mut hex = hex::encode(hasher.finalize());
    hex.truncate(FINGERPRINT_LEN);
    hex
}

/// Several elements matched where one was expected.
pub fn is_strict_mode_violation(message: &str) -> bool {
    STRICT_MODE.is_match(message)
}

/// The locator a message names, when it names one.
pub fn implicated_locator(message: &str) -> Option<String> {
    let caps = LOCATOR_IN_MESSAGE.captures(message)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().to_string())
}

/// Fill in category and locator for every failure in a result.
pub fn classify_result(result: &mut ExecutionResult) {
    for failure in &mut result.failures {
        failure.category = classify(&failure.message);
        if failure.locator.is_none() {
            failure.locator = implicated_locator(&failure.message);
        }
    }
}

/// Failure counts per category across results.
pub fn category_counts<'a>(
    results: impl IntoIterator<Item = &'a ExecutionResult>,
) -> BTreeMap<FailureCategory, usize> {
    let mut counts = BTreeMap::new();
    for result in results {
        for failure in &result.failures {
            *counts.entry(failure.category).or_insert(0) += 1;
        }
    }
    counts
}
