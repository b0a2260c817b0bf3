//! Journey parsing: text in, `JourneyDocument` out.
//!
//! A Journey is Markdown with TOML frontmatter between `+++` fences:
//!
//! ```text
//! +++
//! id = "JRN-0001"
//! title = "User signs in"
//! actor = "standard-user"
//!
//! [[completion]]
//! kind = "url-match"
//! value = "/dashboard"
//! +++
//!
//! ## Steps
//! 1. Navigate to /login
//! 2. Click 'Sign in'
//! ```
//!
//! Parse errors are fatal: nothing downstream runs on a malformed Journey.

mod body;

use std::path::{Path, PathBuf};
use std::{fs, io};

use ignore::WalkBuilder;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::model::{CompletionSignal, JourneyDocument, SourceInfo};

/// File suffix that marks a Journey.
pub const JOURNEY_SUFFIX: &str = ".journey.md";

const FENCE: &str = "+++";

const DEFAULT_TIER: &str = "regression";

/// Why a Journey could not be parsed.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("missing frontmatter: a journey must start with a `+++` fenced TOML block")]
    MissingFrontmatter,

    #[error("unterminated frontmatter: no closing `+++` fence")]
    UnterminatedFrontmatter,

    #[error("invalid frontmatter: {0}")]
    Frontmatter(String),

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("line {line}: {message}")]
    Body { line: usize, message: String },

    #[error("journey {0} has no steps")]
    NoSteps(String),

    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Frontmatter {
    id: Option<String>,
    title: Option<String>,
    tier: Option<String>,
    scope: Option<String>,
    actor: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    modules: Vec<String>,
    #[serde(default)]
    completion: Vec<CompletionSignal>,
}

/// Parse Journey text into a document.
pub fn parse(text: &str) -> Result<JourneyDocument, ParseError> {
    let (frontmatter, body_text, body_offset) = split_frontmatter(text)?;

    let meta: Frontmatter =
        toml::from_str(frontmatter).map_err(|e| ParseError::Frontmatter(e.to_string()))?;

    let id = required(meta.id, "id")?;
    let title = required(meta.title, "title")?;
    let actor = required(meta.actor, "actor")?;

    let sections = body::parse_sections(body_text, body_offset)?;
    if sections.steps.is_empty() {
        return Err(ParseError::NoSteps(id));
    }

    Ok(JourneyDocument {
        id,
        title,
        tier: meta
            .tier
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_TIER.to_string()),
        scope: meta.scope.unwrap_or_default(),
        actor,
        tags: meta.tags,
        steps: sections.steps,
        setup: sections.setup,
        cleanup: sections.cleanup,
        completion: meta.completion,
        modules: meta.modules,
        source: SourceInfo {
            path: None,
            sha256: sha256_hex(text),
        },
    })
}

/// Read and parse a Journey file, recording its path.
pub fn parse_file(path: &Path) -> Result<JourneyDocument, ParseError> {
    let text = fs::read_to_string(path).map_err(|source| ParseError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut doc = parse(&text)?;
    doc.source.path = Some(path.to_path_buf());
    Ok(doc)
}

/// Find every Journey file under `root`, sorted by path.
///
/// Respects `.gitignore`. A missing root yields an empty list.
pub fn discover(root: &Path) -> Vec<PathBuf> {
    if !root.exists() {
        return Vec::new();
    }

    let walker = WalkBuilder::new(root)
        .hidden(false)
        .sort_by_file_name(std::cmp::Ord::cmp)
        .build();

    let mut paths: Vec<PathBuf> = walker
        .flatten()
        .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
        .map(ignore::DirEntry::into_path)
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(JOURNEY_SUFFIX))
        })
        .collect();

    // Sort for deterministic output.
    paths.sort();
    paths
}

/// Splits the text into frontmatter, body, and the body's starting line number.
fn split_frontmatter(text: &str) -> Result<(&str, &str, usize), ParseError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut lines = text.split_inclusive('\n');

    let Some(first) = lines.next() else {
        return Err(ParseError::MissingFrontmatter);
    };
    if first.trim() != FENCE {
        return Err(ParseError::MissingFrontmatter);
    }

    let start = first.len();
    let mut offset = start;
    let mut line_no = 1;
    for line in lines {
        line_no += 1;
        if line.trim() == FENCE {
            let frontmatter = &text[start..offset];
            let body = &text[offset + line.len()..];
            return Ok((frontmatter, body, line_no + 1));
        }
        offset += line.len();
    }

    Err(ParseError::UnterminatedFrontmatter)
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ParseError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ParseError::MissingField(field))
}

/// The file-name stem for a Journey id: characters outside
/// `[A-Za-z0-9._-]` become `-`.
pub fn file_stem(journey_id: &str) -> String {
    journey_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Hex-encoded SHA-256 of some text.
pub fn sha256_hex(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    use crate::model::CompletionKind;

    const LOGIN: &str = r#"+++
id = "JRN-0001"
title = "User signs in"
tier = "smoke"
scope = "auth"
actor = "standard-user"
tags = ["auth", "critical"]
modules = ["auth/login"]

[[completion]]
kind = "url-match"
value = "/dashboard"
+++

# User signs in

## Steps
1. Navigate to /login
2. Fill 'user@example.com' into 'Email'
3. Click 'Sign in'
"#;

    #[test]
    fn parses_metadata_and_steps() {
        let doc = parse(LOGIN).unwrap();

        assert_eq!(doc.id, "JRN-0001");
        assert_eq!(doc.title, "User signs in");
        assert_eq!(doc.tier, "smoke");
        assert_eq!(doc.scope, "auth");
        assert_eq!(doc.actor, "standard-user");
        assert_eq!(doc.tags, ["auth", "critical"]);
        assert_eq!(doc.modules, ["auth/login"]);
        assert_eq!(doc.completion.len(), 1);
        assert_eq!(doc.completion[0].kind, CompletionKind::UrlMatch);
        assert_eq!(doc.completion[0].value, "/dashboard");

        let descriptions: Vec<&str> = doc.steps.iter().map(|s| s.description.as_str()).collect();
        assert_eq!(
            descriptions,
            [
                "Navigate to /login",
                "Fill 'user@example.com' into 'Email'",
                "Click 'Sign in'"
            ]
        );
        assert_eq!(doc.steps[2].id, "step-3");
    }

    #[test]
    fn hashes_the_source_text() {
        let doc = parse(LOGIN).unwrap();
        assert_eq!(doc.source.sha256, sha256_hex(LOGIN));
        assert_eq!(doc.source.sha256.len(), 64);
    }

    #[test]
    fn tier_defaults_to_regression() {
        let text = "+++\nid = \"J\"\ntitle = \"T\"\nactor = \"a\"\n+++\n## Steps\n- Navigate to /\n";
        assert_eq!(parse(text).unwrap().tier, "regression");
    }

    #[test]
    fn rejects_missing_identity_fields() {
        for (field, text) in [
            ("id", "+++\ntitle = \"T\"\nactor = \"a\"\n+++\n## Steps\n- x\n"),
            ("title", "+++\nid = \"J\"\nactor = \"a\"\n+++\n## Steps\n- x\n"),
            ("actor", "+++\nid = \"J\"\ntitle = \"T\"\nactor = \"  \"\n+++\n## Steps\n- x\n"),
        ] {
            let err = parse(text).unwrap_err();
            assert!(
                matches!(err, ParseError::MissingField(f) if f == field),
                "expected missing {field}, got {err}"
            );
        }
    }

    #[test]
    fn rejects_missing_frontmatter() {
        let err = parse("## Steps\n- Navigate to /\n").unwrap_err();
        assert!(matches!(err, ParseError::MissingFrontmatter));
    }

    #[test]
    fn rejects_unterminated_frontmatter() {
        let err = parse("+++\nid = \"J\"\n## Steps\n").unwrap_err();
        assert!(matches!(err, ParseError::UnterminatedFrontmatter));
    }

    #[test]
    fn rejects_unknown_completion_kind() {
        let text = "+++\nid = \"J\"\ntitle = \"T\"\nactor = \"a\"\n\n[[completion]]\nkind = \"vibes\"\nvalue = \"x\"\n+++\n## Steps\n- x\n";
        let err = parse(text).unwrap_err();
        assert!(matches!(err, ParseError::Frontmatter(_)));
    }

    #[test]
    fn rejects_unknown_frontmatter_keys() {
        let text = "+++\nid = \"J\"\ntitel = \"T\"\ntitle = \"T\"\nactor = \"a\"\n+++\n## Steps\n- x\n";
        assert!(matches!(parse(text).unwrap_err(), ParseError::Frontmatter(_)));
    }

    #[test]
    fn rejects_journey_without_steps() {
        let text = "+++\nid = \"J\"\ntitle = \"T\"\nactor = \"a\"\n+++\n## Notes\n- nothing\n";
        assert!(matches!(parse(text).unwrap_err(), ParseError::NoSteps(id) if id == "J"));
    }

    #[test]
    fn discovers_journeys_sorted() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("auth")).unwrap();
        fs::write(dir.path().join("b.journey.md"), LOGIN).unwrap();
        fs::write(dir.path().join("auth/a.journey.md"), LOGIN).unwrap();
        fs::write(dir.path().join("README.md"), "not a journey").unwrap();

        let found = discover(dir.path());
        let names: Vec<String> = found
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().display().to_string())
            .collect();
        assert_eq!(names, ["auth/a.journey.md", "b.journey.md"]);
    }

    #[test]
    fn discover_missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(discover(&dir.path().join("nope")).is_empty());
    }

    #[test]
    fn parse_file_records_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("login.journey.md");
        fs::write(&path, LOGIN).unwrap();

        let doc = parse_file(&path).unwrap();
        assert_eq!(doc.source.path.as_deref(), Some(path.as_path()));
    }
}
