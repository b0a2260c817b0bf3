//! The knowledge-base snapshot, as the matcher sees it.
//!
//! Loaded once per run from the JSON export, validated, and never
//! reloaded. Invalid entries are skipped with a diagnostic rather than
//! failing the whole load.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{
    GlossaryEntry, KnowledgeExport, LearnedPattern, LocatorOverride, PatternOutcome, Primitive,
};

use super::normalize::{Normalized, normalize};

#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    #[error("failed to read knowledge base {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("invalid knowledge base {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

// ── Confidence policy ──

/// Turns a pattern's exported confidence into the one used for ranking.
pub trait ConfidencePolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn effective(&self, pattern: &LearnedPattern) -> f64;
}

/// The knowledge base's confidence, as exported.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawConfidence;

impl ConfidencePolicy for RawConfidence {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn effective(&self, pattern: &LearnedPattern) -> f64 {
        pattern.confidence
    }
}

/// Raw confidence averaged with a success rate that weights recent
/// outcomes more. The newest outcome has weight 1, the one before it
/// `decay`, then `decay²`, and so on.
#[derive(Debug, Clone, Copy)]
pub struct RecencyWeighted {
    pub decay: f64,
}

impl Default for RecencyWeighted {
    fn default() -> Self {
        Self { decay: 0.8 }
    }
}

impl ConfidencePolicy for RecencyWeighted {
    fn name(&self) -> &'static str {
        "recency-weighted"
    }

    fn effective(&self, pattern: &LearnedPattern) -> f64 {
        if pattern.outcomes.is_empty() {
            return pattern.confidence;
        }
        let mut weight = 1.0;
        let mut total = 0.0;
        let mut successes = 0.0;
        for outcome in pattern.outcomes.iter().rev() {
            total += weight;
            if *outcome == PatternOutcome::Success {
                successes += weight;
            }
            weight *= self.decay;
        }
        let rate = successes / total;
        f64::midpoint(pattern.confidence, rate).clamp(0.0, 1.0)
    }
}

/// Which confidence policy to use, as named in config.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    #[default]
    Raw,
    RecencyWeighted,
}

impl PolicyKind {
    pub fn policy(self) -> Box<dyn ConfidencePolicy> {
        match self {
            Self::Raw => Box::new(RawConfidence),
            Self::RecencyWeighted => Box::new(RecencyWeighted::default()),
        }
    }
}

// ── Snapshot ──

enum Trigger {
    /// Compared against the folded instruction.
    Exact(String),

    /// A trigger with `{name}` placeholders, matched case-insensitively
    /// against the collapsed instruction so captures keep their case.
    Template(Regex),
}

struct CompiledPattern {
    pattern: LearnedPattern,
    trigger: Trigger,
}

/// A candidate match from the knowledge base.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: String,
    pub confidence: f64,
    pub primitive: Primitive,
    pub kind: CandidateKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateKind {
    Pattern,
    Glossary { term: String },
}

/// Result of looking an instruction up in the snapshot.
#[derive(Debug, Default)]
pub struct Lookup {
    /// Best first.
    pub candidates: Vec<Candidate>,

    pub diagnostics: Vec<String>,
}

/// A validated, immutable knowledge-base snapshot.
#[derive(Default)]
pub struct KnowledgeBase {
    version: String,
    patterns: Vec<CompiledPattern>,
    glossary: Vec<(Vec<String>, GlossaryEntry)>,
    locators: Vec<LocatorOverride>,
    diagnostics: Vec<String>,
}

impl KnowledgeBase {
    /// An empty snapshot: every lookup misses.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load the export at `path`. A missing file is an empty snapshot.
    pub fn load(path: &Path) -> Result<Self, KnowledgeError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no knowledge base export; matching with built-ins only");
                return Ok(Self::empty());
            }
            Err(source) => {
                return Err(KnowledgeError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let export: KnowledgeExport =
            serde_json::from_str(&text).map_err(|source| KnowledgeError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::from_export(export))
    }

    /// Validate an export. Entries that fail validation are dropped and
    /// reported in [`KnowledgeBase::diagnostics`].
    pub fn from_export(export: KnowledgeExport) -> Self {
        let mut diagnostics = Vec::new();
        let mut seen = HashSet::new();
        let mut patterns = Vec::new();

        for pattern in export.patterns {
            if let Err(problem) = check_pattern(&pattern, &seen) {
                diagnostics.push(format!("knowledge pattern '{}' skipped: {problem}", pattern.id));
                continue;
            }
            match compile_trigger(&pattern.trigger) {
                Ok(trigger) => {
                    seen.insert(pattern.id.clone());
                    patterns.push(CompiledPattern { pattern, trigger });
                }
                Err(problem) => diagnostics.push(format!(
                    "knowledge pattern '{}' skipped: {problem}",
                    pattern.id
                )),
            }
        }

        let mut glossary = Vec::new();
        for entry in export.glossary {
            if entry.term.trim().is_empty() || entry.module.trim().is_empty() {
                diagnostics.push(format!(
                    "glossary entry '{}' skipped: term and module are required",
                    entry.term
                ));
                continue;
            }
            if let Some(c) = entry.confidence
                && !in_unit_range(c)
            {
                diagnostics.push(format!(
                    "glossary entry '{}' skipped: confidence {c} outside [0, 1]",
                    entry.term
                ));
                continue;
            }
            let keys: Vec<String> = std::iter::once(&entry.term)
                .chain(&entry.synonyms)
                .map(|t| normalize(t).folded)
                .filter(|t| !t.is_empty())
                .collect();
            glossary.push((keys, entry));
        }

        let mut locators = Vec::new();
        for over in export.locators {
            if over.target.trim().is_empty() || !in_unit_range(over.confidence) {
                diagnostics.push(format!(
                    "locator override '{}' skipped: empty target or confidence outside [0, 1]",
                    over.id
                ));
                continue;
            }
            locators.push(over);
        }

        Self {
            version: export.version,
            patterns,
            glossary,
            locators,
            diagnostics,
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Problems found while validating the export.
    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty() && self.glossary.is_empty() && self.locators.is_empty()
    }

    /// Every candidate for an instruction, best first: learned patterns by
    /// effective confidence (ties by id), then glossary terms.
    /// Quarantined patterns are never candidates.
    pub fn lookup(&self, text: &Normalized, policy: &dyn ConfidencePolicy) -> Lookup {
        let mut lookup = Lookup::default();

        let mut learned = Vec::new();
        for compiled in &self.patterns {
            let Some(primitive) = instantiate(compiled, text) else {
                continue;
            };
            let pattern = &compiled.pattern;
            if pattern.is_quarantined() {
                lookup.diagnostics.push(format!(
                    "knowledge pattern '{}' is quarantined; not used for '{}'",
                    pattern.id, text.collapsed
                ));
                continue;
            }
            learned.push(Candidate {
                id: pattern.id.clone(),
                confidence: policy.effective(pattern),
                primitive,
                kind: CandidateKind::Pattern,
            });
        }
        learned.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.id.cmp(&b.id))
        });
        lookup.candidates = learned;

        for (keys, entry) in &self.glossary {
            if keys.iter().any(|k| *k == text.folded) {
                lookup.candidates.push(Candidate {
                    id: format!("glossary:{}", entry.term),
                    confidence: entry.confidence.unwrap_or(1.0),
                    primitive: Primitive::InvokeModule {
                        module: entry.module.clone(),
                    },
                    kind: CandidateKind::Glossary {
                        term: entry.term.clone(),
                    },
                });
            }
        }

        lookup
    }

    /// The override for an element named `target`, if one is known.
    pub fn locator_override(&self, target: &str) -> Option<&LocatorOverride> {
        let folded = normalize(target).folded;
        self.locators
            .iter()
            .filter(|o| normalize(&o.target).folded == folded)
            .max_by(|a, b| {
                a.confidence
                    .total_cmp(&b.confidence)
                    .then_with(|| b.id.cmp(&a.id))
            })
    }
}

fn in_unit_range(value: f64) -> bool {
    (0.0..=1.0).contains(&value)
}

fn check_pattern(pattern: &LearnedPattern, seen: &HashSet<String>) -> Result<(), String> {
    if pattern.id.trim().is_empty() {
        return Err("empty id".to_string());
    }
    if seen.contains(&pattern.id) {
        return Err("duplicate id".to_string());
    }
    if pattern.trigger.trim().is_empty() {
        return Err("empty trigger".to_string());
    }
    if !in_unit_range(pattern.confidence) {
        return Err(format!("confidence {} outside [0, 1]", pattern.confidence));
    }
    Ok(())
}

/// Compile a trigger. `{name}` placeholders become lazy captures.
fn compile_trigger(trigger: &str) -> Result<Trigger, String> {
    let folded = normalize(trigger).folded;
    if !folded.contains('{') {
        return Ok(Trigger::Exact(folded));
    }

    let mut pattern = String::from("(?i)^");
    let mut rest = folded.as_str();
    while let Some(open) = rest.find('{') {
        pattern.push_str(&regex::escape(&rest[..open]));
        let Some(close) = rest[open..].find('}') else {
            return Err("unclosed '{' in trigger".to_string());
        };
        let name = &rest[open + 1..open + close];
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(format!("invalid placeholder '{{{name}}}'"));
        }
        pattern.push_str(&format!("(?P<{name}>.+?)"));
        rest = &rest[open + close + 1..];
    }
    pattern.push_str(&regex::escape(rest));
    pattern.push('$');

    Regex::new(&pattern)
        .map(Trigger::Template)
        .map_err(|e| format!("invalid trigger: {e}"))
}

/// The pattern's primitive for this instruction, or `None` if the trigger misses.
fn instantiate(compiled: &CompiledPattern, text: &Normalized) -> Option<Primitive> {
    let mut primitive = match &compiled.trigger {
        Trigger::Exact(trigger) => (*trigger == text.folded).then(|| compiled.pattern.template.clone())?,
        Trigger::Template(regex) => {
            let caps = regex.captures(&text.collapsed)?;
            let mut value = serde_json::to_value(&compiled.pattern.template).ok()?;
            substitute(&mut value, &|name: &str| {
                caps.name(name).map(|m| m.as_str().trim().to_string())
            });
            match serde_json::from_value(value) {
                Ok(p) => p,
                Err(e) => {
                    debug!(pattern = %compiled.pattern.id, error = %e, "template did not survive substitution");
                    return None;
                }
            }
        }
    };

    if let Some(hint) = compiled.pattern.timing_hint_ms
        && let Some(slot) = primitive.timeout_mut()
        && slot.is_none()
    {
        *slot = Some(hint);
    }
    Some(primitive)
}

/// Replace `{name}` in every string of a JSON value.
fn substitute(value: &mut serde_json::Value, lookup: &dyn Fn(&str) -> Option<String>) {
    match value {
        serde_json::Value::String(s) => {
            if !s.contains('{') {
                return;
            }
            let mut out = String::with_capacity(s.len());
            let mut rest = s.as_str();
            while let Some(open) = rest.find('{') {
                out.push_str(&rest[..open]);
                match rest[open..].find('}') {
                    Some(close) => {
                        let name = &rest[open + 1..open + close];
                        match lookup(name) {
                            Some(v) => out.push_str(&v),
                            None => out.push_str(&rest[open..=open + close]),
                        }
                        rest = &rest[open + close + 1..];
                    }
                    None => {
                        out.push_str(&rest[open..]);
                        rest = "";
                    }
                }
            }
            out.push_str(rest);
            *s = out;
        }
        serde_json::Value::Array(items) => {
            for item in items {
                substitute(item, lookup);
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values_mut() {
                substitute(item, lookup);
            }
        }
        _ => {}
    }
}
