//! Instruction → primitive resolution.
//!
//! Each instruction resolves in strict priority order, stopping at the
//! first success:
//!
//! 1. an inline `@wm(...)` hint
//! 2. the built-in pattern table
//! 3. the knowledge-base snapshot (learned patterns, then glossary)
//! 4. a `blocked` primitive naming why
//!
//! Resolution never fails: an instruction that cannot be mapped becomes a
//! blocked primitive, so no step is dropped.

mod builtin;
mod hint;
mod knowledge;
mod locator;
mod normalize;

pub use builtin::BUILTIN_TABLE_VERSION;
pub use knowledge::{ConfidencePolicy, KnowledgeBase, KnowledgeError, PolicyKind};
#[cfg(test)]
pub use knowledge::RawConfidence;
use normalize::normalize;

use crate::model::{MatchSource, MatchedPrimitive, Primitive, Suggestion, ValueSpec};

use knowledge::CandidateKind;

/// KB matches below this are suggestions, never applied.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;

/// An authored value. `$key` (a letter or `_`, then letters, digits, `_`,
/// `.`) reads from the test context; anything else is typed literally.
pub fn value_spec(raw: &str) -> ValueSpec {
    if let Some(key) = raw.strip_prefix('$')
        && key.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
    {
        return ValueSpec::Contextual {
            key: key.to_string(),
        };
    }
    ValueSpec::literal(raw)
}

/// The instruction without its inline hint, for use as a description.
pub fn strip_hint(text: &str) -> String {
    match hint::extract(text) {
        Some((_, remainder)) if !remainder.is_empty() => remainder,
        _ => text.trim().to_string(),
    }
}

/// One resolved instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub matched: MatchedPrimitive,
    pub diagnostics: Vec<String>,
}

/// Resolves instructions against the built-in table and a KB snapshot.
pub struct Matcher<'k> {
    knowledge: &'k KnowledgeBase,
    policy: &'k dyn ConfidencePolicy,
    threshold: f64,
}

impl<'k> Matcher<'k> {
    pub fn new(
        knowledge: &'k KnowledgeBase,
        policy: &'k dyn ConfidencePolicy,
        threshold: f64,
    ) -> Self {
        Self {
            knowledge,
            policy,
            threshold,
        }
    }

    pub fn knowledge(&self) -> &KnowledgeBase {
        self.knowledge
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn resolve(&self, instruction: &str) -> Resolution {
        if let Some((parsed, _)) = hint::extract(instruction) {
            let matched = match parsed.and_then(|h| h.to_primitive()) {
                Ok(primitive) => MatchedPrimitive {
                    primitive,
                    source: MatchSource::Hint,
                },
                Err(e) => unmatched(Primitive::blocked(
                    format!("invalid inline hint: {e}"),
                    instruction.trim(),
                )),
            };
            return finish(matched, instruction, Vec::new());
        }

        let text = normalize(instruction);
        if text.collapsed.is_empty() {
            return finish(
                unmatched(Primitive::blocked("empty instruction", "")),
                instruction,
                Vec::new(),
            );
        }

        if let Some((pattern_id, mut primitive)) = builtin::lookup(&text.collapsed) {
            let locator_override = self.apply_override(&mut primitive);
            let matched = MatchedPrimitive {
                primitive,
                source: MatchSource::Builtin {
                    pattern_id: pattern_id.to_string(),
                    locator_override,
                },
            };
            return finish(matched, &text.collapsed, Vec::new());
        }

        let lookup = self.knowledge.lookup(&text, self.policy);
        let diagnostics = lookup.diagnostics;

        if let Some(best) = lookup
            .candidates
            .iter()
            .find(|c| c.confidence >= self.threshold)
        {
            let source = match &best.kind {
                CandidateKind::Pattern => MatchSource::Knowledge {
                    pattern_id: best.id.clone(),
                    confidence: best.confidence,
                },
                CandidateKind::Glossary { term } => MatchSource::Glossary { term: term.clone() },
            };
            let matched = MatchedPrimitive {
                primitive: best.primitive.clone(),
                source,
            };
            return finish(matched, &text.collapsed, diagnostics);
        }

        if let Some(best) = lookup
            .candidates
            .iter()
            .map(|c| c.confidence)
            .max_by(f64::total_cmp)
        {
            let reason = format!(
                "knowledge-base match below confidence threshold ({best:.2} < {:.2}): '{}'",
                self.threshold, text.collapsed
            );
            let suggestions = lookup
                .candidates
                .into_iter()
                .map(|c| Suggestion {
                    pattern_id: c.id,
                    confidence: c.confidence,
                    primitive: Box::new(c.primitive),
                })
                .collect();
            let primitive = Primitive::Blocked {
                reason,
                source_text: text.collapsed.clone(),
                suggestions,
            };
            return finish(unmatched(primitive), &text.collapsed, diagnostics);
        }

        let reason = format!("no pattern matched: '{}'", text.collapsed);
        finish(
            unmatched(Primitive::blocked(reason, text.collapsed.clone())),
            &text.collapsed,
            diagnostics,
        )
    }

    /// Swap in a KB locator when it outranks the built-in one.
    /// Returns the override id when applied.
    fn apply_override(&self, primitive: &mut Primitive) -> Option<String> {
        let current = primitive.locator()?.clone();
        let over = self
            .knowledge
            .locator_override(locator::authored_target(&current)?)?;
        if over.confidence < self.threshold {
            return None;
        }
        let chosen = locator::choose(vec![current.clone(), over.locator.clone()])?;
        if chosen == current {
            return None;
        }
        let id = over.id.clone();
        *primitive.locator_mut()? = chosen;
        Some(id)
    }
}

fn unmatched(primitive: Primitive) -> MatchedPrimitive {
    MatchedPrimitive {
        primitive,
        source: MatchSource::Unmatched,
    }
}

fn finish(matched: MatchedPrimitive, text: &str, mut diagnostics: Vec<String>) -> Resolution {
    if let Some(locator) = matched.primitive.locator()
        && locator.is_selector_debt()
    {
        diagnostics.push(format!(
            "selector debt: raw css locator '{}' in '{}'",
            locator.value,
            text.trim()
        ));
    }
    Resolution {
        matched,
        diagnostics,
    }
}
