//! IR construction.
//!
//! A pure function of a Journey and a matcher: the same inputs always
//! give the same program, and the Journey is never touched.

use crate::matcher::{Matcher, strip_hint};
use crate::model::{
    CompletionKind, CompletionSignal, IrProgram, IrStats, IrStep, JourneyDocument, LocatorSpec,
    MatchSource, MatchedPrimitive, Primitive, Step,
};

/// Build the program for one Journey.
pub fn build(doc: &JourneyDocument, matcher: &Matcher<'_>) -> IrProgram {
    let mut stats = IrStats::default();
    let mut diagnostics = Vec::new();

    let mut lower = |steps: &[Step]| -> Vec<IrStep> {
        steps
            .iter()
            .map(|step| build_step(step, matcher, &mut stats, &mut diagnostics))
            .collect()
    };
    let setup = lower(&doc.setup);
    let steps = lower(&doc.steps);
    let cleanup = lower(&doc.cleanup);

    let completion: Vec<MatchedPrimitive> = doc
        .completion
        .iter()
        .map(|signal| MatchedPrimitive {
            primitive: completion_primitive(signal),
            source: MatchSource::Completion,
        })
        .collect();
    stats.completion = completion.len();

    IrProgram {
        journey_id: doc.id.clone(),
        title: doc.title.clone(),
        tier: doc.tier.clone(),
        scope: doc.scope.clone(),
        actor: doc.actor.clone(),
        tags: doc.tags.clone(),
        modules: doc.modules.clone(),
        setup,
        steps,
        cleanup,
        completion,
        timeout_ms: None,
        stats,
        diagnostics,
    }
}

fn build_step(
    step: &Step,
    matcher: &Matcher<'_>,
    stats: &mut IrStats,
    diagnostics: &mut Vec<String>,
) -> IrStep {
    let mut actions = Vec::new();
    let mut assertions = Vec::new();

    for instruction in &step.instructions {
        let resolution = matcher.resolve(instruction);
        stats.instructions += 1;

        let matched = resolution.matched;
        if matched.primitive.is_blocked() {
            stats.blocked += 1;
        } else {
            stats.mapped += 1;
        }
        if matched
            .primitive
            .locator()
            .is_some_and(LocatorSpec::is_selector_debt)
        {
            stats.selector_debt += 1;
        }
        if matches!(
            matched.source,
            MatchSource::Knowledge { .. } | MatchSource::Glossary { .. }
        ) {
            stats.knowledge_sourced += 1;
        }
        diagnostics.extend(
            resolution
                .diagnostics
                .into_iter()
                .map(|d| format!("{}: {d}", step.id)),
        );

        if matched.primitive.is_assertion() {
            assertions.push(matched);
        } else {
            actions.push(matched);
        }
    }

    IrStep {
        id: step.id.clone(),
        description: strip_hint(&step.description),
        actions,
        assertions,
    }
}

fn completion_primitive(signal: &CompletionSignal) -> Primitive {
    let value = signal.value.clone();
    match signal.kind {
        CompletionKind::UrlMatch => Primitive::ExpectUrl {
            url: value,
            timeout_ms: None,
        },
        CompletionKind::VisibleText => Primitive::ExpectVisible {
            locator: LocatorSpec::text(value),
        },
        CompletionKind::HiddenText => Primitive::ExpectNotVisible {
            locator: LocatorSpec::text(value),
        },
        CompletionKind::Title => Primitive::ExpectTitle { title: value },
        CompletionKind::Toast => Primitive::ExpectVisible {
            locator: LocatorSpec::role("alert", value),
        },
    }
}
