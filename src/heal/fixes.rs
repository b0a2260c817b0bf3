//! Fix candidates: the bounded set of safe edits for one failure.
//!
//! Each family maps to a pure function over the program. A family that
//! has nothing to change for the failure produces no candidate.

use crate::classify;
use crate::model::{
    AppliedFix, Failure, FailureCategory, FixFamily, IrProgram, IrStep, LocatorSpec,
    LocatorStrategy, Primitive, ValueSpec,
};

/// Whole-test timeout assumed when the program doesn't set one.
pub const DEFAULT_TEST_TIMEOUT_MS: u64 = 30_000;

/// A fix plus the program it produces.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub fix: AppliedFix,
    pub program: IrProgram,
}

/// Families to try for a failure, most targeted first.
pub fn families(failure: &Failure) -> &'static [FixFamily] {
    match failure.category {
        FailureCategory::Selector if classify::is_strict_mode_violation(&failure.message) => {
            &[FixFamily::NarrowSelector, FixFamily::UpgradeSelector]
        }
        FailureCategory::Selector => &[FixFamily::UpgradeSelector, FixFamily::AddExplicitWait],
        FailureCategory::Timing => &[FixFamily::AddExplicitWait, FixFamily::IncreaseTimeout],
        FailureCategory::Navigation => &[FixFamily::IncreaseTimeout],
        FailureCategory::Data => &[FixFamily::IsolateData],
        FailureCategory::Environment | FailureCategory::AppBug | FailureCategory::Unclassified => {
            &[]
        }
    }
}

/// Whether any safe fix exists for this category.
pub fn is_repairable(category: FailureCategory) -> bool {
    !matches!(
        category,
        FailureCategory::Environment | FailureCategory::AppBug | FailureCategory::Unclassified
    )
}

/// The step a failure points at: its attributed step, else the step whose
/// locator the message names, else `focus`.
pub fn target_step(program: &IrProgram, failure: &Failure, focus: Option<&str>) -> Option<String> {
    if let Some(id) = &failure.step_id
        && program.step(id).is_some()
    {
        return Some(id.clone());
    }
    if let Some(named) = &failure.locator {
        let hit = program.all_steps().find(|step| {
            step.primitives()
                .filter_map(Primitive::locator)
                .any(|l| !l.value.is_empty() && named.contains(&l.value))
        });
        if let Some(step) = hit {
            return Some(step.id.clone());
        }
    }
    focus
        .filter(|id| program.step(id).is_some())
        .map(str::to_string)
}

/// Every applicable candidate, in family order.
pub fn candidates(
    program: &IrProgram,
    failure: &Failure,
    focus: Option<&str>,
    max_timeout_ms: u64,
) -> Vec<Candidate> {
    let target = target_step(program, failure, focus);
    families(failure)
        .iter()
        .filter_map(|&family| apply(family, program, target.as_deref(), max_timeout_ms))
        .collect()
}

/// Apply one family, or `None` if it changes nothing.
pub fn apply(
    family: FixFamily,
    program: &IrProgram,
    target: Option<&str>,
    max_timeout_ms: u64,
) -> Option<Candidate> {
    let mut program = program.clone();
    let (target, detail) = match family {
        FixFamily::IncreaseTimeout => {
            let detail = increase_timeout(&mut program, max_timeout_ms)?;
            ("program".to_string(), detail)
        }
        FixFamily::IsolateData => match target {
            Some(id) => {
                let detail = isolate_data(program.step_mut(id)?)?;
                (id.to_string(), detail)
            }
            None => {
                let mut changed = Vec::new();
                for step in program.all_steps_mut() {
                    if let Some(detail) = isolate_data(step) {
                        changed.push(detail);
                    }
                }
                if changed.is_empty() {
                    return None;
                }
                ("program".to_string(), changed.join("; "))
            }
        },
        _ => {
            let id = target?;
            let step = program.step_mut(id)?;
            let detail = match family {
                FixFamily::UpgradeSelector => upgrade_selector(step)?,
                FixFamily::AddExplicitWait => add_explicit_wait(step)?,
                FixFamily::NarrowSelector => narrow_selector(step)?,
                FixFamily::IsolateData | FixFamily::IncreaseTimeout => return None,
            };
            (id.to_string(), detail)
        }
    };
    Some(Candidate {
        fix: AppliedFix {
            family,
            target,
            detail,
        },
        program,
    })
}

// ── Families ──

fn upgrade_selector(step: &mut IrStep) -> Option<String> {
    for primitive in step.primitives_mut() {
        let is_click = matches!(primitive, Primitive::Click { .. });
        let is_form_control = matches!(
            primitive,
            Primitive::Fill { .. }
                | Primitive::Select { .. }
                | Primitive::Check { .. }
                | Primitive::Upload { .. }
        );
        let Some(locator) = primitive.locator_mut() else {
            continue;
        };
        let Some(upgraded) = upgraded(locator, is_click, is_form_control) else {
            continue;
        };
        let detail = format!("{locator} -> {upgraded}");
        *locator = upgraded;
        return Some(detail);
    }
    None
}

/// A more robust locator for the same element, keeping its options.
fn upgraded(locator: &LocatorSpec, is_click: bool, is_form_control: bool) -> Option<LocatorSpec> {
    let value = locator.value.trim();
    let mut next = match locator.strategy {
        LocatorStrategy::Text if is_click => LocatorSpec::role("button", value),
        LocatorStrategy::Text | LocatorStrategy::Placeholder if is_form_control => {
            LocatorSpec::label(value)
        }
        LocatorStrategy::Css => LocatorSpec::test_id(css_test_id(value)?),
        _ => return None,
    };
    let name = next.options.name.take();
    next.options = locator.options.clone();
    next.options.name = name.or(next.options.name);
    Some(next)
}

/// The id a css selector pins down: `#id` or `[data-testid=…]`.
fn css_test_id(selector: &str) -> Option<String> {
    if let Some(id) = selector.strip_prefix('#')
        && !id.is_empty()
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Some(id.to_string());
    }
    let inner = selector
        .strip_prefix("[data-testid=")?
        .strip_suffix(']')?
        .trim_matches(|c| c == '"' || c == '\'');
    (!inner.is_empty()).then(|| inner.to_string())
}

fn add_explicit_wait(step: &mut IrStep) -> Option<String> {
    let primitive = step.primitives_mut().find(|p| !p.is_assertion() && p.locator().is_some())?;
    let locator = primitive.locator_mut()?;
    if locator.options.wait_visible {
        return None;
    }
    locator.options.wait_visible = true;
    Some(format!("wait for {locator} to be visible"))
}

fn narrow_selector(step: &mut IrStep) -> Option<String> {
    for primitive in step.primitives_mut() {
        let Some(locator) = primitive.locator_mut() else {
            continue;
        };
        let supports_exact = matches!(
            locator.strategy,
            LocatorStrategy::Text
                | LocatorStrategy::Role
                | LocatorStrategy::Label
                | LocatorStrategy::Placeholder
        );
        if supports_exact && !locator.options.exact {
            locator.options.exact = true;
            return Some(format!("{locator} matched exactly"));
        }
        if !supports_exact && locator.options.nth.is_none() {
            locator.options.nth = Some(0);
            return Some(format!("{locator} narrowed to the first match"));
        }
    }
    None
}

fn isolate_data(step: &mut IrStep) -> Option<String> {
    let mut isolated = Vec::new();
    for primitive in step.primitives_mut() {
        if let Primitive::Fill { value, .. } | Primitive::Select { value, .. } = primitive
            && let ValueSpec::Literal { value: literal } = value
        {
            isolated.push(literal.clone());
            *value = ValueSpec::Generated {
                base: literal.clone(),
            };
        }
    }
    if isolated.is_empty() {
        return None;
    }
    Some(format!("namespaced per run: {}", isolated.join(", ")))
}

fn increase_timeout(program: &mut IrProgram, max_timeout_ms: u64) -> Option<String> {
    let current = program.timeout_ms.unwrap_or(DEFAULT_TEST_TIMEOUT_MS);
    let next = current.saturating_mul(2).min(max_timeout_ms);
    if next <= current {
        return None;
    }
    program.timeout_ms = Some(next);
    Some(format!("test timeout {current}ms -> {next}ms"))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::model::{IrStats, MatchSource, MatchedPrimitive};

    fn step(id: &str, actions: Vec<Primitive>) -> IrStep {
        IrStep {
            id: id.into(),
            description: id.into(),
            actions: actions
                .into_iter()
                .map(|primitive| MatchedPrimitive {
                    primitive,
                    source: MatchSource::Hint,
                })
                .collect(),
            assertions: Vec::new(),
        }
    }

    fn program(steps: Vec<IrStep>) -> IrProgram {
        IrProgram {
            journey_id: "J".into(),
            title: "T".into(),
            tier: "smoke".into(),
            scope: String::new(),
            actor: "a".into(),
            tags: Vec::new(),
            modules: Vec::new(),
            setup: Vec::new(),
            steps,
            cleanup: Vec::new(),
            completion: Vec::new(),
            timeout_ms: None,
            stats: IrStats::default(),
            diagnostics: Vec::new(),
        }
    }

    fn failure(message: &str, step_id: Option<&str>) -> Failure {
        Failure {
            message: message.into(),
            category: classify::classify(message),
            locator: classify::implicated_locator(message),
            line: None,
            step_id: step_id.map(str::to_string),
        }
    }

    fn first_locator(program: &IrProgram) -> &LocatorSpec {
        program.steps[0].primitives().find_map(Primitive::locator).unwrap()
    }

    #[test]
    fn ladder_follows_the_failure() {
        let strict = failure("strict mode violation: getByText('Save') resolved to 2 elements", None);
        assert_eq!(
            families(&strict),
            [FixFamily::NarrowSelector, FixFamily::UpgradeSelector]
        );
        assert_eq!(
            families(&failure("selector not found: #submit", None)),
            [FixFamily::UpgradeSelector, FixFamily::AddExplicitWait]
        );
        assert!(families(&failure("net::ERR_CONNECTION_REFUSED", None)).is_empty());
        assert!(!is_repairable(FailureCategory::AppBug));
    }

    #[test]
    fn target_falls_back_to_the_named_locator() {
        let p = program(vec![
            step("step-1", vec![Primitive::Navigate { url: "/".into() }]),
            step(
                "step-2",
                vec![Primitive::Click {
                    locator: LocatorSpec::css("#submit"),
                }],
            ),
        ]);
        let f = failure("selector not found: #submit", None);
        assert_eq!(target_step(&p, &f, None).as_deref(), Some("step-2"));
        let f = failure("Timeout 30000ms exceeded", Some("step-1"));
        assert_eq!(target_step(&p, &f, None).as_deref(), Some("step-1"));
        let f = failure("Timeout 30000ms exceeded", None);
        assert_eq!(target_step(&p, &f, Some("step-2")).as_deref(), Some("step-2"));
    }

    #[test]
    fn upgrades_css_id_to_test_id() {
        let p = program(vec![step(
            "step-1",
            vec![Primitive::Click {
                locator: LocatorSpec::css("#submit"),
            }],
        )]);
        let c = apply(FixFamily::UpgradeSelector, &p, Some("step-1"), 60_000).unwrap();
        assert_eq!(*first_locator(&c.program), LocatorSpec::test_id("submit"));
        assert_eq!(c.fix.detail, "css=#submit -> test-id=submit");

        // Already the strongest strategy.
        assert!(apply(FixFamily::UpgradeSelector, &c.program, Some("step-1"), 60_000).is_none());
    }

    #[test]
    fn upgrades_clicked_text_to_a_button_role() {
        let p = program(vec![step(
            "step-1",
            vec![Primitive::Click {
                locator: LocatorSpec::text("Save"),
            }],
        )]);
        let c = apply(FixFamily::UpgradeSelector, &p, Some("step-1"), 60_000).unwrap();
        assert_eq!(*first_locator(&c.program), LocatorSpec::role("button", "Save"));
    }

    #[test]
    fn wait_and_narrow_set_locator_options() {
        let p = program(vec![step(
            "step-1",
            vec![Primitive::Click {
                locator: LocatorSpec::text("Save"),
            }],
        )]);
        let waited = apply(FixFamily::AddExplicitWait, &p, Some("step-1"), 60_000).unwrap();
        assert!(first_locator(&waited.program).options.wait_visible);
        assert!(apply(FixFamily::AddExplicitWait, &waited.program, Some("step-1"), 60_000).is_none());

        let narrowed = apply(FixFamily::NarrowSelector, &p, Some("step-1"), 60_000).unwrap();
        assert!(first_locator(&narrowed.program).options.exact);

        let css = program(vec![step(
            "step-1",
            vec![Primitive::Click {
                locator: LocatorSpec::css(".row button"),
            }],
        )]);
        let narrowed = apply(FixFamily::NarrowSelector, &css, Some("step-1"), 60_000).unwrap();
        assert_eq!(first_locator(&narrowed.program).options.nth, Some(0));
    }

    #[test]
    fn isolates_literal_values() {
        let p = program(vec![step(
            "step-1",
            vec![Primitive::Fill {
                locator: LocatorSpec::label("Name"),
                value: ValueSpec::literal("Acme"),
            }],
        )]);
        let c = apply(FixFamily::IsolateData, &p, None, 60_000).unwrap();
        assert_eq!(c.fix.target, "program");
        let Primitive::Fill { value, .. } = &c.program.steps[0].actions[0].primitive else {
            panic!("expected fill");
        };
        assert_eq!(*value, ValueSpec::Generated { base: "Acme".into() });
        assert!(apply(FixFamily::IsolateData, &c.program, None, 60_000).is_none());
    }

    #[test]
    fn timeout_doubles_up_to_the_ceiling() {
        let p = program(Vec::new());
        let c = apply(FixFamily::IncreaseTimeout, &p, None, 45_000).unwrap();
        assert_eq!(c.program.timeout_ms, Some(45_000));
        assert!(apply(FixFamily::IncreaseTimeout, &c.program, None, 45_000).is_none());
    }
}
