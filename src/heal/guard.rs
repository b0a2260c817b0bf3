//! Semantic-contract guard.
//!
//! A healed program may change how elements are found and how long to
//! wait for them. It may not change what the test does or what it
//! checks: same steps, same primitive kinds in the same order, same
//! expectations.

use crate::model::{IrProgram, IrStep, MatchedPrimitive, Primitive, ValueSpec};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuardViolation {
    #[error("step list changed")]
    StepsChanged,

    #[error("{step}: primitive {index} changed from {before} to {after}")]
    PrimitiveChanged {
        step: String,
        index: usize,
        before: String,
        after: String,
    },

    #[error("{step}: primitive count changed from {before} to {after}")]
    CountChanged {
        step: String,
        before: usize,
        after: usize,
    },
}

/// What a primitive does, minus how it finds its element.
fn contract(primitive: &Primitive) -> String {
    let kind = primitive.kind();
    match primitive {
        Primitive::Navigate { url }
        | Primitive::WaitForUrl { url, .. }
        | Primitive::WaitForResponse { url, .. }
        | Primitive::ExpectUrl { url, .. } => format!("{kind}({url})"),
        Primitive::Fill { value, .. } | Primitive::Select { value, .. } => {
            format!("{kind}({})", value_contract(value))
        }
        Primitive::Check { checked, .. } => format!("{kind}({checked})"),
        Primitive::Upload { file, .. } => format!("{kind}({file})"),
        Primitive::PressKey { key, .. } => format!("{kind}({key})"),
        Primitive::ExpectText { text, .. } => format!("{kind}({text})"),
        Primitive::ExpectValue { value, .. } => format!("{kind}({value})"),
        Primitive::ExpectTitle { title } => format!("{kind}({title})"),
        Primitive::InvokeModule { module } => format!("{kind}({module})"),
        Primitive::Blocked {
            reason,
            source_text,
            ..
        } => format!("{kind}({reason}|{source_text})"),
        Primitive::Click { .. }
        | Primitive::Hover { .. }
        | Primitive::ExpectVisible { .. }
        | Primitive::ExpectNotVisible { .. } => kind.to_string(),
    }
}

/// Namespacing a literal per run keeps its meaning.
fn value_contract(value: &ValueSpec) -> String {
    match value {
        ValueSpec::Literal { value } => value.clone(),
        ValueSpec::Generated { base } => base.clone(),
        ValueSpec::Contextual { key } => format!("${key}"),
    }
}

fn check_list(
    step: &str,
    before: &[MatchedPrimitive],
    after: &[MatchedPrimitive],
) -> Result<(), GuardViolation> {
    if before.len() != after.len() {
        return Err(GuardViolation::CountChanged {
            step: step.to_string(),
            before: before.len(),
            after: after.len(),
        });
    }
    for (index, (b, a)) in before.iter().zip(after).enumerate() {
        let (before, after) = (contract(&b.primitive), contract(&a.primitive));
        if before != after {
            return Err(GuardViolation::PrimitiveChanged {
                step: step.to_string(),
                index,
                before,
                after,
            });
        }
    }
    Ok(())
}

fn check_step(before: &IrStep, after: &IrStep) -> Result<(), GuardViolation> {
    if before.id != after.id {
        return Err(GuardViolation::StepsChanged);
    }
    check_list(&before.id, &before.actions, &after.actions)?;
    check_list(&before.id, &before.assertions, &after.assertions)
}

/// Reject `candidate` if it departs from `original`'s contract.
pub fn check(original: &IrProgram, candidate: &IrProgram) -> Result<(), GuardViolation> {
    let before: Vec<&IrStep> = original.all_steps().collect();
    let after: Vec<&IrStep> = candidate.all_steps().collect();
    if before.len() != after.len() {
        return Err(GuardViolation::StepsChanged);
    }
    for (b, a) in before.into_iter().zip(after) {
        check_step(b, a)?;
    }
    check_list("completion", &original.completion, &candidate.completion)
}
