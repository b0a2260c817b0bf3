//! Locator-strategy priority.
//!
//! test-id > role+name > label > placeholder > visible text >
//! `[data-…]` css > structural css.

use crate::model::{LocatorSpec, LocatorStrategy};

/// Rank of a locator; lower is better.
pub fn rank(spec: &LocatorSpec) -> u8 {
    match spec.strategy {
        LocatorStrategy::TestId => 0,
        LocatorStrategy::Role => 1,
        LocatorStrategy::Label => 2,
        LocatorStrategy::Placeholder => 3,
        LocatorStrategy::Text => 4,
        LocatorStrategy::Css if spec.is_data_attribute() => 5,
        LocatorStrategy::Css => 6,
    }
}

/// The best-ranked candidate. Earlier candidates win ties.
pub fn choose(candidates: Vec<LocatorSpec>) -> Option<LocatorSpec> {
    let mut best: Option<LocatorSpec> = None;
    for candidate in candidates {
        match &best {
            Some(current) if rank(current) <= rank(&candidate) => {}
            _ => best = Some(candidate),
        }
    }
    best
}

/// The element text an author used to name a locator: the role's name,
/// or the value for the text-like strategies.
pub fn authored_target(spec: &LocatorSpec) -> Option<&str> {
    match spec.strategy {
        LocatorStrategy::Role => spec.options.name.as_deref(),
        LocatorStrategy::Label | LocatorStrategy::Placeholder | LocatorStrategy::Text => {
            Some(&spec.value)
        }
        LocatorStrategy::TestId | LocatorStrategy::Css => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_by_priority_not_position() {
        let chosen = choose(vec![
            LocatorSpec::css("form > button"),
            LocatorSpec::text("Save"),
            LocatorSpec::role("button", "Save"),
            LocatorSpec::css("[data-qa=save]"),
        ])
        .unwrap();
        assert_eq!(chosen, LocatorSpec::role("button", "Save"));
    }

    #[test]
    fn data_attribute_beats_structural_css() {
        let chosen = choose(vec![
            LocatorSpec::css("div.actions > button"),
            LocatorSpec::css("[data-qa=save]"),
        ])
        .unwrap();
        assert_eq!(chosen.value, "[data-qa=save]");
    }

    #[test]
    fn ties_keep_the_first() {
        let chosen = choose(vec![LocatorSpec::label("Email"), LocatorSpec::label("E-mail")]).unwrap();
        assert_eq!(chosen.value, "Email");
    }

    #[test]
    fn empty_is_none() {
        assert!(choose(Vec::new()).is_none());
    }

    #[test]
    fn authored_target_reads_role_name() {
        assert_eq!(authored_target(&LocatorSpec::role("link", "Docs")), Some("Docs"));
        assert_eq!(authored_target(&LocatorSpec::test_id("docs")), None);
    }
}
