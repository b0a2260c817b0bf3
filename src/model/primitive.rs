//! IR primitives: the typed operations a Journey compiles into.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How an element is located on the page.
///
/// Declared in priority order: when several strategies are plausible,
/// the earlier one wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LocatorStrategy {
    TestId,
    Role,
    Label,
    Placeholder,
    Text,
    Css,
}

impl LocatorStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TestId => "test-id",
            Self::Role => "role",
            Self::Label => "label",
            Self::Placeholder => "placeholder",
            Self::Text => "text",
            Self::Css => "css",
        }
    }
}

/// Disambiguation and timing options attached to a locator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocatorOptions {
    /// Accessible name, for role locators.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Match the name or text exactly instead of by substring.
    #[serde(default, skip_serializing_if = "is_false")]
    pub exact: bool,

    /// Pick the n-th match when the locator is ambiguous.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nth: Option<u32>,

    /// Wait for the element to become visible before acting on it.
    #[serde(default, skip_serializing_if = "is_false")]
    pub wait_visible: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !*value
}

/// A strategy + value pair identifying a UI element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocatorSpec {
    pub strategy: LocatorStrategy,

    /// Test id, ARIA role, label text, placeholder, visible text, or css selector.
    pub value: String,

    #[serde(default)]
    pub options: LocatorOptions,
}

impl LocatorSpec {
    pub fn new(strategy: LocatorStrategy, value: impl Into<String>) -> Self {
        Self {
            strategy,
            value: value.into(),
            options: LocatorOptions::default(),
        }
    }

    pub fn test_id(value: impl Into<String>) -> Self {
        Self::new(LocatorStrategy::TestId, value)
    }

    pub fn role(role: impl Into<String>, name: impl Into<String>) -> Self {
        let mut spec = Self::new(LocatorStrategy::Role, role);
        spec.options.name = Some(name.into());
        spec
    }

    pub fn label(value: impl Into<String>) -> Self {
        Self::new(LocatorStrategy::Label, value)
    }

    pub fn placeholder(value: impl Into<String>) -> Self {
        Self::new(LocatorStrategy::Placeholder, value)
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self::new(LocatorStrategy::Text, value)
    }

    pub fn css(value: impl Into<String>) -> Self {
        Self::new(LocatorStrategy::Css, value)
    }

    /// A css selector that targets a generic `data-*` attribute.
    pub fn is_data_attribute(&self) -> bool {
        self.strategy == LocatorStrategy::Css && self.value.trim_start().starts_with("[data-")
    }

    /// A raw structural selector: works, but breaks with markup changes.
    pub fn is_selector_debt(&self) -> bool {
        self.strategy == LocatorStrategy::Css && !self.is_data_attribute()
    }
}

impl fmt::Display for LocatorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.strategy, &self.options.name) {
            (LocatorStrategy::Role, Some(name)) => write!(f, "role={}[name={name}]", self.value),
            (strategy, _) => write!(f, "{}={}", strategy.as_str(), self.value),
        }
    }
}

/// Where a typed value comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ValueSpec {
    /// Typed exactly as authored.
    Literal { value: String },

    /// The authored value namespaced per run, so parallel runs don't collide.
    Generated { base: String },

    /// Read from the test context by key (e.g. the actor's credentials).
    Contextual { key: String },
}

impl ValueSpec {
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal {
            value: value.into(),
        }
    }
}

/// A low-confidence knowledge-base match attached to a blocked step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub pattern_id: String,
    pub confidence: f64,
    pub primitive: Box<Primitive>,
}

/// One typed IR operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Primitive {
    Navigate {
        url: String,
    },
    Click {
        locator: LocatorSpec,
    },
    Fill {
        locator: LocatorSpec,
        value: ValueSpec,
    },
    Select {
        locator: LocatorSpec,
        value: ValueSpec,
    },

    /// Check or uncheck a checkbox.
    Check {
        locator: LocatorSpec,
        checked: bool,
    },
    Upload {
        locator: LocatorSpec,
        file: String,
    },

    /// Press a key, on an element or on the page.
    PressKey {
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        locator: Option<LocatorSpec>,
    },
    Hover {
        locator: LocatorSpec,
    },
    WaitForUrl {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    WaitForResponse {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    ExpectVisible {
        locator: LocatorSpec,
    },
    ExpectNotVisible {
        locator: LocatorSpec,
    },
    ExpectText {
        locator: LocatorSpec,
        text: String,
    },
    ExpectValue {
        locator: LocatorSpec,
        value: String,
    },
    ExpectUrl {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    ExpectTitle {
        title: String,
    },

    /// Call a reusable module by name.
    InvokeModule {
        module: String,
    },

    /// An instruction that could not be mapped.
    ///
    /// Rendered as an explicit failing assertion, never skipped.
    Blocked {
        reason: String,
        source_text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        suggestions: Vec<Suggestion>,
    },
}

impl Primitive {
    /// Builds a blocked primitive. An empty reason is replaced, never kept.
    pub fn blocked(reason: impl Into<String>, source_text: impl Into<String>) -> Self {
        let source_text = source_text.into();
        let mut reason = reason.into();
        if reason.trim().is_empty() {
            reason = format!("no pattern matched: '{source_text}'");
        }
        Self::Blocked {
            reason,
            source_text,
            suggestions: Vec::new(),
        }
    }

    /// The kebab-case kind name, matching the serialized `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Navigate { .. } => "navigate",
            Self::Click { .. } => "click",
            Self::Fill { .. } => "fill",
            Self::Select { .. } => "select",
            Self::Check { .. } => "check",
            Self::Upload { .. } => "upload",
            Self::PressKey { .. } => "press-key",
            Self::Hover { .. } => "hover",
            Self::WaitForUrl { .. } => "wait-for-url",
            Self::WaitForResponse { .. } => "wait-for-response",
            Self::ExpectVisible { .. } => "expect-visible",
            Self::ExpectNotVisible { .. } => "expect-not-visible",
            Self::ExpectText { .. } => "expect-text",
            Self::ExpectValue { .. } => "expect-value",
            Self::ExpectUrl { .. } => "expect-url",
            Self::ExpectTitle { .. } => "expect-title",
            Self::InvokeModule { .. } => "invoke-module",
            Self::Blocked { .. } => "blocked",
        }
    }

    pub fn is_assertion(&self) -> bool {
        matches!(
            self,
            Self::ExpectVisible { .. }
                | Self::ExpectNotVisible { .. }
                | Self::ExpectText { .. }
                | Self::ExpectValue { .. }
                | Self::ExpectUrl { .. }
                | Self::ExpectTitle { .. }
        )
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }

    pub fn locator(&self) -> Option<&LocatorSpec> {
        match self {
            Self::Click { locator }
            | Self::Fill { locator, .. }
            | Self::Select { locator, .. }
            | Self::Check { locator, .. }
            | Self::Upload { locator, .. }
            | Self::Hover { locator }
            | Self::ExpectVisible { locator }
            | Self::ExpectNotVisible { locator }
            | Self::ExpectText { locator, .. }
            | Self::ExpectValue { locator, .. } => Some(locator),
            Self::PressKey { locator, .. } => locator.as_ref(),
            _ => None,
        }
    }

    pub fn locator_mut(&mut self) -> Option<&mut LocatorSpec> {
        match self {
            Self::Click { locator }
            | Self::Fill { locator, .. }
            | Self::Select { locator, .. }
            | Self::Check { locator, .. }
            | Self::Upload { locator, .. }
            | Self::Hover { locator }
            | Self::ExpectVisible { locator }
            | Self::ExpectNotVisible { locator }
            | Self::ExpectText { locator, .. }
            | Self::ExpectValue { locator, .. } => Some(locator),
            Self::PressKey { locator, .. } => locator.as_mut(),
            _ => None,
        }
    }

    /// The timeout slot this primitive honours, if any.
    pub fn timeout_mut(&mut self) -> Option<&mut Option<u64>> {
        match self {
            Self::WaitForUrl { timeout_ms, .. }
            | Self::WaitForResponse { timeout_ms, .. }
            | Self::ExpectUrl { timeout_ms, .. } => Some(timeout_ms),
            other => other.locator_mut().map(|l| &mut l.options.timeout_ms),
        }
    }
}

/// Which resolution tier produced a primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum MatchSource {
    /// An inline `@wm(...)` hint.
    Hint,

    /// The built-in pattern table, possibly with a knowledge-base locator override.
    Builtin {
        pattern_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        locator_override: Option<String>,
    },

    /// A learned pattern from the knowledge base.
    Knowledge { pattern_id: String, confidence: f64 },

    /// A glossary term from the knowledge base.
    Glossary { term: String },

    /// A completion signal from the Journey frontmatter.
    Completion,

    /// Nothing matched.
    Unmatched,
}

/// A primitive plus where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedPrimitive {
    pub primitive: Primitive,
    pub source: MatchSource,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_never_has_empty_reason() {
        let Primitive::Blocked { reason, .. } = Primitive::blocked("  ", "do the thing") else {
            panic!("expected blocked");
        };
        assert_eq!(reason, "no pattern matched: 'do the thing'");
    }

    #[test]
    fn strategies_order_by_priority() {
        assert!(LocatorStrategy::TestId < LocatorStrategy::Role);
        assert!(LocatorStrategy::Role < LocatorStrategy::Label);
        assert!(LocatorStrategy::Text < LocatorStrategy::Css);
    }

    #[test]
    fn data_attribute_css_is_not_debt() {
        assert!(!LocatorSpec::css("[data-qa=save]").is_selector_debt());
        assert!(LocatorSpec::css("div > form button.primary").is_selector_debt());
    }

    #[test]
    fn serializes_with_kebab_tags() {
        let p = Primitive::WaitForUrl {
            url: "/home".into(),
            timeout_ms: Some(5000),
        };
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["type"], "wait-for-url");
        assert_eq!(json["timeoutMs"], 5000);
    }

    #[test]
    fn timeout_slot_reaches_locator_options() {
        let mut p = Primitive::Click {
            locator: LocatorSpec::text("Save"),
        };
        *p.timeout_mut().unwrap() = Some(10_000);
        assert_eq!(p.locator().unwrap().options.timeout_ms, Some(10_000));
        assert!(Primitive::Navigate { url: "/".into() }.timeout_mut().is_none());
    }
}
