//! The built-in pattern table.
//!
//! Ordered `(id, regex, constructor)` entries, tried top to bottom against
//! the collapsed instruction. Every regex is anchored and case-insensitive;
//! quoted literals are captured with their authored case.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::model::{LocatorSpec, Primitive};

use super::value_spec;

/// Bumped whenever an entry is added, removed, or reordered.
pub const BUILTIN_TABLE_VERSION: &str = "3";

/// One entry in the table.
pub struct BuiltinPattern {
    pub id: &'static str,
    regex: Regex,
    build: fn(&Captures<'_>) -> Primitive,
}

const VERB: &str = r"(?:verify|expect|assert|ensure|confirm|check\s+that)(?:\s+that)?";

const URL: &str = r#"(?P<url>['"]?(?:/|https?://)[^\s'"]*['"]?)"#;

const ROLES: &str = r"button|link|tab|menuitem|checkbox|radio|option|heading";

const KEYS: &str = r"enter|return|tab|escape|esc|space|backspace|delete|arrow\s?(?:up|down|left|right)|home|end|page\s?(?:up|down)";

/// A single- or double-quoted literal captured as `name`.
fn q(name: &str) -> String {
    format!(r#"(?:'(?P<{name}>[^']*)'|"(?P<{name}_dq>[^"]*)")"#)
}

/// The literal captured by `q(name)`, whichever quote style matched.
fn cap<'t>(caps: &Captures<'t>, name: &str) -> &'t str {
    caps.name(name)
        .or_else(|| caps.name(&format!("{name}_dq")))
        .map_or("", |m| m.as_str())
}

fn url(caps: &Captures<'_>) -> String {
    caps.name("url")
        .map_or("", |m| m.as_str())
        .trim_matches(|c| c == '\'' || c == '"')
        .to_string()
}

/// Role + name when a role word follows the target, otherwise visible text.
fn element(caps: &Captures<'_>) -> LocatorSpec {
    let target = cap(caps, "target");
    match caps.name("role") {
        Some(role) => LocatorSpec::role(role.as_str().to_lowercase(), target),
        None => LocatorSpec::text(target),
    }
}

fn field(caps: &Captures<'_>) -> LocatorSpec {
    LocatorSpec::label(cap(caps, "target"))
}

fn key_name(raw: &str) -> String {
    let folded: String = raw.to_lowercase().split_whitespace().collect();
    let named = match folded.as_str() {
        "enter" | "return" => "Enter",
        "tab" => "Tab",
        "escape" | "esc" => "Escape",
        "space" => "Space",
        "backspace" => "Backspace",
        "delete" => "Delete",
        "arrowup" => "ArrowUp",
        "arrowdown" => "ArrowDown",
        "arrowleft" => "ArrowLeft",
        "arrowright" => "ArrowRight",
        "home" => "Home",
        "end" => "End",
        "pageup" => "PageUp",
        "pagedown" => "PageDown",
        _ => return raw.to_string(),
    };
    named.to_string()
}

fn optional_field(caps: &Captures<'_>) -> Option<LocatorSpec> {
    let target = cap(caps, "target");
    (!target.is_empty()).then(|| LocatorSpec::label(target))
}

fn entry(
    id: &'static str,
    pattern: &str,
    build: fn(&Captures<'_>) -> Primitive,
) -> BuiltinPattern {
    let regex = Regex::new(&format!(r"(?i)^{pattern}$")).expect("built-in pattern is valid");
    BuiltinPattern { id, regex, build }
}

static TABLE: LazyLock<Vec<BuiltinPattern>> = LazyLock::new(|| {
    vec![
        // ── Navigation ──
        entry(
            "navigate",
            &format!(r"(?:navigate|go|browse)\s+to\s+(?:the\s+)?(?:page\s+)?{URL}"),
            |c| Primitive::Navigate { url: url(c) },
        ),
        entry(
            "open-url",
            &format!(r"(?:open|visit|load)\s+(?:the\s+)?(?:page\s+)?{URL}"),
            |c| Primitive::Navigate { url: url(c) },
        ),
        entry(
            "wait-for-url",
            &format!(
                r"wait\s+(?:for|until)\s+(?:the\s+)?url\s+(?:to\s+(?:contain|match|be)|contains|matches|is)\s+{URL}"
            ),
            |c| Primitive::WaitForUrl {
                url: url(c),
                timeout_ms: None,
            },
        ),
        entry(
            "wait-for-response",
            &format!(r"wait\s+for\s+(?:the\s+)?(?:response|request)\s+(?:from|to|for)\s+{URL}"),
            |c| Primitive::WaitForResponse {
                url: url(c),
                timeout_ms: None,
            },
        ),
        // ── Assertions ──
        entry(
            "expect-url",
            &format!(
                r"{VERB}\s+(?:the\s+)?(?:page\s+)?url\s+(?:contains|is|matches|equals|should\s+(?:contain|be|match))\s+{URL}"
            ),
            |c| Primitive::ExpectUrl {
                url: url(c),
                timeout_ms: None,
            },
        ),
        entry(
            "expect-url-on",
            &format!(r"(?:the\s+)?user\s+(?:is|should\s+be|lands)\s+(?:on|at)\s+{URL}"),
            |c| Primitive::ExpectUrl {
                url: url(c),
                timeout_ms: None,
            },
        ),
        entry(
            "expect-title",
            &format!(
                r"{VERB}\s+(?:the\s+)?(?:page\s+)?title\s+(?:is|contains|equals|should\s+be)\s+{}",
                q("title")
            ),
            |c| Primitive::ExpectTitle {
                title: cap(c, "title").to_string(),
            },
        ),
        entry(
            "expect-hidden",
            &format!(
                r"{VERB}\s+{}\s+is\s+(?:not\s+(?:visible|shown|displayed)|hidden|gone)",
                q("target")
            ),
            |c| Primitive::ExpectNotVisible {
                locator: LocatorSpec::text(cap(c, "target")),
            },
        ),
        entry(
            "expect-not-see",
            &format!(
                r"(?:the\s+)?(?:user\s+)?(?:should\s+not|does\s+not|doesn't)\s+see\s+{}",
                q("target")
            ),
            |c| Primitive::ExpectNotVisible {
                locator: LocatorSpec::text(cap(c, "target")),
            },
        ),
        entry(
            "expect-visible",
            &format!(r"{VERB}\s+{}\s+is\s+(?:visible|shown|displayed)", q("target")),
            |c| Primitive::ExpectVisible {
                locator: LocatorSpec::text(cap(c, "target")),
            },
        ),
        entry(
            "expect-see",
            &format!(
                r"(?:the\s+)?(?:user\s+)?(?:should\s+see|sees|see)\s+{}",
                q("target")
            ),
            |c| Primitive::ExpectVisible {
                locator: LocatorSpec::text(cap(c, "target")),
            },
        ),
        entry(
            "expect-value",
            &format!(
                r"{VERB}\s+(?:the\s+)?{}\s+(?:field\s+|input\s+)?(?:has|contains|shows)\s+(?:the\s+)?value\s+{}",
                q("target"),
                q("value")
            ),
            |c| Primitive::ExpectValue {
                locator: field(c),
                value: cap(c, "value").to_string(),
            },
        ),
        entry(
            "expect-text",
            &format!(
                r"{VERB}\s+(?:the\s+)?{}\s+(?:contains|shows|displays|reads|has\s+text)\s+{}",
                q("target"),
                q("text")
            ),
            |c| Primitive::ExpectText {
                locator: field(c),
                text: cap(c, "text").to_string(),
            },
        ),
        // ── Form input ──
        entry(
            "fill",
            &format!(
                r"(?:fill(?:\s+in)?|enter|type|input)\s+{}\s+(?:into|in)\s+(?:the\s+)?{}(?:\s+(?:field|input|box|textbox))?",
                q("value"),
                q("target")
            ),
            |c| Primitive::Fill {
                locator: field(c),
                value: value_spec(cap(c, "value")),
            },
        ),
        entry(
            "fill-with",
            &format!(
                r"(?:fill(?:\s+in)?|set)\s+(?:the\s+)?{}(?:\s+(?:field|input))?\s+(?:with|to)\s+{}",
                q("target"),
                q("value")
            ),
            |c| Primitive::Fill {
                locator: field(c),
                value: value_spec(cap(c, "value")),
            },
        ),
        entry(
            "select",
            &format!(
                r"(?:select|choose|pick)\s+{}\s+(?:from|in)\s+(?:the\s+)?{}(?:\s+(?:dropdown|select|list|menu))?",
                q("value"),
                q("target")
            ),
            |c| Primitive::Select {
                locator: field(c),
                value: value_spec(cap(c, "value")),
            },
        ),
        entry(
            "check",
            &format!(
                r"(?P<verb>check|uncheck|tick|untick)\s+(?:the\s+)?{}(?:\s+(?:checkbox|box|option))?",
                q("target")
            ),
            |c| {
                let verb = c.name("verb").map_or("", |m| m.as_str()).to_lowercase();
                Primitive::Check {
                    locator: field(c),
                    checked: !verb.starts_with("un"),
                }
            },
        ),
        entry(
            "upload",
            &format!(
                r"(?:upload|attach)\s+{}\s+(?:to|into|in)\s+(?:the\s+)?{}(?:\s+(?:field|input))?",
                q("file"),
                q("target")
            ),
            |c| Primitive::Upload {
                locator: field(c),
                file: cap(c, "file").to_string(),
            },
        ),
        // ── Keyboard and pointer ──
        entry(
            "press-key",
            &format!(
                r"press\s+(?:the\s+)?(?P<key>{KEYS})(?:\s+key)?(?:\s+(?:in|on)\s+(?:the\s+)?{})?",
                q("target")
            ),
            |c| Primitive::PressKey {
                key: key_name(c.name("key").map_or("", |m| m.as_str())),
                locator: optional_field(c),
            },
        ),
        entry(
            "press-combo",
            &format!(
                r"press\s+(?:the\s+)?{}\s+keys?(?:\s+(?:in|on)\s+(?:the\s+)?{})?",
                q("key"),
                q("target")
            ),
            |c| Primitive::PressKey {
                key: cap(c, "key").to_string(),
                locator: optional_field(c),
            },
        ),
        entry(
            "hover",
            &format!(
                r"(?:hover\s+(?:over\s+|on\s+)?|mouse\s+over\s+)(?:the\s+)?{}(?:\s+(?P<role>{ROLES}))?",
                q("target")
            ),
            |c| Primitive::Hover {
                locator: element(c),
            },
        ),
        entry(
            "click-role-first",
            &format!(
                r"(?:click|tap)\s+(?:on\s+)?(?:the\s+)?(?P<role>{ROLES})\s+{}",
                q("target")
            ),
            |c| Primitive::Click {
                locator: element(c),
            },
        ),
        entry(
            "click",
            &format!(
                r"(?:click|tap)\s+(?:on\s+)?(?:the\s+)?{}(?:\s+(?P<role>{ROLES}))?",
                q("target")
            ),
            |c| Primitive::Click {
                locator: element(c),
            },
        ),
        // ── Modules ──
        entry(
            "invoke-module",
            &format!(
                r"(?:use|call|run|invoke)\s+(?:the\s+)?module\s+(?:{}|(?P<bare>[\w./-]+))",
                q("module")
            ),
            |c| {
                let module = c
                    .name("bare")
                    .map_or_else(|| cap(c, "module"), |m| m.as_str());
                Primitive::InvokeModule {
                    module: module.to_string(),
                }
            },
        ),
    ]
});

/// The first entry matching `collapsed`, with the primitive it builds.
pub fn lookup(collapsed: &str) -> Option<(&'static str, Primitive)> {
    TABLE.iter().find_map(|pattern| {
        pattern
            .regex
            .captures(collapsed)
            .map(|caps| (pattern.id, (pattern.build)(&caps)))
    })
}

/// Entry ids in evaluation order.
pub fn ids() -> Vec<&'static str> {
    TABLE.iter().map(|p| p.id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::model::{LocatorStrategy, ValueSpec};

    fn resolve(text: &str) -> (&'static str, Primitive) {
        lookup(text).unwrap_or_else(|| panic!("no built-in match for {text:?}"))
    }

    #[test]
    fn ids_are_unique() {
        let mut ids = ids();
        let total = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), total);
    }

    #[test]
    fn login_flow() {
        assert_eq!(
            resolve("Navigate to /login").1,
            Primitive::Navigate {
                url: "/login".into()
            }
        );
        assert_eq!(
            resolve("Fill 'user@example.com' into 'Email'").1,
            Primitive::Fill {
                locator: LocatorSpec::label("Email"),
                value: ValueSpec::literal("user@example.com"),
            }
        );
        assert_eq!(
            resolve("Click 'Sign in' button").1,
            Primitive::Click {
                locator: LocatorSpec::role("button", "Sign in"),
            }
        );
    }

    #[test]
    fn matching_ignores_case_but_literals_keep_it() {
        let (id, p) = resolve("CLICK ON THE 'Save Draft'");
        assert_eq!(id, "click");
        assert_eq!(
            p,
            Primitive::Click {
                locator: LocatorSpec::text("Save Draft"),
            }
        );
    }

    #[test]
    fn double_quotes_allow_apostrophes() {
        let (_, p) = resolve(r#"Verify "O'Brien" is visible"#);
        assert_eq!(p.locator().unwrap().value, "O'Brien");
    }

    #[test]
    fn check_and_uncheck() {
        let Primitive::Check { checked, .. } = resolve("Check the 'Remember me' checkbox").1 else {
            panic!("expected check");
        };
        assert!(checked);
        let Primitive::Check { checked, .. } = resolve("Uncheck 'Newsletter'").1 else {
            panic!("expected check");
        };
        assert!(!checked);
    }

    #[test]
    fn assertions_are_not_mistaken_for_check() {
        let (id, p) = resolve("Check that 'Welcome' is visible");
        assert_eq!(id, "expect-visible");
        assert!(p.is_assertion());
    }

    #[test]
    fn press_key_normalizes_names() {
        assert_eq!(
            resolve("Press Enter in 'Search'").1,
            Primitive::PressKey {
                key: "Enter".into(),
                locator: Some(LocatorSpec::label("Search")),
            }
        );
        assert_eq!(
            resolve("press arrow down").1,
            Primitive::PressKey {
                key: "ArrowDown".into(),
                locator: None,
            }
        );
        assert_eq!(
            resolve("Press 'Control+A' keys").1,
            Primitive::PressKey {
                key: "Control+A".into(),
                locator: None,
            }
        );
    }

    #[test]
    fn url_assertions_and_waits() {
        assert_eq!(resolve("Verify the URL contains /dashboard").0, "expect-url");
        assert_eq!(resolve("The user is on '/home'").0, "expect-url-on");
        assert_eq!(
            resolve("Wait for the response from /api/orders").1,
            Primitive::WaitForResponse {
                url: "/api/orders".into(),
                timeout_ms: None,
            }
        );
    }

    #[test]
    fn fill_variants_and_contextual_values() {
        let (id, p) = resolve("Set 'Password' to '$actor.password'");
        assert_eq!(id, "fill-with");
        assert_eq!(
            p,
            Primitive::Fill {
                locator: LocatorSpec::label("Password"),
                value: ValueSpec::Contextual {
                    key: "actor.password".into()
                },
            }
        );
    }

    #[test]
    fn module_by_bare_or_quoted_name() {
        assert_eq!(
            resolve("Use module auth/login").1,
            Primitive::InvokeModule {
                module: "auth/login".into()
            }
        );
        assert_eq!(
            resolve("Invoke the module 'seed orders'").1,
            Primitive::InvokeModule {
                module: "seed orders".into()
            }
        );
    }

    #[test]
    fn role_before_target() {
        let (_, p) = resolve("Click the link 'Docs'");
        assert_eq!(p.locator().unwrap().strategy, LocatorStrategy::Role);
    }

    #[test]
    fn free_prose_does_not_match() {
        assert!(lookup("do the thing").is_none());
        assert!(lookup("Go to the dashboard").is_none());
    }
}
