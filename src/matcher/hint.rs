//! Inline structured hints.
//!
//! An instruction may carry `@wm(key=value, ...)` anywhere in its text.
//! Values are bare (`testid=save`) or quoted (`name="Save, then close"`),
//! with `\"` escaping a quote inside a quoted value. A hint bypasses
//! pattern matching entirely.
//!
//! ```text
//! Submit the form @wm(action=click, role=button, name="Sign in")
//! Type the password @wm(action=fill, label=Password, value=$actor.password)
//! ```

use crate::model::{LocatorSpec, LocatorStrategy, Primitive};

use super::{locator, value_spec};

const OPEN: &str = "@wm(";

const KEYS: &[&str] = &[
    "action",
    "testid",
    "role",
    "name",
    "label",
    "placeholder",
    "text",
    "css",
    "value",
    "url",
    "key",
    "file",
    "module",
    "title",
    "exact",
    "timeout",
];

/// Parsed `key=value` pairs, in authored order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hint {
    pairs: Vec<(String, String)>,
}

impl Hint {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn require(&self, key: &str, action: &str) -> Result<&str, String> {
        self.get(key)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| format!("action '{action}' needs '{key}'"))
    }
}

/// The hint in `text`, if there is one, plus the text with the hint removed.
///
/// `None` means no hint was written. `Some(Err(..))` means one was written
/// but is malformed.
pub fn extract(text: &str) -> Option<(Result<Hint, String>, String)> {
    let start = text.find(OPEN)?;
    let content_start = start + OPEN.len();

    let Some(len) = closing_paren(&text[content_start..]) else {
        let remainder = text[..start].trim().to_string();
        return Some((Err("unterminated @wm( hint".to_string()), remainder));
    };

    let content = &text[content_start..content_start + len];
    let after = &text[content_start + len + 1..];
    let remainder = format!("{} {}", text[..start].trim(), after.trim())
        .trim()
        .to_string();

    Some((parse_pairs(content), remainder))
}

/// Byte offset of the `)` closing the hint, skipping quoted text.
fn closing_paren(s: &str) -> Option<usize> {
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ')' if !in_quotes => return Some(i),
            _ => {}
        }
    }
    None
}

fn parse_pairs(content: &str) -> Result<Hint, String> {
    let mut pairs: Vec<(String, String)> = Vec::new();

    for segment in split_top_level(content)? {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        let Some((key, value)) = segment.split_once('=') else {
            return Err(format!("'{segment}' is not key=value"));
        };
        let key = key.trim().to_lowercase();
        if !KEYS.contains(&key.as_str()) {
            return Err(format!("unknown key '{key}'"));
        }
        if pairs.iter().any(|(k, _)| *k == key) {
            return Err(format!("duplicate key '{key}'"));
        }
        pairs.push((key, unquote(value.trim())));
    }

    if pairs.is_empty() {
        return Err("empty hint".to_string());
    }
    Ok(Hint { pairs })
}

/// Splits on commas outside quotes.
fn split_top_level(content: &str) -> Result<Vec<&str>, String> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut last = 0;

    for (i, c) in content.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&content[last..i]);
                last = i + 1;
            }
            _ => {}
        }
    }
    if in_quotes {
        return Err("unbalanced quotes".to_string());
    }
    parts.push(&content[last..]);
    Ok(parts)
}

fn unquote(value: &str) -> String {
    match value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
    {
        Some(inner) => inner.replace("\\\"", "\"").replace("\\\\", "\\"),
        None => value.to_string(),
    }
}

/// The locator the hint names, choosing by priority when it names several.
fn hint_locator(hint: &Hint) -> Result<Option<LocatorSpec>, String> {
    let mut candidates = Vec::new();
    if let Some(v) = hint.get("testid") {
        candidates.push(LocatorSpec::test_id(v));
    }
    match (hint.get("role"), hint.get("name")) {
        (Some(role), Some(name)) => candidates.push(LocatorSpec::role(role, name)),
        (Some(role), None) => candidates.push(LocatorSpec::new(LocatorStrategy::Role, role)),
        (None, Some(_)) => return Err("'name' needs 'role'".to_string()),
        (None, None) => {}
    }
    if let Some(v) = hint.get("label") {
        candidates.push(LocatorSpec::label(v));
    }
    if let Some(v) = hint.get("placeholder") {
        candidates.push(LocatorSpec::placeholder(v));
    }
    if let Some(v) = hint.get("text") {
        candidates.push(LocatorSpec::text(v));
    }
    if let Some(v) = hint.get("css") {
        candidates.push(LocatorSpec::css(v));
    }

    let Some(mut chosen) = locator::choose(candidates) else {
        return Ok(None);
    };

    if let Some(exact) = hint.get("exact") {
        chosen.options.exact = parse_bool(exact)?;
    }
    if let Some(timeout) = hint.get("timeout") {
        chosen.options.timeout_ms = Some(parse_timeout(timeout)?);
    }
    Ok(Some(chosen))
}

fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw.to_lowercase().as_str() {
        "true" | "yes" => Ok(true),
        "false" | "no" => Ok(false),
        _ => Err(format!("'exact' must be true or false, got '{raw}'")),
    }
}

fn parse_timeout(raw: &str) -> Result<u64, String> {
    raw.parse::<u64>()
        .map_err(|_| format!("'timeout' must be milliseconds, got '{raw}'"))
}

impl Hint {
    /// The primitive this hint describes.
    pub fn to_primitive(&self) -> Result<Primitive, String> {
        let action = self
            .get("action")
            .ok_or_else(|| "missing 'action'".to_string())?
            .to_lowercase();
        let locator = hint_locator(self)?;
        let need_locator = || {
            locator
                .clone()
                .ok_or_else(|| format!("action '{action}' needs a locator"))
        };
        let timeout = self.get("timeout").map(parse_timeout).transpose()?;

        let primitive = match action.as_str() {
            "navigate" | "goto" => Primitive::Navigate {
                url: self.require("url", &action)?.to_string(),
            },
            "click" => Primitive::Click {
                locator: need_locator()?,
            },
            "fill" => Primitive::Fill {
                locator: need_locator()?,
                value: value_spec(self.require("value", &action)?),
            },
            "select" => Primitive::Select {
                locator: need_locator()?,
                value: value_spec(self.require("value", &action)?),
            },
            "check" | "uncheck" => Primitive::Check {
                locator: need_locator()?,
                checked: action == "check",
            },
            "upload" => Primitive::Upload {
                locator: need_locator()?,
                file: self.require("file", &action)?.to_string(),
            },
            "press-key" | "press" => Primitive::PressKey {
                key: self.require("key", &action)?.to_string(),
                locator: locator.clone(),
            },
            "hover" => Primitive::Hover {
                locator: need_locator()?,
            },
            "wait-for-url" => Primitive::WaitForUrl {
                url: self.require("url", &action)?.to_string(),
                timeout_ms: timeout,
            },
            "wait-for-response" => Primitive::WaitForResponse {
                url: self.require("url", &action)?.to_string(),
                timeout_ms: timeout,
            },
            "expect-visible" => Primitive::ExpectVisible {
                locator: need_locator()?,
            },
            "expect-not-visible" => Primitive::ExpectNotVisible {
                locator: need_locator()?,
            },
            "expect-text" => Primitive::ExpectText {
                locator: need_locator()?,
                text: self.require("value", &action)?.to_string(),
            },
            "expect-value" => Primitive::ExpectValue {
                locator: need_locator()?,
                value: self.require("value", &action)?.to_string(),
            },
            "expect-url" => Primitive::ExpectUrl {
                url: self.require("url", &action)?.to_string(),
                timeout_ms: timeout,
            },
            "expect-title" => Primitive::ExpectTitle {
                title: self.require("title", &action)?.to_string(),
            },
            "invoke-module" | "module" => Primitive::InvokeModule {
                module: self.require("module", &action)?.to_string(),
            },
            other => return Err(format!("unknown action '{other}'")),
        };
        Ok(primitive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::model::ValueSpec;

    fn primitive(text: &str) -> Result<Primitive, String> {
        let (hint, _) = extract(text).expect("hint present");
        hint?.to_primitive()
    }

    #[test]
    fn no_hint_is_none() {
        assert!(extract("Click 'Save'").is_none());
    }

    #[test]
    fn remainder_drops_the_annotation() {
        let (_, rest) = extract("Submit the form @wm(action=click, testid=submit) now").unwrap();
        assert_eq!(rest, "Submit the form now");
    }

    #[test]
    fn quoted_values_keep_commas_and_parens() {
        let p = primitive(r#"@wm(action=click, role=button, name="Save (draft), then close")"#)
            .unwrap();
        let Primitive::Click { locator } = p else {
            panic!("expected click");
        };
        assert_eq!(locator.strategy, LocatorStrategy::Role);
        assert_eq!(locator.options.name.as_deref(), Some("Save (draft), then close"));
    }

    #[test]
    fn escaped_quotes_survive() {
        let p = primitive(r#"@wm(action=expect-title, title="Say \"hi\"")"#).unwrap();
        assert_eq!(
            p,
            Primitive::ExpectTitle {
                title: "Say \"hi\"".into()
            }
        );
    }

    #[test]
    fn highest_priority_locator_wins() {
        let p = primitive("@wm(action=click, text=Save, testid=save-btn)").unwrap();
        assert_eq!(p.locator().unwrap().strategy, LocatorStrategy::TestId);
    }

    #[test]
    fn exact_and_timeout_land_in_options() {
        let p = primitive("@wm(action=hover, label=Menu, exact=true, timeout=8000)").unwrap();
        let options = &p.locator().unwrap().options;
        assert!(options.exact);
        assert_eq!(options.timeout_ms, Some(8000));
    }

    #[test]
    fn dollar_values_are_contextual() {
        let p = primitive("@wm(action=fill, label=Password, value=$actor.password)").unwrap();
        let Primitive::Fill { value, .. } = p else {
            panic!("expected fill");
        };
        assert_eq!(
            value,
            ValueSpec::Contextual {
                key: "actor.password".into()
            }
        );
    }

    #[test]
    fn errors_name_the_problem() {
        for (text, expected) in [
            ("@wm(testid=x)", "missing 'action'"),
            ("@wm(action=click)", "action 'click' needs a locator"),
            ("@wm(action=fill, label=Email)", "action 'fill' needs 'value'"),
            ("@wm(action=teleport, url=/)", "unknown action 'teleport'"),
            ("@wm(action=click, colour=red)", "unknown key 'colour'"),
            ("@wm(action=click, action=hover)", "duplicate key 'action'"),
            ("@wm(action=click, name=Save)", "'name' needs 'role'"),
            ("@wm(action=click, testid=x", "unterminated @wm( hint"),
        ] {
            assert_eq!(primitive(text).unwrap_err(), expected, "for {text}");
        }
    }
}
