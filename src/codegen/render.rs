//! IR → Playwright TypeScript.

use crate::model::{
    IrProgram, IrStep, LocatorSpec, LocatorStrategy, MatchedPrimitive, Primitive, ValueSpec,
};

use super::managed::Block;

/// Marker text every blocked primitive renders with.
pub const BLOCKED_MARKER: &str = "WAYMARK_BLOCKED";

const DESCRIBE_INDENT: &str = "";
const TEST_INDENT: &str = "  ";
const STEP_INDENT: &str = "    ";
const BODY_INDENT: &str = "      ";

/// A single-quoted JavaScript string literal.
pub fn js_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// The Playwright tag for a Journey id.
pub fn journey_tag(journey_id: &str) -> String {
    format!("@{journey_id}")
}

/// The Playwright tag for a tier.
pub fn tier_tag(tier: &str) -> String {
    format!("@tier-{tier}")
}

pub fn locator_expr(spec: &LocatorSpec) -> String {
    let exact = spec.options.exact;
    let mut expr = match spec.strategy {
        LocatorStrategy::TestId => format!("page.getByTestId({})", js_string(&spec.value)),
        LocatorStrategy::Role => {
            let mut opts = Vec::new();
            if let Some(name) = &spec.options.name {
                opts.push(format!("name: {}", js_string(name)));
            }
            if exact {
                opts.push("exact: true".to_string());
            }
            if opts.is_empty() {
                format!("page.getByRole({})", js_string(&spec.value))
            } else {
                format!(
                    "page.getByRole({}, {{ {} }})",
                    js_string(&spec.value),
                    opts.join(", ")
                )
            }
        }
        LocatorStrategy::Label => text_locator("getByLabel", &spec.value, exact),
        LocatorStrategy::Placeholder => text_locator("getByPlaceholder", &spec.value, exact),
        LocatorStrategy::Text => text_locator("getByText", &spec.value, exact),
        LocatorStrategy::Css => format!("page.locator({})", js_string(&spec.value)),
    };
    if let Some(n) = spec.options.nth {
        expr.push_str(&format!(".nth({n})"));
    }
    expr
}

fn text_locator(method: &str, value: &str, exact: bool) -> String {
    if exact {
        format!("page.{method}({}, {{ exact: true }})", js_string(value))
    } else {
        format!("page.{method}({})", js_string(value))
    }
}

fn timeout_arg(timeout_ms: Option<u64>) -> String {
    timeout_ms.map_or_else(String::new, |t| format!("{{ timeout: {t} }}"))
}

fn trailing_timeout(timeout_ms: Option<u64>) -> String {
    timeout_ms.map_or_else(String::new, |t| format!(", {{ timeout: {t} }}"))
}

fn value_expr(value: &ValueSpec) -> String {
    match value {
        ValueSpec::Literal { value } => js_string(value),
        ValueSpec::Generated { base } => {
            let escaped = js_string(base);
            let inner = &escaped[1..escaped.len() - 1];
            format!("`{}-${{runId}}`", inner.replace('`', "\\`").replace("${", "\\${"))
        }
        ValueSpec::Contextual { key } => format!("ctx[{}]", js_string(key)),
    }
}

/// A URL predicate: substring match on the full href.
fn url_predicate(url: &str) -> String {
    format!("(url) => url.href.includes({})", js_string(url))
}

fn url_regex(url: &str) -> String {
    format!("new RegExp({})", js_string(&regex::escape(url)))
}

/// Statements for one primitive. `step_id` names blocked throws.
pub fn primitive_lines(primitive: &Primitive, step_id: &str) -> Vec<String> {
    let mut lines = Vec::new();

    if let Some(locator) = primitive.locator()
        && locator.options.wait_visible
        && !primitive.is_assertion()
    {
        lines.push(format!(
            "await {}.waitFor({{ state: 'visible'{} }});",
            locator_expr(locator),
            locator
                .options
                .timeout_ms
                .map_or_else(String::new, |t| format!(", timeout: {t}"))
        ));
    }

    let line = match primitive {
        Primitive::Navigate { url } => format!("await page.goto({});", js_string(url)),
        Primitive::Click { locator } => {
            format!(
                "await {}.click({});",
                locator_expr(locator),
                timeout_arg(locator.options.timeout_ms)
            )
        }
        Primitive::Fill { locator, value } => format!(
            "await {}.fill({}{});",
            locator_expr(locator),
            value_expr(value),
            trailing_timeout(locator.options.timeout_ms)
        ),
        Primitive::Select { locator, value } => format!(
            "await {}.selectOption({}{});",
            locator_expr(locator),
            value_expr(value),
            trailing_timeout(locator.options.timeout_ms)
        ),
        Primitive::Check { locator, checked } => format!(
            "await {}.{}({});",
            locator_expr(locator),
            if *checked { "check" } else { "uncheck" },
            timeout_arg(locator.options.timeout_ms)
        ),
        Primitive::Upload { locator, file } => format!(
            "await {}.setInputFiles({}{});",
            locator_expr(locator),
            js_string(file),
            trailing_timeout(locator.options.timeout_ms)
        ),
        Primitive::PressKey { key, locator } => match locator {
            Some(locator) => format!(
                "await {}.press({}{});",
                locator_expr(locator),
                js_string(key),
                trailing_timeout(locator.options.timeout_ms)
            ),
            None => format!("await page.keyboard.press({});", js_string(key)),
        },
        Primitive::Hover { locator } => format!(
            "await {}.hover({});",
            locator_expr(locator),
            timeout_arg(locator.options.timeout_ms)
        ),
        Primitive::WaitForUrl { url, timeout_ms } => format!(
            "await page.waitForURL({}{});",
            url_predicate(url),
            trailing_timeout(*timeout_ms)
        ),
        Primitive::WaitForResponse { url, timeout_ms } => format!(
            "await page.waitForResponse((response) => response.url().includes({}){});",
            js_string(url),
            trailing_timeout(*timeout_ms)
        ),
        Primitive::ExpectVisible { locator } => format!(
            "await expect({}).toBeVisible({});",
            locator_expr(locator),
            timeout_arg(locator.options.timeout_ms)
        ),
        Primitive::ExpectNotVisible { locator } => format!(
            "await expect({}).toBeHidden({});",
            locator_expr(locator),
            timeout_arg(locator.options.timeout_ms)
        ),
        Primitive::ExpectText { locator, text } => format!(
            "await expect({}).toContainText({}{});",
            locator_expr(locator),
            js_string(text),
            trailing_timeout(locator.options.timeout_ms)
        ),
        Primitive::ExpectValue { locator, value } => format!(
            "await expect({}).toHaveValue({}{});",
            locator_expr(locator),
            js_string(value),
            trailing_timeout(locator.options.timeout_ms)
        ),
        Primitive::ExpectUrl { url, timeout_ms } => format!(
            "await expect(page).toHaveURL({}{});",
            url_regex(url),
            trailing_timeout(*timeout_ms)
        ),
        Primitive::ExpectTitle { title } => {
            format!("await expect(page).toHaveTitle({});", js_string(title))
        }
        Primitive::InvokeModule { module } => {
            format!("await runModule({}, page, ctx);", js_string(module))
        }
        Primitive::Blocked {
            reason,
            suggestions,
            ..
        } => {
            for s in suggestions {
                lines.push(format!(
                    "// suggestion {} ({:.2}): {}",
                    s.pattern_id,
                    s.confidence,
                    s.primitive.kind()
                ));
            }
            format!(
                "throw new Error({});",
                js_string(&format!("{BLOCKED_MARKER} {step_id}: {reason}"))
            )
        }
    };
    lines.push(line);
    lines
}

fn step_block(step: &IrStep) -> Block {
    let mut body = vec![format!(
        "{STEP_INDENT}await test.step({}, async () => {{",
        js_string(&format!("{}: {}", step.id, step.description))
    )];
    for matched in step.actions.iter().chain(&step.assertions) {
        for line in primitive_lines(&matched.primitive, &step.id) {
            body.push(format!("{BODY_INDENT}{line}"));
        }
    }
    body.push(format!("{STEP_INDENT}}});"));
    Block::new(Some(&step.id), STEP_INDENT, &body)
}

fn completion_block(completion: &[MatchedPrimitive]) -> Block {
    let mut body = vec![format!("{STEP_INDENT}await test.step('completion', async () => {{")];
    for matched in completion {
        for line in primitive_lines(&matched.primitive, "completion") {
            body.push(format!("{BODY_INDENT}{line}"));
        }
    }
    body.push(format!("{STEP_INDENT}}});"));
    Block::new(Some("completion"), STEP_INDENT, &body)
}

fn uses(program: &IrProgram, pred: impl Fn(&Primitive) -> bool) -> bool {
    program.primitives().any(|m| pred(&m.primitive))
}

fn uses_value(program: &IrProgram, pred: impl Fn(&ValueSpec) -> bool) -> bool {
    uses(program, |p| match p {
        Primitive::Fill { value, .. } | Primitive::Select { value, .. } => pred(value),
        _ => false,
    })
}

fn header_block(program: &IrProgram, modules: bool) -> Block {
    let mut body = vec![
        format!(
            "// Generated by waymark from journey {}. Edits outside waymark blocks are kept.",
            program.journey_id
        ),
        "import { test, expect } from '@playwright/test';".to_string(),
    ];
    if modules {
        body.push("import { runModule } from './modules';".to_string());
    }
    Block::new(Some("header"), "", &body)
}

fn describe_block(program: &IrProgram, modules: bool) -> Block {
    let mut tags = vec![journey_tag(&program.journey_id), tier_tag(&program.tier)];
    if !program.scope.is_empty() {
        tags.push(format!("@scope-{}", program.scope));
    }
    for tag in &program.tags {
        let tag = format!("@{tag}");
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    let tags = tags.iter().map(|t| js_string(t)).collect::<Vec<_>>().join(", ");

    let mut body = vec![format!(
        "{DESCRIBE_INDENT}test.describe({}, {{ tag: [{tags}] }}, () => {{",
        js_string(&format!("{}: {}", program.journey_id, program.title))
    )];
    if uses_value(program, |v| matches!(v, ValueSpec::Generated { .. })) {
        body.push(format!(
            "{TEST_INDENT}const runId = process.env.WAYMARK_RUN_ID ?? Date.now().toString(36);"
        ));
    }
    if modules || uses_value(program, |v| matches!(v, ValueSpec::Contextual { .. })) {
        body.push(format!(
            "{TEST_INDENT}const ctx: Record<string, string> = JSON.parse(process.env.WAYMARK_CONTEXT ?? '{{}}');"
        ));
    }
    body.push(String::new());
    body.push(format!(
        "{TEST_INDENT}test({}, async ({{ page }}) => {{",
        js_string(&program.title)
    ));
    if let Some(timeout) = program.timeout_ms {
        body.push(format!("{STEP_INDENT}test.setTimeout({timeout});"));
    }
    Block::new(Some("describe"), "", &body)
}

fn footer_block() -> Block {
    let body = vec![format!("{TEST_INDENT}}});"), format!("{DESCRIBE_INDENT}}});")];
    Block::new(Some("footer"), "", &body)
}

/// Every block of the file, in file order.
pub fn blocks(program: &IrProgram) -> Vec<Block> {
    let modules = uses(program, |p| matches!(p, Primitive::InvokeModule { .. }));

    let mut blocks = vec![header_block(program, modules), describe_block(program, modules)];
    blocks.extend(program.all_steps().map(step_block));
    if !program.completion.is_empty() {
        blocks.push(completion_block(&program.completion));
    }
    blocks.push(footer_block());
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::model::{LocatorOptions, Suggestion};

    #[test]
    fn js_strings_escape_quotes_and_backslashes() {
        assert_eq!(js_string(r"it's a \ path"), r"'it\'s a \\ path'");
        assert_eq!(js_string("two\nlines"), r"'two\nlines'");
    }

    #[test]
    fn locators_render_by_strategy() {
        assert_eq!(
            locator_expr(&LocatorSpec::role("button", "Sign in")),
            "page.getByRole('button', { name: 'Sign in' })"
        );
        assert_eq!(
            locator_expr(&LocatorSpec::test_id("save")),
            "page.getByTestId('save')"
        );
        let narrowed = LocatorSpec {
            options: LocatorOptions {
                exact: true,
                nth: Some(0),
                ..LocatorOptions::default()
            },
            ..LocatorSpec::text("Save")
        };
        assert_eq!(
            locator_expr(&narrowed),
            "page.getByText('Save', { exact: true }).nth(0)"
        );
    }

    #[test]
    fn explicit_wait_precedes_the_action() {
        let mut locator = LocatorSpec::label("Email");
        locator.options.wait_visible = true;
        let lines = primitive_lines(
            &Primitive::Fill {
                locator,
                value: ValueSpec::literal("a@b.c"),
            },
            "step-1",
        );
        assert_eq!(
            lines,
            [
                "await page.getByLabel('Email').waitFor({ state: 'visible' });",
                "await page.getByLabel('Email').fill('a@b.c');",
            ]
        );
    }

    #[test]
    fn blocked_renders_a_throw_naming_the_step() {
        let lines = primitive_lines(&Primitive::blocked("", "do the thing"), "step-2");
        assert_eq!(
            lines,
            ["throw new Error('WAYMARK_BLOCKED step-2: no pattern matched: \\'do the thing\\'');"]
        );
    }

    #[test]
    fn suggestions_render_as_comments() {
        let primitive = Primitive::Blocked {
            reason: "weak".into(),
            source_text: "open settings".into(),
            suggestions: vec![Suggestion {
                pattern_id: "p1".into(),
                confidence: 0.5,
                primitive: Box::new(Primitive::Navigate {
                    url: "/settings".into(),
                }),
            }],
        };
        let lines = primitive_lines(&primitive, "step-1");
        assert_eq!(lines[0], "// suggestion p1 (0.50): navigate");
        assert!(lines[1].starts_with("throw new Error('WAYMARK_BLOCKED step-1: weak"));
    }

    #[test]
    fn values_render_by_source() {
        assert_eq!(
            value_expr(&ValueSpec::Generated {
                base: "order".into()
            }),
            "`order-${runId}`"
        );
        assert_eq!(
            value_expr(&ValueSpec::Contextual {
                key: "actor.email".into()
            }),
            "ctx['actor.email']"
        );
    }

    #[test]
    fn url_assertion_escapes_regex() {
        let lines = primitive_lines(
            &Primitive::ExpectUrl {
                url: "/search?q=1".into(),
                timeout_ms: Some(5000),
            },
            "completion",
        );
        assert_eq!(
            lines,
            [r"await expect(page).toHaveURL(new RegExp('/search\\?q=1'), { timeout: 5000 });"]
        );
    }
}
