//! Code generation: `IrProgram` → Playwright test file.
//!
//! Output is a pure function of the program: no timestamps, stable
//! ordering. Regeneration goes through [`managed::merge`] so hand edits
//! outside managed blocks survive.

mod managed;
mod render;

use std::collections::HashSet;

pub use managed::{Block, MergeError, block_at_line};
pub use render::{BLOCKED_MARKER, journey_tag, locator_expr, tier_tag};

use crate::journey;
use crate::model::IrProgram;

use managed::merge;

/// Generated files end with this.
pub const SPEC_SUFFIX: &str = ".spec.ts";

/// The generated file name for a Journey id.
pub fn spec_file_name(journey_id: &str) -> String {
    format!("{}{SPEC_SUFFIX}", journey::file_stem(journey_id))
}

/// The managed blocks for a program, in file order.
pub fn blocks(program: &IrProgram) -> Vec<Block> {
    render::blocks(program)
}

/// Render a fresh file.
pub fn render(program: &IrProgram) -> String {
    let blank_after: HashSet<String> = ["header".to_string(), "describe".to_string()].into();
    managed::join(&blocks(program), &blank_after)
}

/// Render against the previous file, if any, keeping user regions.
pub fn generate(program: &IrProgram, previous: Option<&str>) -> Result<String, MergeError> {
    match previous {
        Some(previous) if !previous.trim().is_empty() => merge(previous, &blocks(program)),
        _ => Ok(render(program)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::ir;
    use crate::matcher::{DEFAULT_CONFIDENCE_THRESHOLD, KnowledgeBase, Matcher, RawConfidence};

    const LOGIN: &str = r#"+++
id = "JRN-0001"
title = "User signs in"
tier = "smoke"
actor = "standard-user"
tags = ["auth"]

[[completion]]
kind = "url-match"
value = "/dashboard"
+++

## Steps
1. Navigate to /login
2. Fill 'user@example.com' into 'Email'
3. Click 'Sign in' button
"#;

    fn program(text: &str) -> IrProgram {
        let doc = journey::parse(text).unwrap();
        let kb = KnowledgeBase::empty();
        let matcher = Matcher::new(&kb, &RawConfidence, DEFAULT_CONFIDENCE_THRESHOLD);
        ir::build(&doc, &matcher)
    }

    #[test]
    fn renders_the_login_journey() {
        let out = render(&program(LOGIN));
        let expected = "\
// waymark:begin id=header
// Generated by waymark from journey JRN-0001. Edits outside waymark blocks are kept.
import { test, expect } from '@playwright/test';
// waymark:end

// waymark:begin id=describe
test.describe('JRN-0001: User signs in', { tag: ['@JRN-0001', '@tier-smoke', '@auth'] }, () => {

  test('User signs in', async ({ page }) => {
// waymark:end

    // waymark:begin id=step-1
    await test.step('step-1: Navigate to /login', async () => {
      await page.goto('/login');
    });
    // waymark:end
    // waymark:begin id=step-2
    await test.step('step-2: Fill \\'user@example.com\\' into \\'Email\\'', async () => {
      await page.getByLabel('Email').fill('user@example.com');
    });
    // waymark:end
    // waymark:begin id=step-3
    await test.step('step-3: Click \\'Sign in\\' button', async () => {
      await page.getByRole('button', { name: 'Sign in' }).click();
    });
    // waymark:end
    // waymark:begin id=completion
    await test.step('completion', async () => {
      await expect(page).toHaveURL(new RegExp('/dashboard'));
    });
    // waymark:end
// waymark:begin id=footer
  });
});
// waymark:end
";
        assert_eq!(out, expected);
    }

    #[test]
    fn regenerating_unchanged_input_is_byte_identical() {
        let p = program(LOGIN);
        let first = generate(&p, None).unwrap();
        let second = generate(&p, Some(&first)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn hand_edits_between_blocks_survive() {
        let p = program(LOGIN);
        let first = render(&p);
        let edited = first.replace(
            "    // waymark:begin id=step-2\n",
            "    // seed the user first\n    await seedUser(page);\n    // waymark:begin id=step-2\n",
        );
        let regenerated = generate(&p, Some(&edited)).unwrap();
        assert_eq!(regenerated, edited);
    }

    #[test]
    fn changed_step_replaces_only_its_block() {
        let before = render(&program(LOGIN));
        let edited = before.replace("// waymark:end\n\n    // waymark:begin id=step-1", "// waymark:end\n\n    // mine\n    // waymark:begin id=step-1");
        let changed = LOGIN.replace("Navigate to /login", "Navigate to /signin");
        let after = generate(&program(&changed), Some(&edited)).unwrap();
        assert!(after.contains("await page.goto('/signin');"));
        assert!(after.contains("    // mine\n"));
        assert!(!after.contains("'/login'"));
    }

    #[test]
    fn blocked_step_throws_in_generated_code() {
        let text = "+++\nid = \"J\"\ntitle = \"T\"\nactor = \"a\"\n+++\n## Steps\n- do the thing\n";
        let out = render(&program(text));
        assert!(out.contains(
            "throw new Error('WAYMARK_BLOCKED step-1: no pattern matched: \\'do the thing\\'');"
        ));
    }

    #[test]
    fn malformed_previous_file_is_an_error_not_a_clobber() {
        let p = program(LOGIN);
        let broken = "// waymark:begin id=header\nimport x;\n";
        assert!(matches!(
            generate(&p, Some(broken)),
            Err(MergeError::Unterminated { line: 1 })
        ));
    }

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(spec_file_name("JRN-0001"), "JRN-0001.spec.ts");
        assert_eq!(spec_file_name("checkout/guest flow"), "checkout-guest-flow.spec.ts");
    }
}
