//! Journey body: `## Setup`, `## Steps`, and `## Cleanup` sections.
//!
//! Inside a section, every list item is one step with one instruction.
//! A `### ` heading opens a grouped step whose instructions are the list
//! items that follow it; a heading with no items is its own instruction.
//! Indented lines continue the item above them. Other `## ` sections are
//! free prose and ignored.

use crate::model::Step;

use super::ParseError;

/// The step lists found in a Journey body.
#[derive(Debug, Default)]
pub(super) struct Sections {
    pub setup: Vec<Step>,
    pub steps: Vec<Step>,
    pub cleanup: Vec<Step>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Setup,
    Steps,
    Cleanup,
    Other,
}

impl Section {
    fn from_heading(heading: &str) -> Self {
        match heading.trim().to_lowercase().as_str() {
            "setup" | "preconditions" | "before" => Self::Setup,
            "steps" | "acceptance steps" => Self::Steps,
            "cleanup" | "teardown" | "after" => Self::Cleanup,
            _ => Self::Other,
        }
    }

    fn id_prefix(self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Cleanup => "cleanup",
            Self::Steps | Self::Other => "step",
        }
    }
}

/// A step being assembled: description plus instruction lines.
struct Draft {
    description: String,
    instructions: Vec<String>,
}

struct Builder {
    sections: Sections,
    section: Section,
    group: Option<Draft>,

    /// Set while the last list item may still take continuation lines.
    continuing: bool,
}

impl Builder {
    fn target(&mut self, section: Section) -> Option<&mut Vec<Step>> {
        match section {
            Section::Setup => Some(&mut self.sections.setup),
            Section::Steps => Some(&mut self.sections.steps),
            Section::Cleanup => Some(&mut self.sections.cleanup),
            Section::Other => None,
        }
    }

    /// Closes the open group, if any, and files it under the current section.
    fn flush_group(&mut self) {
        let Some(draft) = self.group.take() else {
            return;
        };
        let mut instructions = draft.instructions;
        if instructions.is_empty() {
            instructions.push(draft.description.clone());
        }
        self.push(draft.description, instructions);
    }

    fn push(&mut self, description: String, instructions: Vec<String>) {
        let section = self.section;
        if let Some(list) = self.target(section) {
            let id = format!("{}-{}", section.id_prefix(), list.len() + 1);
            list.push(Step {
                id,
                description,
                instructions,
            });
        }
    }

    fn push_item(&mut self, text: String) {
        if let Some(group) = self.group.as_mut() {
            group.instructions.push(text);
        } else {
            self.push(text.clone(), vec![text]);
        }
        self.continuing = true;
    }

    /// Appends a continuation line to the most recent item.
    fn continue_item(&mut self, text: &str) {
        if let Some(group) = self.group.as_mut()
            && let Some(last) = group.instructions.last_mut()
        {
            last.push(' ');
            last.push_str(text);
            return;
        }
        let section = self.section;
        if let Some(list) = self.target(section)
            && let Some(step) = list.last_mut()
        {
            step.description.push(' ');
            step.description.push_str(text);
            if let Some(last) = step.instructions.last_mut() {
                last.push(' ');
                last.push_str(text);
            }
        }
    }
}

/// Parse the body into step sections. `first_line` is the body's line number in the file.
pub(super) fn parse_sections(body: &str, first_line: usize) -> Result<Sections, ParseError> {
    let mut builder = Builder {
        sections: Sections::default(),
        section: Section::Other,
        group: None,
        continuing: false,
    };

    for (index, raw) in body.lines().enumerate() {
        let line_no = first_line + index;
        let trimmed = raw.trim();

        if trimmed.is_empty() {
            builder.continuing = false;
            continue;
        }

        if let Some(heading) = trimmed.strip_prefix("## ") {
            builder.flush_group();
            builder.section = Section::from_heading(heading);
            builder.continuing = false;
            continue;
        }

        if builder.section == Section::Other {
            continue;
        }

        if let Some(heading) = trimmed.strip_prefix("### ") {
            builder.flush_group();
            let description = strip_step_label(heading);
            if description.is_empty() {
                return Err(ParseError::Body {
                    line: line_no,
                    message: "step heading has no description".to_string(),
                });
            }
            builder.group = Some(Draft {
                description,
                instructions: Vec::new(),
            });
            builder.continuing = false;
            continue;
        }

        if let Some(item) = list_item(trimmed) {
            if item.is_empty() {
                return Err(ParseError::Body {
                    line: line_no,
                    message: "empty list item".to_string(),
                });
            }
            builder.push_item(item.to_string());
            continue;
        }

        let indented = raw.starts_with(' ') || raw.starts_with('\t');
        if indented && builder.continuing {
            builder.continue_item(trimmed);
        }
    }

    builder.flush_group();
    Ok(builder.sections)
}

/// The text of a list item (`-`, `*`, `+`, `1.`, `1)`), if the line is one.
fn list_item(line: &str) -> Option<&str> {
    if let Some(rest) = line
        .strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .or_else(|| line.strip_prefix("+ "))
    {
        return Some(rest.trim());
    }
    if matches!(line, "-" | "*" | "+") {
        return Some("");
    }

    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let rest = &line[digits..];
    let rest = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')'))?;
    if rest.is_empty() {
        return Some("");
    }
    rest.strip_prefix(' ').map(str::trim)
}

/// Drops a leading `Step:` or `Step 3:` label from a heading.
fn strip_step_label(heading: &str) -> String {
    let heading = heading.trim();
    let lower = heading.to_lowercase();
    if let Some(rest) = lower.strip_prefix("step")
        && let Some(colon) = rest.find(':')
        && rest[..colon].trim().chars().all(|c| c.is_ascii_digit())
    {
        let cut = "step".len() + colon + 1;
        return heading[cut..].trim().to_string();
    }
    heading.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> Sections {
        parse_sections(body, 1).unwrap()
    }

    fn descriptions(steps: &[Step]) -> Vec<&str> {
        steps.iter().map(|s| s.description.as_str()).collect()
    }

    #[test]
    fn list_items_become_steps_in_order() {
        let s = parse("## Steps\n1. First\n2. Second\n- Third\n");
        assert_eq!(descriptions(&s.steps), ["First", "Second", "Third"]);
        assert_eq!(s.steps[0].instructions, ["First"]);
    }

    #[test]
    fn headings_group_instructions() {
        let s = parse(
            "## Steps\n### Step 1: Sign in\n- Fill 'a' into 'Email'\n- Click 'Go'\n### Look around\n",
        );
        assert_eq!(descriptions(&s.steps), ["Sign in", "Look around"]);
        assert_eq!(s.steps[0].instructions, ["Fill 'a' into 'Email'", "Click 'Go'"]);
        assert_eq!(s.steps[1].instructions, ["Look around"]);
        assert_eq!(s.steps[1].id, "step-2");
    }

    #[test]
    fn setup_and_cleanup_get_their_own_ids() {
        let s = parse("## Setup\n- Navigate to /\n## Steps\n- Click 'A'\n## Cleanup\n- Click 'Log out'\n");
        assert_eq!(s.setup[0].id, "setup-1");
        assert_eq!(s.steps[0].id, "step-1");
        assert_eq!(s.cleanup[0].id, "cleanup-1");
    }

    #[test]
    fn other_sections_are_ignored() {
        let s = parse("## Notes\n- not a step\n## Steps\n- Click 'A'\n");
        assert_eq!(descriptions(&s.steps), ["Click 'A'"]);
    }

    #[test]
    fn indented_lines_continue_the_item() {
        let s = parse("## Steps\n- Fill 'a long value'\n  into 'Notes'\n- Click 'Save'\n");
        assert_eq!(s.steps[0].instructions, ["Fill 'a long value' into 'Notes'"]);
        assert_eq!(s.steps.len(), 2);
    }

    #[test]
    fn empty_item_is_an_error_with_line() {
        let err = parse_sections("## Steps\n- ok\n-\n", 10).unwrap_err();
        assert!(matches!(err, ParseError::Body { line: 12, .. }));
    }

    #[test]
    fn recognizes_list_markers() {
        assert_eq!(list_item("12. Go"), Some("Go"));
        assert_eq!(list_item("3) Go"), Some("Go"));
        assert_eq!(list_item("* Go"), Some("Go"));
        assert_eq!(list_item("2024 was a year"), None);
        assert_eq!(list_item("Go"), None);
    }
}
