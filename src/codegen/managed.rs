//! Managed blocks: the regions of a generated file waymark owns.
//!
//! ```text
//! // waymark:begin id=step-1
//! ...generated...
//! // waymark:end
//! ```
//!
//! Everything outside a block belongs to the user and survives
//! regeneration byte for byte. Blocks match by id; blocks without an id
//! match by position among id-less blocks only.

use std::collections::{HashMap, HashSet};

const BEGIN: &str = "// waymark:begin";
const END: &str = "// waymark:end";

/// One generated block, markers included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub id: Option<String>,

    /// Full text from the begin marker through the end marker's newline.
    pub text: String,
}

impl Block {
    /// A block whose markers sit at `indent`. Body lines are taken as-is.
    pub fn new(id: Option<&str>, indent: &str, body: &[String]) -> Self {
        let mut text = match id {
            Some(id) => format!("{indent}{BEGIN} id={id}\n"),
            None => format!("{indent}{BEGIN}\n"),
        };
        for line in body {
            text.push_str(line);
            text.push('\n');
        }
        text.push_str(indent);
        text.push_str(END);
        text.push('\n');
        Self {
            id: id.map(str::to_string),
            text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergeError {
    #[error("line {line}: waymark:begin inside another block")]
    Nested { line: usize },

    #[error("line {line}: waymark:begin has no matching waymark:end")]
    Unterminated { line: usize },

    #[error("line {line}: waymark:end without waymark:begin")]
    UnexpectedEnd { line: usize },

    #[error("line {line}: malformed marker `{text}`")]
    Malformed { line: usize, text: String },

    #[error("block id `{0}` appears more than once")]
    DuplicateId(String),
}

#[derive(Debug, PartialEq, Eq)]
enum Segment<'a> {
    Text(&'a str),
    Block { id: Option<String> },
}

/// Split `text` into user text and block placeholders.
fn segments(text: &str) -> Result<Vec<Segment<'_>>, MergeError> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let mut text_start = 0;
    let mut offset = 0;
    let mut open: Option<(usize, Option<String>)> = None;

    for (index, line) in text.split_inclusive('\n').enumerate() {
        let line_no = index + 1;
        let trimmed = line.trim();
        let line_start = offset;
        offset += line.len();

        if let Some(rest) = trimmed.strip_prefix(BEGIN) {
            if open.is_some() {
                return Err(MergeError::Nested { line: line_no });
            }
            let rest = rest.trim();
            let id = if rest.is_empty() {
                None
            } else if let Some(id) = rest.strip_prefix("id=")
                && !id.is_empty()
                && !id.contains(char::is_whitespace)
            {
                Some(id.to_string())
            } else {
                return Err(MergeError::Malformed {
                    line: line_no,
                    text: trimmed.to_string(),
                });
            };
            if let Some(id) = &id
                && !seen.insert(id.clone())
            {
                return Err(MergeError::DuplicateId(id.clone()));
            }
            if line_start > text_start {
                out.push(Segment::Text(&text[text_start..line_start]));
            }
            open = Some((line_no, id));
        } else if trimmed == END {
            let Some((_, id)) = open.take() else {
                return Err(MergeError::UnexpectedEnd { line: line_no });
            };
            out.push(Segment::Block { id });
            text_start = offset;
        } else if trimmed.starts_with("// waymark:") {
            return Err(MergeError::Malformed {
                line: line_no,
                text: trimmed.to_string(),
            });
        }
    }

    if let Some((line, _)) = open {
        return Err(MergeError::Unterminated { line });
    }
    if text_start < text.len() {
        out.push(Segment::Text(&text[text_start..]));
    }
    Ok(out)
}

/// The id of the managed block enclosing 1-based `line`, if any.
pub fn block_at_line(text: &str, line: usize) -> Option<String> {
    let mut open: Option<Option<String>> = None;
    for (index, raw) in text.lines().enumerate() {
        let trimmed = raw.trim();
        if let Some(rest) = trimmed.strip_prefix(BEGIN) {
            open = Some(rest.trim().strip_prefix("id=").map(str::to_string));
        } else if trimmed == END {
            if index + 1 >= line {
                break;
            }
            open = None;
            continue;
        }
        if index + 1 == line {
            return open.flatten();
        }
    }
    None
}

/// Concatenate blocks into a fresh file, separated by blank lines where
/// the layout asks for them.
pub fn join(blocks: &[Block], blank_after: &HashSet<String>) -> String {
    let mut out = String::new();
    for block in blocks {
        out.push_str(&block.text);
        if block.id.as_ref().is_some_and(|id| blank_after.contains(id)) {
            out.push('\n');
        }
    }
    out
}

/// Replace the blocks in `previous` with `blocks`, keeping user text.
///
/// Matched blocks are replaced in place. A new block goes right after the
/// block that precedes it in `blocks` (or before the first matched block
/// when it leads). Blocks in `previous` with no counterpart are dropped.
pub fn merge(previous: &str, blocks: &[Block]) -> Result<String, MergeError> {
    let old = segments(previous)?;

    // Map each old block to the index of its new counterpart.
    let by_id: HashMap<&str, usize> = blocks
        .iter()
        .enumerate()
        .filter_map(|(i, b)| b.id.as_deref().map(|id| (id, i)))
        .collect();
    let anonymous: Vec<usize> = blocks
        .iter()
        .enumerate()
        .filter(|(_, b)| b.id.is_none())
        .map(|(i, _)| i)
        .collect();

    let mut anonymous_seen = 0;
    let mut old_to_new: Vec<Option<usize>> = Vec::new();
    for segment in &old {
        if let Segment::Block { id } = segment {
            let target = match id {
                Some(id) => by_id.get(id.as_str()).copied(),
                None => {
                    let target = anonymous.get(anonymous_seen).copied();
                    anonymous_seen += 1;
                    target
                }
            };
            old_to_new.push(target);
        }
    }

    let matched: HashSet<usize> = old_to_new.iter().flatten().copied().collect();
    let mut emitted = vec![false; blocks.len()];
    let mut out = String::with_capacity(previous.len());

    let emit_from = |start: usize, out: &mut String, emitted: &mut [bool]| {
        let mut i = start;
        while i < blocks.len() && !emitted[i] && (i == start || !matched.contains(&i)) {
            out.push_str(&blocks[i].text);
            emitted[i] = true;
            i += 1;
        }
    };

    let mut leading_done = matched.is_empty();
    let mut block_index = 0;
    for segment in &old {
        match segment {
            Segment::Text(text) => out.push_str(text),
            Segment::Block { .. } => {
                let target = old_to_new[block_index];
                block_index += 1;
                let Some(target) = target else {
                    continue;
                };
                if !leading_done {
                    leading_done = true;
                    if !matched.contains(&0) {
                        emit_from(0, &mut out, &mut emitted);
                    }
                }
                emit_from(target, &mut out, &mut emitted);
            }
        }
    }

    // Whatever never found a home goes at the end, in order.
    if emitted.iter().any(|e| !e) {
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        for (i, block) in blocks.iter().enumerate() {
            if !emitted[i] {
                out.push_str(&block.text);
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(id: Option<&str>, body: &str) -> Block {
        Block::new(id, "", &[body.to_string()])
    }

    #[test]
    fn merge_into_empty_is_concatenation() {
        let blocks = [block(Some("a"), "A"), block(Some("b"), "B")];
        let out = merge("", &blocks).unwrap();
        assert_eq!(
            out,
            "// waymark:begin id=a\nA\n// waymark:end\n// waymark:begin id=b\nB\n// waymark:end\n"
        );
    }

    #[test]
    fn user_text_between_blocks_survives() {
        let old = "// waymark:begin id=a\nold A\n// waymark:end\n// my note\n\n// waymark:begin id=b\nold B\n// waymark:end\ntrailing\n";
        let out = merge(old, &[block(Some("a"), "A"), block(Some("b"), "B")]).unwrap();
        assert_eq!(
            out,
            "// waymark:begin id=a\nA\n// waymark:end\n// my note\n\n// waymark:begin id=b\nB\n// waymark:end\ntrailing\n"
        );
    }

    #[test]
    fn merge_is_idempotent() {
        let blocks = [block(Some("a"), "A"), block(None, "x"), block(Some("b"), "B")];
        let once = merge("// keep\n", &blocks).unwrap();
        let twice = merge(&once, &blocks).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn anonymous_blocks_match_by_position() {
        let old = "// waymark:begin\nfirst\n// waymark:end\nuser\n// waymark:begin\nsecond\n// waymark:end\n";
        let out = merge(old, &[block(None, "ONE"), block(None, "TWO")]).unwrap();
        assert_eq!(
            out,
            "// waymark:begin\nONE\n// waymark:end\nuser\n// waymark:begin\nTWO\n// waymark:end\n"
        );
    }

    #[test]
    fn new_blocks_follow_their_predecessor_and_stale_ones_go() {
        let old = "// waymark:begin id=a\nA\n// waymark:end\n// between\n// waymark:begin id=gone\nG\n// waymark:end\n// waymark:begin id=c\nC\n// waymark:end\n";
        let blocks = [
            block(Some("a"), "A"),
            block(Some("b"), "B"),
            block(Some("c"), "C"),
        ];
        let out = merge(old, &blocks).unwrap();
        assert_eq!(
            out,
            "// waymark:begin id=a\nA\n// waymark:end\n// waymark:begin id=b\nB\n// waymark:end\n// between\n// waymark:begin id=c\nC\n// waymark:end\n"
        );
    }

    #[test]
    fn leading_new_blocks_go_before_the_first_match() {
        let old = "// head\n// waymark:begin id=b\nB\n// waymark:end\n";
        let out = merge(old, &[block(Some("a"), "A"), block(Some("b"), "B")]).unwrap();
        assert_eq!(
            out,
            "// head\n// waymark:begin id=a\nA\n// waymark:end\n// waymark:begin id=b\nB\n// waymark:end\n"
        );
    }

    #[test]
    fn indented_markers_are_recognized() {
        let old = "x\n    // waymark:begin id=a\n    old\n    // waymark:end\ny\n";
        let new = Block::new(Some("a"), "    ", &["    new".to_string()]);
        let out = merge(old, &[new]).unwrap();
        assert_eq!(out, "x\n    // waymark:begin id=a\n    new\n    // waymark:end\ny\n");
    }

    #[test]
    fn finds_the_block_around_a_line() {
        let text = "x\n// waymark:begin id=step-1\nA\n// waymark:end\ny\n// waymark:begin\nB\n// waymark:end\n";
        assert_eq!(block_at_line(text, 3).as_deref(), Some("step-1"));
        assert_eq!(block_at_line(text, 1), None);
        assert_eq!(block_at_line(text, 5), None);
        assert_eq!(block_at_line(text, 7), None);
    }

    #[test]
    fn broken_markers_are_errors() {
        let cases = [
            (
                "// waymark:begin id=a\n// waymark:begin id=b\n// waymark:end\n",
                MergeError::Nested { line: 2 },
            ),
            ("// waymark:begin id=a\nA\n", MergeError::Unterminated { line: 1 }),
            ("x\n// waymark:end\n", MergeError::UnexpectedEnd { line: 2 }),
            (
                "// waymark:begin name=a\n// waymark:end\n",
                MergeError::Malformed {
                    line: 1,
                    text: "// waymark:begin name=a".into(),
                },
            ),
            (
                "// waymark:begin id=a\n// waymark:end\n// waymark:begin id=a\n// waymark:end\n",
                MergeError::DuplicateId("a".into()),
            ),
        ];
        for (text, expected) in cases {
            assert_eq!(merge(text, &[]).unwrap_err(), expected, "for {text:?}");
        }
    }
}
