//! Journey types: the parsed form of one end-to-end scenario.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A parsed Journey.
///
/// Created by the parser and never mutated afterwards.
/// Every `analyze` re-parses from the source text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JourneyDocument {
    pub id: String,
    pub title: String,
    pub tier: String,
    pub scope: String,
    pub actor: String,
    pub tags: Vec<String>,

    /// Steps in authored order.
    pub steps: Vec<Step>,

    /// Steps run before the main steps. Often empty.
    pub setup: Vec<Step>,

    /// Steps run after the main steps. Often empty.
    pub cleanup: Vec<Step>,

    /// Signals that the Journey reached its goal, asserted after the last step.
    pub completion: Vec<CompletionSignal>,

    /// Reusable modules this Journey depends on.
    pub modules: Vec<String>,

    /// Where the text came from.
    pub source: SourceInfo,
}

/// One authored step.
///
/// A plain list item is a step with a single instruction.
/// A `### ` heading groups the list items below it into one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Positional id: `step-1`, `setup-2`, `cleanup-1`.
    pub id: String,
    pub description: String,

    /// Raw instruction lines, each mapped independently.
    pub instructions: Vec<String>,
}

/// A completion signal: kind plus expected value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionSignal {
    pub kind: CompletionKind,
    pub value: String,
}

/// What a completion signal checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompletionKind {
    /// The page URL matches.
    UrlMatch,

    /// Some text is visible.
    VisibleText,

    /// Some text is not visible.
    HiddenText,

    /// The page title matches.
    Title,

    /// A toast notification with this text appears.
    Toast,
}

/// Provenance of a parsed document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Hex SHA-256 of the source text.
    pub sha256: String,
}
