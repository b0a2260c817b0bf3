//! IR program types: the compiled form of one Journey.

use serde::{Deserialize, Serialize};

use super::primitive::{MatchedPrimitive, Primitive};

/// The ordered, typed program built from one Journey.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IrProgram {
    pub journey_id: String,
    pub title: String,
    pub tier: String,
    pub scope: String,
    pub actor: String,
    pub tags: Vec<String>,
    pub modules: Vec<String>,

    pub setup: Vec<IrStep>,
    pub steps: Vec<IrStep>,
    pub cleanup: Vec<IrStep>,

    /// Completion-signal assertions, checked after the last step.
    pub completion: Vec<MatchedPrimitive>,

    /// Whole-test timeout override. Set only by healing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    pub stats: IrStats,

    /// Non-fatal notes gathered while matching (selector debt, skipped KB entries).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<String>,
}

impl IrProgram {
    /// Setup, main, then cleanup steps, in execution order.
    pub fn all_steps(&self) -> impl Iterator<Item = &IrStep> {
        self.setup.iter().chain(&self.steps).chain(&self.cleanup)
    }

    pub fn all_steps_mut(&mut self) -> impl Iterator<Item = &mut IrStep> {
        self.setup
            .iter_mut()
            .chain(self.steps.iter_mut())
            .chain(self.cleanup.iter_mut())
    }

    /// Every primitive in execution order, completion assertions last.
    pub fn primitives(&self) -> impl Iterator<Item = &MatchedPrimitive> {
        self.all_steps()
            .flat_map(|s| s.actions.iter().chain(&s.assertions))
            .chain(&self.completion)
    }

    pub fn step(&self, id: &str) -> Option<&IrStep> {
        self.all_steps().find(|s| s.id == id)
    }

    pub fn step_mut(&mut self, id: &str) -> Option<&mut IrStep> {
        self.all_steps_mut().find(|s| s.id == id)
    }
}

/// One step of the program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IrStep {
    pub id: String,
    pub description: String,

    /// Actions in authored order. Blocked instructions land here.
    pub actions: Vec<MatchedPrimitive>,

    /// Assertions in authored order, checked after the actions.
    pub assertions: Vec<MatchedPrimitive>,
}

impl IrStep {
    pub fn primitives(&self) -> impl Iterator<Item = &Primitive> {
        self.actions
            .iter()
            .chain(&self.assertions)
            .map(|m| &m.primitive)
    }

    pub fn is_blocked(&self) -> bool {
        self.primitives().any(Primitive::is_blocked)
    }

    /// Actions then assertions, mutably.
    pub fn primitives_mut(&mut self) -> impl Iterator<Item = &mut Primitive> {
        self.actions
            .iter_mut()
            .chain(self.assertions.iter_mut())
            .map(|m| &mut m.primitive)
    }
}

/// Per-Journey mapping statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IrStats {
    /// Instructions seen across setup, steps, and cleanup.
    pub instructions: usize,

    /// Instructions mapped to a real primitive.
    pub mapped: usize,

    /// Instructions that became `blocked` primitives.
    pub blocked: usize,

    /// Completion assertions appended to the program.
    pub completion: usize,

    /// Locators relying on raw structural css.
    pub selector_debt: usize,

    /// Primitives sourced from the knowledge base.
    pub knowledge_sourced: usize,
}
