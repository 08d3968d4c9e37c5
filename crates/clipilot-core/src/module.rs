//! The module data model: a declarative, versioned workflow package.
//!
//! A module file is YAML at rest (semantically a JSON-shaped tree):
//! - Identity and metadata (`id`, `version`, `name`, `description`, `tags`,
//!   `provides`, `requires`, `size_kb`, `author`)
//! - A `flows` mapping from flow name (conventionally `main`) to a step graph
//!
//! Structural parsing accepts only known fields; shape rules that depend on
//! the step type (a branch needs a `map`, an action needs `run_module`, ...)
//! are enforced by `loader::validate` after parsing, so one defective field
//! produces one understandable error instead of a serde trace.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The flow invoked when a caller does not name one.
pub const DEFAULT_FLOW: &str = "main";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Module {
    /// Globally unique reverse-DNS identifier (e.g. `dev.clipilot.setup`).
    pub id: String,

    /// Human-readable display name.
    pub name: String,

    /// Semver version string.
    pub version: String,

    #[serde(default)]
    pub description: String,

    /// Short labels used by the resolver as high-weight patterns.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Capability ids this module provides.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provides: Vec<String>,

    /// Module ids that must be installed before this one can run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_kb: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    /// Named flows; `main` is the entry point.
    pub flows: HashMap<String, Flow>,
}

impl Module {
    /// Returns the flow a run should start from.
    pub fn flow(&self, name: &str) -> Option<&Flow> {
        self.flows.get(name)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Flow {
    /// Key of the first step; must exist in `steps`.
    pub start: String,

    pub steps: HashMap<String, Step>,
}

/// Closed set of step kinds. Unknown `type` strings fail at parse time.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Action,
    Instruction,
    Branch,
    Terminal,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Action => "action",
            StepType::Instruction => "instruction",
            StepType::Branch => "branch",
            StepType::Terminal => "terminal",
        }
    }
}

/// A single node of a flow graph.
///
/// The schema keeps one struct for all four kinds with the kind-dependent
/// fields optional; which combinations are legal is checked during
/// validation. `key` is derived from the map key after parsing and is never
/// read from the file.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Step {
    #[serde(rename = "type")]
    pub step_type: StepType,

    /// Derived: the key this step is stored under in `Flow::steps`.
    #[serde(default, skip_serializing, skip_deserializing)]
    pub key: String,

    /// Printed before the step body runs (instruction, terminal).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Shell text executed by an instruction step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Module id invoked as a sub-flow by an action step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_module: Option<String>,

    /// State key a branch step dispatches on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub based_on: Option<String>,

    /// Branch value -> next step key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<HashMap<String, String>>,

    /// Branch fallback when the value has no mapping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    /// Next step key for instruction and action steps; empty ends the flow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,

    /// Post-command checks, run in declared order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validate: Option<Vec<Validation>>,

    /// When present and false over the current state, the step body is
    /// skipped and control moves to `next`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

impl Step {
    /// `next` with the empty-string-terminates convention applied.
    pub fn next_key(&self) -> &str {
        self.next.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Validation {
    pub check_command: String,

    /// Required substring of the check's combined output, when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,

    pub error_message: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Condition {
    pub state_key: String,
    pub operator: ConditionOperator,
    pub value: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConditionOperator {
    Eq,
    Ne,
    Contains,
}

impl Condition {
    /// Evaluates against a state map. A missing state key is false.
    pub fn evaluate(&self, state: &HashMap<String, String>) -> bool {
        match state.get(&self.state_key) {
            None => false,
            Some(actual) => match self.operator {
                ConditionOperator::Eq => actual == &self.value,
                ConditionOperator::Ne => actual != &self.value,
                ConditionOperator::Contains => actual.contains(&self.value),
            },
        }
    }
}

/// A derived search-index row. Regenerated from the module on every import.
#[derive(Debug, Clone, PartialEq)]
pub struct IntentPattern {
    pub module_id: String,
    pub pattern: String,
    pub weight: f64,
    pub pattern_type: PatternType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternType {
    Keyword,
    Tag,
    Command,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::Keyword => "keyword",
            PatternType::Tag => "tag",
            PatternType::Command => "command",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "keyword" => Some(PatternType::Keyword),
            "tag" => Some(PatternType::Tag),
            "command" => Some(PatternType::Command),
            _ => None,
        }
    }
}

/// A system-command inventory row.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEntry {
    pub name: String,
    pub description: String,
    pub has_man: bool,
    pub category: Option<String>,
    pub keywords: Vec<String>,
    /// False for known-but-not-installed entries from the registry.
    pub installed: bool,
}

/// Terminal status of one logged run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStatus {
    Started,
    Completed,
    Failed,
    Cancelled,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Started => "started",
            LogStatus::Completed => "completed",
            LogStatus::Failed => "failed",
            LogStatus::Cancelled => "cancelled",
        }
    }
}

/// One row of execution history.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub id: i64,
    pub ts: String,
    pub session_id: String,
    pub resolved_module: String,
    pub confidence: f64,
    pub method: String,
    pub status: String,
    pub error_message: Option<String>,
    pub duration_ms: Option<i64>,
}
