//! Deterministic interpreter for module flows.
//!
//! The engine loads a module from the store, walks its step graph under a
//! fixed step cap, asks for confirmation before running shell commands,
//! honors dry-run, and records every run in the execution log.

pub mod context;
pub mod engine;
pub mod shell;
pub mod template;

pub use context::ExecutionContext;
pub use engine::{Engine, EngineOptions, RunReport};
pub use shell::{Prompter, StdinPrompter};

use clipilot_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A step's body failed: command error, missing branch mapping,
    /// failed validation, unknown step key.
    #[error("step failure: {0}")]
    StepFailure(String),

    /// A nested `run_module` flow failed.
    #[error("sub-flow '{0}' failed: {1}")]
    SubflowFailure(String, String),

    /// The run dispatched more steps than the cap allows.
    #[error("step cap of {} exceeded", engine::STEP_CAP)]
    StepCapExceeded,

    /// Sub-flows nested deeper than the recursion bound.
    #[error("sub-flow recursion deeper than {} levels", engine::MAX_DEPTH)]
    RecursionLimit,

    /// The user interrupted the run.
    #[error("run cancelled")]
    UserAborted,

    #[error(transparent)]
    Core(#[from] CoreError),
}
