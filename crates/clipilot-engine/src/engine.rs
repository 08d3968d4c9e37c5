//! The flow interpreter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use clipilot_core::module::{Flow, LogStatus, Step, StepType, DEFAULT_FLOW};
use clipilot_core::store::Store;
use clipilot_core::CoreError;

use crate::context::ExecutionContext;
use crate::shell::{self, Prompter};
use crate::template::expand;
use crate::EngineError;

/// Dispatch bound for one flow; authored cycles fail instead of spinning.
pub const STEP_CAP: u32 = 100;

/// How deep `run_module` actions may nest.
pub const MAX_DEPTH: usize = 8;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub dry_run: bool,
    pub auto_confirm: bool,
    /// Recorded in the run's log row; filled from a resolution when the run
    /// came out of a query.
    pub resolved_confidence: f64,
    pub resolved_method: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            dry_run: false,
            auto_confirm: false,
            resolved_confidence: 0.0,
            resolved_method: "manual".to_string(),
        }
    }
}

/// Summary of a completed run.
#[derive(Debug)]
pub struct RunReport {
    pub session_id: String,
    pub steps_executed: u32,
    /// Final run state, including keys written by branch-feeding setup.
    pub state: HashMap<String, String>,
    /// Messages the run printed, in order.
    pub transcript: Vec<String>,
}

pub struct Engine<'a> {
    store: &'a Store,
    prompter: &'a mut dyn Prompter,
    cancelled: Arc<AtomicBool>,
    options: EngineOptions,
    depth: usize,
}

impl<'a> Engine<'a> {
    pub fn new(store: &'a Store, prompter: &'a mut dyn Prompter, options: EngineOptions) -> Self {
        Engine {
            store,
            prompter,
            cancelled: Arc::new(AtomicBool::new(false)),
            options,
            depth: 0,
        }
    }

    /// Shares an externally owned cancellation flag (set from a SIGINT
    /// handler). The engine checks it at every loop head and after every
    /// shell command.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancelled = flag;
        self
    }

    /// Runs a module's flow with state seeded from the store's `state`
    /// table.
    pub fn run(&mut self, module_id: &str, flow_name: &str) -> Result<RunReport, EngineError> {
        let state = self.store.state_all()?;
        self.run_with_state(module_id, flow_name, state)
    }

    /// Runs a module's flow. `initial_state` wins over values persisted in
    /// the store's `state` table.
    pub fn run_with_state(
        &mut self,
        module_id: &str,
        flow_name: &str,
        initial_state: HashMap<String, String>,
    ) -> Result<RunReport, EngineError> {
        let module = self.store.get_module(module_id)?;
        let flow = module
            .flow(flow_name)
            .ok_or_else(|| {
                EngineError::Core(CoreError::NotFound(format!(
                    "flow '{}' in module '{}'",
                    flow_name, module_id
                )))
            })?
            .clone();

        let mut ctx = ExecutionContext::new(module_id, flow_name, &flow.start, self.options.dry_run)
            .with_state(initial_state);
        ctx.log_id = self.store.log_start(
            &ctx.session_id,
            module_id,
            self.options.resolved_confidence,
            &self.options.resolved_method,
        )?;

        let started = Instant::now();
        let mut transcript = Vec::new();
        let outcome = self.execute(&flow, &mut ctx, &mut transcript);
        let duration_ms = started.elapsed().as_millis() as i64;

        match outcome {
            Ok(steps_executed) => {
                self.store
                    .log_finish(ctx.log_id, LogStatus::Completed, None, duration_ms)?;
                Ok(RunReport {
                    session_id: ctx.session_id,
                    steps_executed,
                    state: ctx.state,
                    transcript,
                })
            }
            Err(EngineError::UserAborted) => {
                self.store.log_finish(
                    ctx.log_id,
                    LogStatus::Cancelled,
                    Some("cancelled by user"),
                    duration_ms,
                )?;
                Err(EngineError::UserAborted)
            }
            Err(e) => {
                let reason = e.to_string();
                self.store
                    .log_finish(ctx.log_id, LogStatus::Failed, Some(&reason), duration_ms)?;
                Err(e)
            }
        }
    }

    fn execute(
        &mut self,
        flow: &Flow,
        ctx: &mut ExecutionContext,
        transcript: &mut Vec<String>,
    ) -> Result<u32, EngineError> {
        let mut executed: u32 = 0;
        let mut branch_hops: u32 = 0;

        while !ctx.current_step.is_empty() {
            if self.cancelled.load(Ordering::SeqCst) {
                return Err(EngineError::UserAborted);
            }

            let step = flow.steps.get(&ctx.current_step).ok_or_else(|| {
                EngineError::StepFailure(format!("step '{}' not found", ctx.current_step))
            })?;

            // Branch transitions are exempt from the step cap but carry
            // their own identical guard: a branch-only cycle must still
            // terminate.
            if step.step_type == StepType::Branch {
                branch_hops += 1;
                if branch_hops > STEP_CAP {
                    return Err(EngineError::StepCapExceeded);
                }
            } else {
                executed += 1;
                if executed > STEP_CAP {
                    return Err(EngineError::StepCapExceeded);
                }
                branch_hops = 0;
            }

            if let Some(condition) = &step.condition {
                if !condition.evaluate(&ctx.state) {
                    ctx.current_step = step.next_key().to_string();
                    continue;
                }
            }

            match step.step_type {
                StepType::Instruction => {
                    self.run_instruction(step, ctx, transcript)?;
                    ctx.current_step = step.next_key().to_string();
                }
                StepType::Action => {
                    let target = step.run_module.as_deref().unwrap_or("");
                    self.run_subflow(target)?;
                    ctx.current_step = step.next_key().to_string();
                }
                StepType::Branch => {
                    ctx.current_step = branch_target(step, ctx)?;
                }
                StepType::Terminal => {
                    if let Some(message) = &step.message {
                        emit(transcript, expand(message, &ctx.state));
                    }
                    ctx.current_step.clear();
                }
            }
        }

        Ok(executed)
    }

    fn run_instruction(
        &mut self,
        step: &Step,
        ctx: &mut ExecutionContext,
        transcript: &mut Vec<String>,
    ) -> Result<(), EngineError> {
        if let Some(message) = &step.message {
            emit(transcript, expand(message, &ctx.state));
        }

        let command = match &step.command {
            Some(command) => expand(command, &ctx.state),
            None => return Ok(()),
        };

        if ctx.dry_run {
            emit(transcript, format!("[dry-run] {}", command));
            return Ok(());
        }

        if !self.options.auto_confirm {
            let confirmed = self
                .prompter
                .confirm(&format!("Run '{}'? [y/N] ", command))
                .map_err(|e| {
                    EngineError::StepFailure(format!("failed to read confirmation: {}", e))
                })?;
            if !confirmed {
                emit(transcript, format!("Skipped '{}'.", command));
                return Ok(());
            }
        }

        let output = shell::run(&command)?;
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(EngineError::UserAborted);
        }
        if !output.trimmed().is_empty() {
            emit(transcript, output.trimmed().to_string());
        }
        if !output.success() {
            return Err(EngineError::StepFailure(format!(
                "command exited with status {}",
                output.exit_code
            )));
        }

        for validation in step.validate.iter().flatten() {
            let check = expand(&validation.check_command, &ctx.state);
            let result = shell::run(&check)?;
            let passed = match &validation.expected {
                Some(expected) => result.combined.contains(expected),
                None => result.success(),
            };
            if !passed {
                return Err(EngineError::StepFailure(validation.error_message.clone()));
            }
        }

        Ok(())
    }

    /// Executes a `run_module` action with a fresh step budget and session,
    /// sharing store, options and the cancellation flag.
    fn run_subflow(&mut self, module_id: &str) -> Result<(), EngineError> {
        if self.depth + 1 > MAX_DEPTH {
            return Err(EngineError::RecursionLimit);
        }
        self.depth += 1;
        let result = self.run(module_id, DEFAULT_FLOW);
        self.depth -= 1;
        match result {
            Ok(_) => Ok(()),
            Err(EngineError::UserAborted) => Err(EngineError::UserAborted),
            Err(e) => Err(EngineError::SubflowFailure(
                module_id.to_string(),
                e.to_string(),
            )),
        }
    }
}

fn branch_target(step: &Step, ctx: &ExecutionContext) -> Result<String, EngineError> {
    let based_on = step.based_on.as_deref().unwrap_or("");
    let value = ctx.state.get(based_on).ok_or_else(|| {
        EngineError::StepFailure(format!("branch key '{}' missing from state", based_on))
    })?;
    if let Some(target) = step.map.as_ref().and_then(|m| m.get(value)) {
        return Ok(target.clone());
    }
    if let Some(default) = &step.default {
        return Ok(default.clone());
    }
    Err(EngineError::StepFailure(format!(
        "no branch mapping for value '{}'",
        value
    )))
}

fn emit(transcript: &mut Vec<String>, line: String) {
    println!("{}", line);
    transcript.push(line);
}
