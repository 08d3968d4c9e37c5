//! Per-run execution context.

use std::collections::HashMap;

/// State carried through one run of a flow. Created when the run starts,
/// mutated only by the engine on the execution thread, dropped when the run
/// returns.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// `session_<unix seconds>`; correlates log rows with a run.
    pub session_id: String,
    pub module_id: String,
    pub flow_name: String,
    pub current_step: String,
    pub state: HashMap<String, String>,
    pub dry_run: bool,
    /// Row id of this run's `logs` entry.
    pub log_id: i64,
}

impl ExecutionContext {
    pub fn new(module_id: &str, flow_name: &str, start: &str, dry_run: bool) -> Self {
        ExecutionContext {
            session_id: format!("session_{}", chrono::Utc::now().timestamp()),
            module_id: module_id.to_string(),
            flow_name: flow_name.to_string(),
            current_step: start.to_string(),
            state: HashMap::new(),
            dry_run,
            log_id: 0,
        }
    }

    pub fn with_state(mut self, state: HashMap<String, String>) -> Self {
        self.state = state;
        self
    }
}
