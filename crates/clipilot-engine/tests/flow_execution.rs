use std::collections::HashMap;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clipilot_core::loader;
use clipilot_core::store::Store;
use clipilot_engine::{Engine, EngineError, EngineOptions, Prompter};
use tempfile::tempdir;

/// Prompter scripted with canned answers; records the prompts it saw.
struct ScriptedPrompter {
    answers: Vec<bool>,
    prompts: Vec<String>,
}

impl ScriptedPrompter {
    fn new(answers: &[bool]) -> Self {
        ScriptedPrompter {
            answers: answers.to_vec(),
            prompts: Vec::new(),
        }
    }
}

impl Prompter for ScriptedPrompter {
    fn confirm(&mut self, prompt: &str) -> std::io::Result<bool> {
        self.prompts.push(prompt.to_string());
        if self.answers.is_empty() {
            Ok(false)
        } else {
            Ok(self.answers.remove(0))
        }
    }
}

fn store_with(yamls: &[&str]) -> Store {
    let mut store = Store::open_in_memory().unwrap();
    for yaml in yamls {
        let module = loader::parse(yaml.as_bytes()).unwrap();
        loader::import(&mut store, &module).unwrap();
    }
    store
}

fn auto_confirm() -> EngineOptions {
    EngineOptions {
        auto_confirm: true,
        ..EngineOptions::default()
    }
}

fn state(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn branch_follows_state_to_terminal() {
    let store = store_with(&[r#"
id: dev.clipilot.os-setup
name: OS Setup
version: 1.0.0
flows:
  main:
    start: pick
    steps:
      pick:
        type: branch
        based_on: os
        map:
          linux: linux_setup
          darwin: darwin_setup
      linux_setup:
        type: instruction
        message: "configuring for linux"
        next: done
      darwin_setup:
        type: instruction
        message: "configuring for darwin"
        next: done
      done:
        type: terminal
        message: "Setup complete"
"#]);

    let mut prompter = ScriptedPrompter::new(&[]);
    let mut engine = Engine::new(&store, &mut prompter, auto_confirm());
    let report = engine
        .run_with_state("dev.clipilot.os-setup", "main", state(&[("os", "linux")]))
        .unwrap();

    assert!(report.transcript.contains(&"configuring for linux".to_string()));
    assert_eq!(report.transcript.last().unwrap(), "Setup complete");

    let logs = store.recent_logs(1).unwrap();
    assert_eq!(logs[0].status, "completed");
}

#[test]
fn cyclic_flow_hits_step_cap() {
    let store = store_with(&[r#"
id: dev.clipilot.loopy
name: Loopy
version: 1.0.0
flows:
  main:
    start: a
    steps:
      a:
        type: instruction
        message: "ping"
        next: b
      b:
        type: instruction
        message: "pong"
        next: a
"#]);

    let mut prompter = ScriptedPrompter::new(&[]);
    let mut engine = Engine::new(&store, &mut prompter, auto_confirm());
    let err = engine.run("dev.clipilot.loopy", "main").unwrap_err();
    assert!(matches!(err, EngineError::StepCapExceeded));

    let logs = store.recent_logs(1).unwrap();
    assert_eq!(logs[0].status, "failed");
    assert!(logs[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("step cap"));
}

#[test]
fn dry_run_executes_nothing_but_logs_the_run() {
    let dir = tempdir().unwrap();
    let sentinel = dir.path().join("precious.txt");
    fs::write(&sentinel, "keep me").unwrap();

    let yaml = format!(
        r#"
id: dev.clipilot.wipe
name: Wipe
version: 1.0.0
flows:
  main:
    start: wipe
    steps:
      wipe:
        type: instruction
        command: "rm -f {}"
        validate:
          - check_command: "ls {}"
            expected: "precious"
            error_message: "file is gone"
"#,
        sentinel.display(),
        sentinel.display()
    );
    let store = store_with(&[&yaml]);

    let mut prompter = ScriptedPrompter::new(&[]);
    let options = EngineOptions {
        dry_run: true,
        ..auto_confirm()
    };
    let mut engine = Engine::new(&store, &mut prompter, options);
    let report = engine.run("dev.clipilot.wipe", "main").unwrap();

    assert!(sentinel.exists(), "dry-run must not touch the filesystem");
    assert!(report.transcript.iter().any(|l| l.starts_with("[dry-run]")));
    // No confirmation, no validation command in dry-run.
    assert!(prompter.prompts.is_empty());

    let logs = store.recent_logs(1).unwrap();
    assert_eq!(logs[0].status, "completed");
}

#[test]
fn declined_confirmation_skips_without_failing() {
    let dir = tempdir().unwrap();
    let sentinel = dir.path().join("precious.txt");
    fs::write(&sentinel, "keep me").unwrap();

    let yaml = format!(
        r#"
id: dev.clipilot.cautious
name: Cautious
version: 1.0.0
flows:
  main:
    start: wipe
    steps:
      wipe:
        type: instruction
        command: "rm -f {}"
        next: done
      done:
        type: terminal
        message: "finished"
"#,
        sentinel.display()
    );
    let store = store_with(&[&yaml]);

    let mut prompter = ScriptedPrompter::new(&[false]);
    let mut engine = Engine::new(&store, &mut prompter, EngineOptions::default());
    let report = engine.run("dev.clipilot.cautious", "main").unwrap();

    assert!(sentinel.exists());
    assert_eq!(prompter.prompts.len(), 1);
    assert!(prompter.prompts[0].contains("[y/N]"));
    assert_eq!(report.transcript.last().unwrap(), "finished");
}

#[test]
fn confirmed_command_runs() {
    let dir = tempdir().unwrap();
    let marker = dir.path().join("ran.txt");

    let yaml = format!(
        r#"
id: dev.clipilot.writer
name: Writer
version: 1.0.0
flows:
  main:
    start: write
    steps:
      write:
        type: instruction
        command: "echo done > {}"
"#,
        marker.display()
    );
    let store = store_with(&[&yaml]);

    let mut prompter = ScriptedPrompter::new(&[true]);
    let mut engine = Engine::new(&store, &mut prompter, EngineOptions::default());
    engine.run("dev.clipilot.writer", "main").unwrap();

    assert!(marker.exists());
}

#[test]
fn unmapped_branch_value_fails_loudly() {
    let store = store_with(&[r#"
id: dev.clipilot.strict-branch
name: Strict Branch
version: 1.0.0
flows:
  main:
    start: pick
    steps:
      pick:
        type: branch
        based_on: os
        map:
          linux: done
      done:
        type: terminal
"#]);

    let mut prompter = ScriptedPrompter::new(&[]);
    let mut engine = Engine::new(&store, &mut prompter, auto_confirm());
    let err = engine
        .run_with_state("dev.clipilot.strict-branch", "main", state(&[("os", "plan9")]))
        .unwrap_err();
    match err {
        EngineError::StepFailure(msg) => assert!(msg.contains("no branch mapping")),
        other => panic!("expected StepFailure, got {}", other),
    }
}

#[test]
fn branch_without_state_key_fails() {
    let store = store_with(&[r#"
id: dev.clipilot.keyless
name: Keyless
version: 1.0.0
flows:
  main:
    start: pick
    steps:
      pick:
        type: branch
        based_on: os
        map:
          linux: done
      done:
        type: terminal
"#]);

    let mut prompter = ScriptedPrompter::new(&[]);
    let mut engine = Engine::new(&store, &mut prompter, auto_confirm());
    let err = engine.run("dev.clipilot.keyless", "main").unwrap_err();
    match err {
        EngineError::StepFailure(msg) => assert!(msg.contains("missing from state")),
        other => panic!("expected StepFailure, got {}", other),
    }
}

#[test]
fn branch_default_catches_unmapped_values() {
    let store = store_with(&[r#"
id: dev.clipilot.defaulted
name: Defaulted
version: 1.0.0
flows:
  main:
    start: pick
    steps:
      pick:
        type: branch
        based_on: os
        map:
          linux: done
        default: fallback
      fallback:
        type: terminal
        message: "generic setup"
      done:
        type: terminal
"#]);

    let mut prompter = ScriptedPrompter::new(&[]);
    let mut engine = Engine::new(&store, &mut prompter, auto_confirm());
    let report = engine
        .run_with_state("dev.clipilot.defaulted", "main", state(&[("os", "plan9")]))
        .unwrap();
    assert_eq!(report.transcript.last().unwrap(), "generic setup");
}

#[test]
fn failing_validation_aborts_with_its_message() {
    let store = store_with(&[r#"
id: dev.clipilot.validated
name: Validated
version: 1.0.0
flows:
  main:
    start: check
    steps:
      check:
        type: instruction
        command: "echo ok"
        validate:
          - check_command: "echo ready"
            expected: "ready"
            error_message: "first check must pass"
          - check_command: "echo nope"
            expected: "service-up"
            error_message: "service is not running"
        next: done
      done:
        type: terminal
"#]);

    let mut prompter = ScriptedPrompter::new(&[]);
    let mut engine = Engine::new(&store, &mut prompter, auto_confirm());
    let err = engine.run("dev.clipilot.validated", "main").unwrap_err();
    match err {
        EngineError::StepFailure(msg) => assert_eq!(msg, "service is not running"),
        other => panic!("expected StepFailure, got {}", other),
    }

    let logs = store.recent_logs(1).unwrap();
    assert_eq!(logs[0].status, "failed");
    assert!(logs[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("service is not running"));
}

#[test]
fn failing_command_fails_the_step() {
    let store = store_with(&[r#"
id: dev.clipilot.doomed
name: Doomed
version: 1.0.0
flows:
  main:
    start: boom
    steps:
      boom:
        type: instruction
        command: "exit 7"
"#]);

    let mut prompter = ScriptedPrompter::new(&[]);
    let mut engine = Engine::new(&store, &mut prompter, auto_confirm());
    let err = engine.run("dev.clipilot.doomed", "main").unwrap_err();
    match err {
        EngineError::StepFailure(msg) => assert!(msg.contains("status 7")),
        other => panic!("expected StepFailure, got {}", other),
    }
}

#[test]
fn false_condition_skips_the_body() {
    let store = store_with(&[r#"
id: dev.clipilot.conditional
name: Conditional
version: 1.0.0
flows:
  main:
    start: maybe
    steps:
      maybe:
        type: instruction
        command: "exit 1"
        condition:
          state_key: enabled
          operator: eq
          value: "yes"
        next: done
      done:
        type: terminal
        message: "skipped cleanly"
"#]);

    let mut prompter = ScriptedPrompter::new(&[]);
    let mut engine = Engine::new(&store, &mut prompter, auto_confirm());
    let report = engine.run("dev.clipilot.conditional", "main").unwrap();
    assert_eq!(report.transcript.last().unwrap(), "skipped cleanly");
}

#[test]
fn template_tokens_expand_from_state() {
    let store = store_with(&[r#"
id: dev.clipilot.templated
name: Templated
version: 1.0.0
flows:
  main:
    start: greet
    steps:
      greet:
        type: instruction
        message: "deploying to {{.env}} (region {{.region}})"
"#]);

    let mut prompter = ScriptedPrompter::new(&[]);
    let mut engine = Engine::new(&store, &mut prompter, auto_confirm());
    let report = engine
        .run_with_state("dev.clipilot.templated", "main", state(&[("env", "staging")]))
        .unwrap();
    assert_eq!(report.transcript[0], "deploying to staging (region )");
}

#[test]
fn action_runs_sub_module() {
    let child = r#"
id: dev.clipilot.child
name: Child
version: 1.0.0
flows:
  main:
    start: done
    steps:
      done:
        type: terminal
        message: "child finished"
"#;
    let parent = r#"
id: dev.clipilot.parent
name: Parent
version: 1.0.0
flows:
  main:
    start: delegate
    steps:
      delegate:
        type: action
        run_module: dev.clipilot.child
        next: done
      done:
        type: terminal
        message: "parent finished"
"#;
    let store = store_with(&[child, parent]);

    let mut prompter = ScriptedPrompter::new(&[]);
    let mut engine = Engine::new(&store, &mut prompter, auto_confirm());
    let report = engine.run("dev.clipilot.parent", "main").unwrap();
    assert_eq!(report.transcript.last().unwrap(), "parent finished");

    // Parent and child runs each log their own session.
    let logs = store.recent_logs(10).unwrap();
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|l| l.status == "completed"));
}

#[test]
fn missing_sub_module_is_a_subflow_failure() {
    let store = store_with(&[r#"
id: dev.clipilot.orphan
name: Orphan
version: 1.0.0
flows:
  main:
    start: delegate
    steps:
      delegate:
        type: action
        run_module: dev.clipilot.absent
"#]);

    let mut prompter = ScriptedPrompter::new(&[]);
    let mut engine = Engine::new(&store, &mut prompter, auto_confirm());
    let err = engine.run("dev.clipilot.orphan", "main").unwrap_err();
    assert!(matches!(err, EngineError::SubflowFailure(_, _)));
}

#[test]
fn self_recursive_module_hits_depth_bound() {
    let store = store_with(&[r#"
id: dev.clipilot.ouroboros
name: Ouroboros
version: 1.0.0
flows:
  main:
    start: again
    steps:
      again:
        type: action
        run_module: dev.clipilot.ouroboros
"#]);

    let mut prompter = ScriptedPrompter::new(&[]);
    let mut engine = Engine::new(&store, &mut prompter, auto_confirm());
    let err = engine.run("dev.clipilot.ouroboros", "main").unwrap_err();
    match err {
        EngineError::SubflowFailure(_, reason) => assert!(reason.contains("recursion")),
        other => panic!("expected SubflowFailure, got {}", other),
    }
}

#[test]
fn dangling_step_reference_fails_at_runtime() {
    // Bypasses the loader on purpose: the store accepts what it is given,
    // the engine must still fail with a typed step-not-found error.
    let mut store = Store::open_in_memory().unwrap();
    let module = loader::parse(
        r#"
id: dev.clipilot.dangling
name: Dangling
version: 1.0.0
flows:
  main:
    start: gone
    steps:
      here:
        type: terminal
"#
        .as_bytes(),
    )
    .unwrap();
    store.import_module(&module, &[]).unwrap();

    let mut prompter = ScriptedPrompter::new(&[]);
    let mut engine = Engine::new(&store, &mut prompter, auto_confirm());
    let err = engine.run("dev.clipilot.dangling", "main").unwrap_err();
    match err {
        EngineError::StepFailure(msg) => assert!(msg.contains("not found")),
        other => panic!("expected StepFailure, got {}", other),
    }
}

#[test]
fn cancellation_flag_marks_run_cancelled() {
    let store = store_with(&[r#"
id: dev.clipilot.interruptible
name: Interruptible
version: 1.0.0
flows:
  main:
    start: work
    steps:
      work:
        type: instruction
        message: "working"
"#]);

    let flag = Arc::new(AtomicBool::new(false));
    flag.store(true, Ordering::SeqCst);

    let mut prompter = ScriptedPrompter::new(&[]);
    let mut engine =
        Engine::new(&store, &mut prompter, auto_confirm()).with_cancel_flag(flag);
    let err = engine.run("dev.clipilot.interruptible", "main").unwrap_err();
    assert!(matches!(err, EngineError::UserAborted));

    let logs = store.recent_logs(1).unwrap();
    assert_eq!(logs[0].status, "cancelled");
    assert!(logs[0].duration_ms.is_some());
}

#[test]
fn state_table_seeds_run_state() {
    let store = store_with(&[r#"
id: dev.clipilot.seeded
name: Seeded
version: 1.0.0
flows:
  main:
    start: pick
    steps:
      pick:
        type: branch
        based_on: os
        map:
          linux: done
      done:
        type: terminal
        message: "seeded fine"
"#]);
    store.state_set("os", "linux").unwrap();

    let mut prompter = ScriptedPrompter::new(&[]);
    let mut engine = Engine::new(&store, &mut prompter, auto_confirm());
    let report = engine.run("dev.clipilot.seeded", "main").unwrap();
    assert_eq!(report.transcript.last().unwrap(), "seeded fine");
}

#[test]
fn missing_module_is_not_found() {
    let store = Store::open_in_memory().unwrap();
    let mut prompter = ScriptedPrompter::new(&[]);
    let mut engine = Engine::new(&store, &mut prompter, auto_confirm());
    let err = engine.run("dev.clipilot.nowhere", "main").unwrap_err();
    assert!(matches!(
        err,
        EngineError::Core(clipilot_core::CoreError::NotFound(_))
    ));
}
