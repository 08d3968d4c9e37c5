use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn init(db: &Path) {
    Command::cargo_bin("clipilot")
        .unwrap()
        .args(["--db-path", db.to_str().unwrap(), "init"])
        .assert()
        .success();
}

const GREETER: &str = r#"
id: dev.clipilot.greeter
name: Greeter
version: 1.0.0
description: Prints a friendly greeting
tags: [greeting]
flows:
  main:
    start: greet
    steps:
      greet:
        type: instruction
        message: "about to greet"
        command: "echo hello from clipilot"
        next: done
      done:
        type: terminal
        message: "all done"
"#;

#[test]
fn load_then_list_then_show() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("clipilot.db");
    init(&db);

    let modules_dir = dir.path().join("modules");
    fs::create_dir_all(&modules_dir).unwrap();
    fs::write(modules_dir.join("greeter.yml"), GREETER).unwrap();

    Command::cargo_bin("clipilot")
        .unwrap()
        .args([
            "--db-path",
            db.to_str().unwrap(),
            "load",
            modules_dir.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Imported dev.clipilot.greeter"));

    Command::cargo_bin("clipilot")
        .unwrap()
        .args(["--db-path", db.to_str().unwrap(), "modules", "ls"])
        .assert()
        .success()
        .stdout(predicate::str::contains("dev.clipilot.greeter"));

    Command::cargo_bin("clipilot")
        .unwrap()
        .args([
            "--db-path",
            db.to_str().unwrap(),
            "modules",
            "show",
            "dev.clipilot.greeter",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Prints a friendly greeting"));
}

#[test]
fn malformed_module_fails_the_load() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("clipilot.db");
    init(&db);

    let modules_dir = dir.path().join("modules");
    fs::create_dir_all(&modules_dir).unwrap();
    let broken = GREETER.replace("start: greet", "start: missing");
    fs::write(modules_dir.join("broken.yml"), broken).unwrap();

    Command::cargo_bin("clipilot")
        .unwrap()
        .args([
            "--db-path",
            db.to_str().unwrap(),
            "load",
            modules_dir.to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Rejected"));
}

#[test]
fn run_with_auto_yes_executes_the_flow() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("clipilot.db");
    init(&db);

    let modules_dir = dir.path().join("modules");
    fs::create_dir_all(&modules_dir).unwrap();
    fs::write(modules_dir.join("greeter.yml"), GREETER).unwrap();
    Command::cargo_bin("clipilot")
        .unwrap()
        .args([
            "--db-path",
            db.to_str().unwrap(),
            "load",
            modules_dir.to_str().unwrap(),
        ])
        .assert()
        .success();

    Command::cargo_bin("clipilot")
        .unwrap()
        .args([
            "--db-path",
            db.to_str().unwrap(),
            "--yes",
            "run",
            "dev.clipilot.greeter",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("hello from clipilot"))
        .stdout(predicate::str::contains("all done"));

    Command::cargo_bin("clipilot")
        .unwrap()
        .args(["--db-path", db.to_str().unwrap(), "history"])
        .assert()
        .success()
        .stdout(predicate::str::contains("dev.clipilot.greeter"))
        .stdout(predicate::str::contains("completed"));
}

#[test]
fn dry_run_prints_instead_of_executing() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("clipilot.db");
    init(&db);

    let sentinel = dir.path().join("sentinel.txt");
    fs::write(&sentinel, "precious").unwrap();

    let module = format!(
        r#"
id: dev.clipilot.destroyer
name: Destroyer
version: 1.0.0
flows:
  main:
    start: wipe
    steps:
      wipe:
        type: instruction
        command: "rm -f {}"
"#,
        sentinel.display()
    );
    let modules_dir = dir.path().join("modules");
    fs::create_dir_all(&modules_dir).unwrap();
    fs::write(modules_dir.join("destroyer.yml"), module).unwrap();
    Command::cargo_bin("clipilot")
        .unwrap()
        .args([
            "--db-path",
            db.to_str().unwrap(),
            "load",
            modules_dir.to_str().unwrap(),
        ])
        .assert()
        .success();

    Command::cargo_bin("clipilot")
        .unwrap()
        .args([
            "--db-path",
            db.to_str().unwrap(),
            "--dry-run",
            "--yes",
            "run",
            "dev.clipilot.destroyer",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("[dry-run]"));

    assert!(sentinel.exists());
}

#[test]
fn declining_the_prompt_skips_the_command() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("clipilot.db");
    init(&db);

    let modules_dir = dir.path().join("modules");
    fs::create_dir_all(&modules_dir).unwrap();
    fs::write(modules_dir.join("greeter.yml"), GREETER).unwrap();
    Command::cargo_bin("clipilot")
        .unwrap()
        .args([
            "--db-path",
            db.to_str().unwrap(),
            "load",
            modules_dir.to_str().unwrap(),
        ])
        .assert()
        .success();

    Command::cargo_bin("clipilot")
        .unwrap()
        .args([
            "--db-path",
            db.to_str().unwrap(),
            "run",
            "dev.clipilot.greeter",
        ])
        .write_stdin("n\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Skipped"))
        .stdout(predicate::str::contains("all done"));
}

#[test]
fn failing_module_surfaces_nonzero_exit() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("clipilot.db");
    init(&db);

    let module = r#"
id: dev.clipilot.failing
name: Failing
version: 1.0.0
flows:
  main:
    start: boom
    steps:
      boom:
        type: instruction
        command: "exit 9"
"#;
    let modules_dir = dir.path().join("modules");
    fs::create_dir_all(&modules_dir).unwrap();
    fs::write(modules_dir.join("failing.yml"), module).unwrap();
    Command::cargo_bin("clipilot")
        .unwrap()
        .args([
            "--db-path",
            db.to_str().unwrap(),
            "load",
            modules_dir.to_str().unwrap(),
        ])
        .assert()
        .success();

    Command::cargo_bin("clipilot")
        .unwrap()
        .args([
            "--db-path",
            db.to_str().unwrap(),
            "--yes",
            "run",
            "dev.clipilot.failing",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("step failure"));
}

#[test]
fn removing_a_module_requires_confirmation() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("clipilot.db");
    init(&db);

    let modules_dir = dir.path().join("modules");
    fs::create_dir_all(&modules_dir).unwrap();
    fs::write(modules_dir.join("greeter.yml"), GREETER).unwrap();
    Command::cargo_bin("clipilot")
        .unwrap()
        .args([
            "--db-path",
            db.to_str().unwrap(),
            "load",
            modules_dir.to_str().unwrap(),
        ])
        .assert()
        .success();

    // Declined: module stays.
    Command::cargo_bin("clipilot")
        .unwrap()
        .args([
            "--db-path",
            db.to_str().unwrap(),
            "modules",
            "rm",
            "dev.clipilot.greeter",
        ])
        .write_stdin("n\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("cancelled"));

    // --yes removes without asking.
    Command::cargo_bin("clipilot")
        .unwrap()
        .args([
            "--db-path",
            db.to_str().unwrap(),
            "--yes",
            "modules",
            "rm",
            "dev.clipilot.greeter",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed"));

    Command::cargo_bin("clipilot")
        .unwrap()
        .args(["--db-path", db.to_str().unwrap(), "modules", "ls"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No modules installed"));
}
