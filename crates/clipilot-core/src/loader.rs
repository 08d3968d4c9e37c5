//! Parsing, validation and import of module files.
//!
//! A module travels source bytes -> `parse` -> `validate` -> `import`; any
//! failure along the way aborts the whole operation, so the store either
//! contains the complete module with all derived rows or nothing of it.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{CoreError, Result};
use crate::module::{IntentPattern, Module, PatternType, StepType};
use crate::store::{populate_step_keys, Store};

/// Parses module bytes (YAML, or the JSON subset of it) into a `Module`.
///
/// Only known fields are accepted and the `type` discriminator must be one of
/// the four step kinds; everything else is a `ParseError`. Step keys are
/// populated from their map keys, and `provides`/`requires` are deduplicated
/// (they are set-semantic).
pub fn parse(bytes: &[u8]) -> Result<Module> {
    let mut module: Module =
        serde_yaml::from_slice(bytes).map_err(|e| CoreError::Parse(e.to_string()))?;
    populate_step_keys(&mut module);
    dedup_in_place(&mut module.provides);
    dedup_in_place(&mut module.requires);
    Ok(module)
}

/// Enforces the flow-graph and metadata invariants.
pub fn validate(module: &Module) -> Result<()> {
    if !is_reverse_dns(&module.id) {
        return Err(CoreError::Validation(format!(
            "module id '{}' is not a reverse-DNS identifier",
            module.id
        )));
    }
    if module.version.trim().is_empty() {
        return Err(CoreError::Validation(format!(
            "module '{}' has an empty version",
            module.id
        )));
    }
    if module.flows.is_empty() {
        return Err(CoreError::Validation(format!(
            "module '{}' defines no flows",
            module.id
        )));
    }

    for (flow_name, flow) in &module.flows {
        if !flow.steps.contains_key(&flow.start) {
            return Err(CoreError::Validation(format!(
                "flow '{}' of '{}': start step '{}' is not in steps",
                flow_name, module.id, flow.start
            )));
        }

        for (step_key, step) in &flow.steps {
            let place = format!("step '{}' of flow '{}' in '{}'", step_key, flow_name, module.id);

            match step.step_type {
                StepType::Branch => {
                    let based_on = step.based_on.as_deref().unwrap_or("");
                    if based_on.is_empty() {
                        return Err(CoreError::Validation(format!(
                            "{}: branch has no based_on key",
                            place
                        )));
                    }
                    let map = step.map.as_ref().filter(|m| !m.is_empty());
                    let map = match map {
                        Some(map) => map,
                        None => {
                            return Err(CoreError::Validation(format!(
                                "{}: branch has an empty map",
                                place
                            )));
                        }
                    };
                    for (value, target) in map {
                        check_target(flow, target).map_err(|_| {
                            CoreError::Validation(format!(
                                "{}: branch maps '{}' to unknown step '{}'",
                                place, value, target
                            ))
                        })?;
                    }
                    if let Some(default) = &step.default {
                        check_target(flow, default).map_err(|_| {
                            CoreError::Validation(format!(
                                "{}: branch default points at unknown step '{}'",
                                place, default
                            ))
                        })?;
                    }
                }
                StepType::Action => {
                    if step.run_module.as_deref().unwrap_or("").is_empty() {
                        return Err(CoreError::Validation(format!(
                            "{}: action has no run_module",
                            place
                        )));
                    }
                }
                StepType::Instruction | StepType::Terminal => {}
            }

            if let Some(next) = &step.next {
                check_target(flow, next).map_err(|_| {
                    CoreError::Validation(format!(
                        "{}: next points at unknown step '{}'",
                        place, next
                    ))
                })?;
            }
        }
    }

    Ok(())
}

fn check_target(flow: &crate::module::Flow, target: &str) -> std::result::Result<(), ()> {
    if target.is_empty() || flow.steps.contains_key(target) {
        Ok(())
    } else {
        Err(())
    }
}

/// Derives the weighted search patterns for a module.
///
/// Deterministic and a pure function of the module: name tokens weigh 1.5,
/// description tokens 1.0, tags 2.0, id segments 1.0. Duplicate
/// (pattern, type) pairs keep the highest weight.
pub fn derive_patterns(module: &Module) -> Vec<IntentPattern> {
    let mut best: HashMap<(String, &'static str), (f64, PatternType)> = HashMap::new();
    let mut put = |pattern: String, weight: f64, pattern_type: PatternType| {
        let key = (pattern, pattern_type.as_str());
        let entry = best.entry(key).or_insert((weight, pattern_type));
        if weight > entry.0 {
            entry.0 = weight;
        }
    };

    for token in split_words(&module.name) {
        put(token, 1.5, PatternType::Keyword);
    }
    for token in split_words(&module.description) {
        put(token, 1.0, PatternType::Keyword);
    }
    for tag in &module.tags {
        put(tag.to_lowercase(), 2.0, PatternType::Tag);
    }
    for segment in module.id.split('.') {
        if segment.len() > 2 {
            put(segment.to_lowercase(), 1.0, PatternType::Keyword);
        }
    }

    let mut patterns: Vec<IntentPattern> = best
        .into_iter()
        .map(|((pattern, _), (weight, pattern_type))| IntentPattern {
            module_id: module.id.clone(),
            pattern,
            weight,
            pattern_type,
        })
        .collect();
    patterns.sort_by(|a, b| {
        a.pattern
            .cmp(&b.pattern)
            .then_with(|| a.pattern_type.as_str().cmp(b.pattern_type.as_str()))
    });
    patterns
}

/// Splits on whitespace, `_` and `-`, lowercases, drops tokens shorter
/// than 3 characters.
fn split_words(text: &str) -> Vec<String> {
    text.split(|c: char| c.is_whitespace() || c == '_' || c == '-')
        .map(|t| t.to_lowercase())
        .filter(|t| t.len() >= 3)
        .collect()
}

/// Validates and imports a module within one transaction.
///
/// Rejects a `requires` graph that would become cyclic with this module
/// installed; the store is untouched on any failure.
pub fn import(store: &mut Store, module: &Module) -> Result<()> {
    validate(module)?;
    check_requires_acyclic(store, module)?;
    let patterns = derive_patterns(module);
    store.import_module(module, &patterns)
}

/// Parses, validates and imports every `*.yml`/`*.yaml` under `dir`.
pub fn load_dir(store: &mut Store, dir: &Path) -> Result<Vec<LoadOutcome>> {
    if !dir.is_dir() {
        return Err(CoreError::NotFound(format!(
            "module directory '{}'",
            dir.display()
        )));
    }
    let mut outcomes = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| CoreError::Storage(e.to_string()))?;
        if !entry.path().is_file() {
            continue;
        }
        match entry.path().extension().and_then(|s| s.to_str()) {
            Some("yml") | Some("yaml") => {}
            _ => continue,
        }
        let result = fs::read(entry.path())
            .map_err(|e| CoreError::Parse(e.to_string()))
            .and_then(|bytes| parse(&bytes))
            .and_then(|module| import(store, &module).map(|_| module.id));
        outcomes.push(LoadOutcome {
            path: entry.path().to_path_buf(),
            result,
        });
    }
    Ok(outcomes)
}

/// Per-file result of a directory load.
pub struct LoadOutcome {
    pub path: PathBuf,
    pub result: Result<String>,
}

/// Rejects an import whose `requires` edges would close a cycle.
fn check_requires_acyclic(store: &Store, module: &Module) -> Result<()> {
    let mut graph: HashMap<String, Vec<String>> = HashMap::new();
    for (from, to) in store.dependency_edges()? {
        graph.entry(from).or_default().push(to);
    }
    graph.insert(module.id.clone(), module.requires.clone());

    // DFS from the new module; reaching it again means the new edges close
    // a cycle.
    let mut visited: HashSet<String> = HashSet::new();
    let mut stack: Vec<String> = module.requires.clone();
    while let Some(current) = stack.pop() {
        if current == module.id {
            return Err(CoreError::Validation(format!(
                "module '{}' is part of a requires cycle",
                module.id
            )));
        }
        if !visited.insert(current.clone()) {
            continue;
        }
        if let Some(nexts) = graph.get(&current) {
            stack.extend(nexts.iter().cloned());
        }
    }
    Ok(())
}

fn is_reverse_dns(id: &str) -> bool {
    let segments: Vec<&str> = id.split('.').collect();
    if segments.len() < 2 {
        return false;
    }
    segments.iter().all(|seg| {
        !seg.is_empty()
            && seg
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    })
}

fn dedup_in_place(items: &mut Vec<String>) {
    let mut seen = HashSet::new();
    items.retain(|item| seen.insert(item.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
id: dev.clipilot.hello
name: Hello
version: 1.0.0
description: Prints a greeting
flows:
  main:
    start: greet
    steps:
      greet:
        type: terminal
        message: "hello"
"#;

    #[test]
    fn parse_populates_step_keys() {
        let module = parse(MINIMAL.as_bytes()).unwrap();
        let flow = module.flow("main").unwrap();
        assert_eq!(flow.steps.get("greet").unwrap().key, "greet");
    }

    #[test]
    fn validate_rejects_missing_start() {
        let yaml = MINIMAL.replace("start: greet", "start: gone");
        let module = parse(yaml.as_bytes()).unwrap();
        match validate(&module) {
            Err(CoreError::Validation(msg)) => assert!(msg.contains("start step")),
            other => panic!("expected validation error, got {:?}", other.is_ok()),
        }
    }

    #[test]
    fn validate_rejects_bad_id() {
        let yaml = MINIMAL.replace("dev.clipilot.hello", "hello");
        let module = parse(yaml.as_bytes()).unwrap();
        assert!(matches!(validate(&module), Err(CoreError::Validation(_))));
    }

    #[test]
    fn validate_rejects_branch_without_map() {
        let yaml = r#"
id: dev.clipilot.branchy
name: Branchy
version: 0.1.0
flows:
  main:
    start: pick
    steps:
      pick:
        type: branch
        based_on: os
"#;
        let module = parse(yaml.as_bytes()).unwrap();
        match validate(&module) {
            Err(CoreError::Validation(msg)) => assert!(msg.contains("empty map")),
            other => panic!("expected validation error, got {:?}", other.is_ok()),
        }
    }

    #[test]
    fn validate_rejects_dangling_next() {
        let yaml = r#"
id: dev.clipilot.dangling
name: Dangling
version: 0.1.0
flows:
  main:
    start: one
    steps:
      one:
        type: instruction
        message: "step one"
        next: nowhere
"#;
        let module = parse(yaml.as_bytes()).unwrap();
        assert!(matches!(validate(&module), Err(CoreError::Validation(_))));
    }

    #[test]
    fn pattern_derivation_is_deterministic() {
        let yaml = r#"
id: dev.clipilot.net-tools
name: Network Tools
version: 1.2.0
description: Inspect and monitor network connections
tags: [network, monitoring]
flows:
  main:
    start: done
    steps:
      done:
        type: terminal
"#;
        let module = parse(yaml.as_bytes()).unwrap();
        let first = derive_patterns(&module);
        let second = derive_patterns(&module);
        assert_eq!(first, second);

        let tag = first
            .iter()
            .find(|p| p.pattern == "network" && p.pattern_type == PatternType::Tag)
            .expect("tag pattern");
        assert_eq!(tag.weight, 2.0);

        let name_token = first
            .iter()
            .find(|p| p.pattern == "tools" && p.pattern_type == PatternType::Keyword)
            .expect("name token");
        assert_eq!(name_token.weight, 1.5);

        // Short id segments are skipped ("dev" qualifies at 3 chars).
        assert!(first.iter().any(|p| p.pattern == "clipilot"));
    }

    #[test]
    fn self_requires_is_a_cycle() {
        let yaml = MINIMAL.replace(
            "description: Prints a greeting",
            "description: Prints a greeting\nrequires: [dev.clipilot.hello]",
        );
        let module = parse(yaml.as_bytes()).unwrap();
        let mut store = Store::open_in_memory().unwrap();
        assert!(matches!(
            import(&mut store, &module),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn import_then_get_roundtrips() {
        let module = parse(MINIMAL.as_bytes()).unwrap();
        let mut store = Store::open_in_memory().unwrap();
        import(&mut store, &module).unwrap();
        let loaded = store.get_module("dev.clipilot.hello").unwrap();
        assert_eq!(loaded, module);
    }
}
