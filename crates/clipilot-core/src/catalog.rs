//! Inventory of command-line tools known to the client.
//!
//! Installed commands are discovered on demand through `whatis` when the
//! platform has it; the registry contributes known-but-not-installed entries
//! with categories and keywords. Nothing here depends on man pages being
//! present.

use std::process::Command;

use crate::error::Result;
use crate::module::CommandEntry;
use crate::store::Store;

/// A catalog row with its match score for one query.
#[derive(Debug, Clone)]
pub struct ScoredCommand {
    pub entry: CommandEntry,
    pub score: f64,
}

/// Records a command present on this host.
pub fn upsert_installed(store: &Store, name: &str, description: &str) -> Result<()> {
    store.upsert_command(&CommandEntry {
        name: name.to_string(),
        description: description.to_string(),
        has_man: false,
        category: None,
        keywords: Vec::new(),
        installed: true,
    })
}

/// Records a registry-supplied command that is not installed here.
pub fn mark_common(
    store: &Store,
    name: &str,
    description: &str,
    category: Option<&str>,
    keywords: &[String],
) -> Result<()> {
    store.upsert_command(&CommandEntry {
        name: name.to_string(),
        description: description.to_string(),
        has_man: false,
        category: category.map(|c| c.to_string()),
        keywords: keywords.to_vec(),
        installed: false,
    })
}

pub fn get_description(store: &Store, name: &str) -> Result<String> {
    Ok(store.get_command(name)?.description)
}

/// Scores every catalog row against the normalized query tokens.
///
/// Name matches dominate (exact, then containment); description and keyword
/// overlap fills the rest. Token-vs-word comparison is prefix-tolerant so
/// "file" still matches a description saying "files" without sharing the
/// resolver's lemmatizer. Results are sorted best-first, zero scores dropped.
pub fn search(store: &Store, tokens: &[String]) -> Result<Vec<ScoredCommand>> {
    let mut scored = Vec::new();
    for entry in store.all_commands()? {
        let score = score_entry(&entry, tokens);
        if score > 0.0 {
            scored.push(ScoredCommand { entry, score });
        }
    }
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.entry.name.cmp(&b.entry.name))
    });
    Ok(scored)
}

fn score_entry(entry: &CommandEntry, tokens: &[String]) -> f64 {
    if tokens.is_empty() {
        return 0.0;
    }

    let name = entry.name.to_lowercase();
    let mut name_score: f64 = 0.0;
    for token in tokens {
        if *token == name {
            name_score = 1.0;
            break;
        }
        if name.contains(token.as_str()) || token.contains(&name) {
            name_score = name_score.max(0.6);
        }
    }

    let mut words: Vec<String> = entry
        .description
        .split_whitespace()
        .map(sanitize_word)
        .filter(|w| !w.is_empty())
        .collect();
    words.extend(entry.keywords.iter().map(|k| sanitize_word(k)));

    let matched = tokens
        .iter()
        .filter(|token| words.iter().any(|word| word_matches(word, token)))
        .count();
    let overlap = matched as f64 / tokens.len() as f64;

    (0.4 * name_score + 0.6 * overlap).min(1.0)
}

fn word_matches(word: &str, token: &str) -> bool {
    word == token || (token.len() >= 3 && word.starts_with(token))
}

fn sanitize_word(word: &str) -> String {
    word.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase()
}

/// Asks the platform's `whatis` for a one-line description. Absence of the
/// tool, of the entry, or of man pages altogether is not an error.
pub fn whatis_description(name: &str) -> Option<String> {
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return None;
    }
    let output = Command::new("sh")
        .arg("-c")
        .arg(format!("whatis {} 2>/dev/null", name))
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    // "cp (1) - copy files and directories"
    text.lines()
        .find_map(|line| line.split_once(" - ").map(|(_, desc)| desc.trim().to_string()))
        .filter(|desc| !desc.is_empty())
}

/// Discovers a command via `whatis` and records it as installed. Returns
/// the description when one was found.
pub fn discover_installed(store: &Store, name: &str) -> Result<Option<String>> {
    match whatis_description(name) {
        Some(description) => {
            store.upsert_command(&CommandEntry {
                name: name.to_string(),
                description: description.clone(),
                has_man: true,
                category: None,
                keywords: Vec::new(),
                installed: true,
            })?;
            Ok(Some(description))
        }
        None => Ok(None),
    }
}
