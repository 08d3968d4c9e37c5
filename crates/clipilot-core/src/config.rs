//! Overlay of a flat key/value configuration onto the settings table.
//!
//! The configuration file schema mirrors the settings keys; parsing is one
//! `key=value` pair per line with `#` comments. The core consumes the flat
//! map; where the map came from is the caller's business.

use std::collections::HashMap;

use crate::error::Result;
use crate::store::Store;

/// Parses `key=value` lines. Blank lines and `#` comments are skipped;
/// values keep internal `=` signs.
pub fn parse_flat(text: &str) -> HashMap<String, String> {
    let mut values = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            values.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    values
}

/// Writes every pair into the settings table.
pub fn apply(store: &Store, values: &HashMap<String, String>) -> Result<()> {
    for (key, value) in values {
        store.set_setting(key, value)?;
    }
    Ok(())
}
