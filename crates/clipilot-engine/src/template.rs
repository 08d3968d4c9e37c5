//! Expansion of `{{.key}}` template tokens from run state.

use std::collections::HashMap;

/// Replaces every `{{.key}}` with the state value for `key`; missing keys
/// expand to the empty string. Text without a closing `}}` is left as-is.
pub fn expand(text: &str, state: &HashMap<String, String>) -> String {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find("{{.") {
        result.push_str(&rest[..open]);
        let after_open = &rest[open + 3..];
        match after_open.find("}}") {
            Some(close) => {
                let key = after_open[..close].trim();
                if let Some(value) = state.get(key) {
                    result.push_str(value);
                }
                rest = &after_open[close + 2..];
            }
            None => {
                result.push_str(&rest[open..]);
                return result;
            }
        }
    }
    result.push_str(rest);
    result
}
