//! Query normalization: the contractual first stage of intent resolution.
//!
//! The pipeline is a pure function of its input: lowercase, strip
//! punctuation (keeping intra-token hyphens), tokenize on whitespace,
//! extract the intent verb, drop stop words and one-character tokens, then
//! apply the lemmatization rules. The exact rules are contractual; the tests
//! below pin them.

/// Default intent when no verb in the query matches the table.
pub const DEFAULT_INTENT: &str = "find";

/// Closed verb -> intent table. First matching token wins.
const INTENT_VERBS: &[(&str, &str)] = &[
    ("show", "show"),
    ("display", "show"),
    ("list", "show"),
    ("view", "show"),
    ("find", "find"),
    ("search", "find"),
    ("locate", "find"),
    ("kill", "kill"),
    ("stop", "kill"),
    ("terminate", "kill"),
    ("monitor", "monitor"),
    ("watch", "monitor"),
    ("start", "start"),
    ("run", "start"),
    ("launch", "start"),
    ("install", "install"),
    ("add", "install"),
    ("remove", "remove"),
    ("delete", "remove"),
    ("uninstall", "remove"),
    ("configure", "configure"),
    ("setup", "configure"),
    ("config", "configure"),
    ("test", "test"),
    ("check", "test"),
    ("verify", "test"),
];

/// Closed stop-word set.
const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "i", "me", "my", "is", "are", "was", "were", "be", "been",
    "do", "does", "did", "how", "what", "when", "where", "which", "who", "why",
    "can", "could", "should", "would", "will", "shall", "may", "might", "must",
    "to", "of", "in", "on", "at", "by", "for", "with", "from", "into", "about",
    "and", "or", "not", "no", "it", "its", "this", "that", "these", "those",
    "you", "your", "we", "our", "they", "them", "there", "here", "please",
    "want", "need", "some", "any",
];

/// A normalized query: the extracted intent plus the content tokens.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedQuery {
    pub intent: String,
    pub tokens: Vec<String>,
}

/// Normalizes free-text input.
pub fn normalize(input: &str) -> NormalizedQuery {
    let raw_tokens = raw_tokens(input);

    let intent = raw_tokens
        .iter()
        .find_map(|token| {
            INTENT_VERBS
                .iter()
                .find(|(verb, _)| verb == token)
                .map(|(_, intent)| intent.to_string())
        })
        .unwrap_or_else(|| DEFAULT_INTENT.to_string());

    let tokens = raw_tokens
        .into_iter()
        .filter(|t| t.len() > 1)
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .map(|t| lemmatize(&t))
        .collect();

    NormalizedQuery { intent, tokens }
}

/// Lowercases, strips punctuation except intra-token hyphens, splits on
/// whitespace.
fn raw_tokens(input: &str) -> Vec<String> {
    let cleaned: String = input
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '-')
        .collect();
    cleaned
        .split_whitespace()
        .map(|t| t.trim_matches('-').to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Applies the same tokenization and lemmatization to descriptive text.
/// Used by the TF-IDF layer so documents and queries live in one term
/// space.
pub fn content_tokens(text: &str) -> Vec<String> {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();
    cleaned
        .split_whitespace()
        .filter(|t| t.len() > 1)
        .filter(|t| !STOP_WORDS.contains(t))
        .map(lemmatize)
        .collect()
}

/// Suffix-stripping lemmatization:
/// - trailing `ing` (stems of at least three characters), reversing
///   consonant doubling: running -> run
/// - trailing `ed` (stems of at least three characters)
/// - trailing `s` for tokens longer than three characters, never after `ss`
fn lemmatize(token: &str) -> String {
    if let Some(stem) = token.strip_suffix("ing") {
        if stem.len() >= 3 {
            let bytes = stem.as_bytes();
            let last = bytes[bytes.len() - 1];
            if last == bytes[bytes.len() - 2] && !is_vowel(last) {
                return stem[..stem.len() - 1].to_string();
            }
            return stem.to_string();
        }
    }
    if let Some(stem) = token.strip_suffix("ed") {
        if stem.len() >= 3 {
            return stem.to_string();
        }
    }
    if let Some(stem) = token.strip_suffix('s') {
        if token.len() > 3 && !token.ends_with("ss") {
            return stem.to_string();
        }
    }
    token.to_string()
}

fn is_vowel(b: u8) -> bool {
    matches!(b, b'a' | b'e' | b'i' | b'o' | b'u')
}
