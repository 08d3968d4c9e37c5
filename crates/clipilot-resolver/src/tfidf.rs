//! Layer 2: opt-in TF-IDF matcher.
//!
//! Builds an in-memory index over every installed module and every catalog
//! command, straight from the store; no model files, no native runtime, and
//! deterministically rebuildable. Final score blends cosine similarity with
//! an intent match and a category boost:
//! `0.7 * tfidf + 0.2 * intent_match + 0.1 * category_boost`.

use std::collections::{HashMap, HashSet};

use clipilot_core::error::Result;
use clipilot_core::store::Store;

use crate::normalize::{content_tokens, NormalizedQuery};
use crate::{Candidate, CandidateSource, METHOD_TFIDF};

const W_TFIDF: f64 = 0.7;
const W_INTENT: f64 = 0.2;
const W_CATEGORY: f64 = 0.1;

struct Doc {
    source: CandidateSource,
    name: String,
    description: String,
    /// term -> term frequency
    tf: HashMap<String, f64>,
    /// tags or category labels checked against the extracted intent
    labels: HashSet<String>,
    category: Option<String>,
}

pub struct TfIdfIndex {
    docs: Vec<Doc>,
    idf: HashMap<String, f64>,
}

impl TfIdfIndex {
    /// Builds the index from the store alone.
    pub fn build(store: &Store) -> Result<TfIdfIndex> {
        let mut docs = Vec::new();

        for summary in store.module_summaries()? {
            let mut text = format!("{} {}", summary.name, summary.description);
            for tag in &summary.tags {
                text.push(' ');
                text.push_str(tag);
            }
            text.push(' ');
            text.push_str(&summary.id.replace('.', " "));
            docs.push(Doc {
                source: CandidateSource::Module(summary.id.clone()),
                name: summary.name.clone(),
                description: summary.description.clone(),
                tf: term_frequencies(&text),
                labels: summary.tags.iter().map(|t| t.to_lowercase()).collect(),
                category: None,
            });
        }

        for entry in store.all_commands()? {
            let mut text = format!("{} {}", entry.name, entry.description);
            for keyword in &entry.keywords {
                text.push(' ');
                text.push_str(keyword);
            }
            let mut labels: HashSet<String> =
                entry.keywords.iter().map(|k| k.to_lowercase()).collect();
            if let Some(category) = &entry.category {
                labels.insert(category.to_lowercase());
            }
            let source = if entry.installed {
                CandidateSource::Command(entry.name.clone())
            } else {
                CandidateSource::Common(entry.name.clone())
            };
            docs.push(Doc {
                source,
                name: entry.name.clone(),
                description: entry.description.clone(),
                tf: term_frequencies(&text),
                labels,
                category: entry.category.clone(),
            });
        }

        let mut df: HashMap<String, usize> = HashMap::new();
        for doc in &docs {
            for term in doc.tf.keys() {
                *df.entry(term.clone()).or_insert(0) += 1;
            }
        }
        let n = docs.len().max(1) as f64;
        let idf = df
            .into_iter()
            .map(|(term, count)| (term, (n / (1.0 + count as f64)).ln() + 1.0))
            .collect();

        Ok(TfIdfIndex { docs, idf })
    }

    /// Scores every document against the query; zero-similarity documents
    /// are dropped.
    pub fn query(&self, query: &NormalizedQuery) -> Vec<Candidate> {
        if query.tokens.is_empty() {
            return Vec::new();
        }

        let q_tf = {
            let mut tf: HashMap<&str, f64> = HashMap::new();
            for token in &query.tokens {
                *tf.entry(token.as_str()).or_insert(0.0) += 1.0;
            }
            let len = query.tokens.len() as f64;
            tf.into_iter()
                .map(|(term, count)| {
                    let idf = self.idf.get(term).copied().unwrap_or(1.0);
                    (term, (count / len) * idf)
                })
                .collect::<HashMap<&str, f64>>()
        };
        let q_norm = norm(q_tf.values());

        let mut candidates = Vec::new();
        for doc in &self.docs {
            let mut dot = 0.0;
            let mut d_weights = Vec::with_capacity(doc.tf.len());
            for (term, tf) in &doc.tf {
                let idf = self.idf.get(term).copied().unwrap_or(1.0);
                let weight = tf * idf;
                d_weights.push(weight);
                if let Some(q_weight) = q_tf.get(term.as_str()) {
                    dot += weight * q_weight;
                }
            }
            if dot == 0.0 {
                continue;
            }
            let similarity = dot / (q_norm * norm(d_weights.iter()));

            let intent_match = if doc.labels.contains(&query.intent)
                || doc.tf.contains_key(&query.intent)
            {
                1.0
            } else {
                0.0
            };
            let category_boost = match &doc.category {
                Some(category) => {
                    let category = category.to_lowercase();
                    if category == query.intent || query.tokens.contains(&category) {
                        1.0
                    } else {
                        0.0
                    }
                }
                None => 0.0,
            };

            let score =
                (W_TFIDF * similarity + W_INTENT * intent_match + W_CATEGORY * category_boost)
                    .min(1.0);
            candidates.push(Candidate {
                source: doc.source.clone(),
                name: doc.name.clone(),
                description: doc.description.clone(),
                score,
                method: METHOD_TFIDF,
                intent_tag: intent_match > 0.0,
            });
        }

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.source.tag().cmp(&b.source.tag()))
        });
        candidates
    }
}

fn term_frequencies(text: &str) -> HashMap<String, f64> {
    let tokens = content_tokens(text);
    let len = tokens.len().max(1) as f64;
    let mut tf: HashMap<String, f64> = HashMap::new();
    for token in tokens {
        *tf.entry(token).or_insert(0.0) += 1.0;
    }
    for value in tf.values_mut() {
        *value /= len;
    }
    tf
}

fn norm<'a>(weights: impl Iterator<Item = &'a f64>) -> f64 {
    weights.map(|w| w * w).sum::<f64>().sqrt().max(f64::EPSILON)
}
