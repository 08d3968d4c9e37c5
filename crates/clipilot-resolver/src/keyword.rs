//! Layer 1: offline keyword ranking over the derived pattern index.
//!
//! Module scores come from an equality join of query tokens against
//! `intent_patterns`; installed and known commands join through the catalog
//! search. Always on, pure function of the store contents.

use clipilot_core::catalog;
use clipilot_core::error::Result;
use clipilot_core::store::Store;

use crate::normalize::NormalizedQuery;
use crate::{Candidate, CandidateSource, METHOD_KEYWORD};

/// Maximum weight a single derived pattern can carry (tags).
const MAX_PATTERN_WEIGHT: f64 = 2.0;

/// Ranks modules and commands for a normalized query.
pub fn rank(store: &Store, query: &NormalizedQuery) -> Result<Vec<Candidate>> {
    let mut candidates = Vec::new();
    if query.tokens.is_empty() {
        return Ok(candidates);
    }

    let raw_scores = store.match_patterns(&query.tokens)?;
    if !raw_scores.is_empty() {
        let ceiling = query.tokens.len() as f64 * MAX_PATTERN_WEIGHT;
        let summaries = store.module_summaries()?;
        let mut modules: Vec<Candidate> = Vec::new();
        for summary in summaries {
            let Some(raw) = raw_scores.get(&summary.id) else {
                continue;
            };
            let score = (raw / ceiling).min(1.0);
            let intent_tag = summary.tags.iter().any(|t| t == &query.intent);
            modules.push(Candidate {
                source: CandidateSource::Module(summary.id.clone()),
                name: summary.name.clone(),
                description: summary.description.clone(),
                score,
                method: METHOD_KEYWORD,
                intent_tag,
            });
        }
        // Ties prefer a module tagged with the extracted intent, then the
        // lexicographically smaller id.
        modules.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.intent_tag.cmp(&a.intent_tag))
                .then_with(|| a.source.tag().cmp(&b.source.tag()))
        });
        candidates.extend(modules);
    }

    for scored in catalog::search(store, &query.tokens)? {
        let source = if scored.entry.installed {
            CandidateSource::Command(scored.entry.name.clone())
        } else {
            CandidateSource::Common(scored.entry.name.clone())
        };
        candidates.push(Candidate {
            source,
            name: scored.entry.name,
            description: scored.entry.description,
            score: scored.score,
            method: METHOD_KEYWORD,
            intent_tag: false,
        });
    }

    Ok(candidates)
}
