//! Intent resolution: free text in, ranked candidates out.
//!
//! Three layers feed the result: the always-on keyword rank, the opt-in
//! TF-IDF matcher, and (when the client is online and unconvinced) one
//! remote command-search call. Everything except that last call is a pure
//! function of the store. The resolver never fails on an empty result; it
//! reports `method = "none"` with zero confidence instead.

pub mod keyword;
pub mod normalize;
pub mod tfidf;

use std::collections::HashMap;
use std::time::Instant;

use clipilot_core::error::Result;
use clipilot_core::journey::{JourneyCandidate, JourneyLogger, JourneyStep};
use clipilot_core::registry::RegistryClient;
use clipilot_core::store::Store;

use normalize::{normalize, NormalizedQuery};
use tfidf::TfIdfIndex;

pub const METHOD_KEYWORD: &str = "keyword";
pub const METHOD_TFIDF: &str = "tfidf";
pub const METHOD_LLM_ONLINE: &str = "llm_online";
pub const METHOD_NONE: &str = "none";

/// How many candidates a resolution keeps.
const MAX_CANDIDATES: usize = 10;

/// Where a candidate points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateSource {
    /// An installed module.
    Module(String),
    /// An installed system command.
    Command(String),
    /// A known-but-not-installed command.
    Common(String),
}

impl CandidateSource {
    /// Stable identity used for unioning across layers.
    pub fn tag(&self) -> String {
        match self {
            CandidateSource::Module(id) => format!("module:{}", id),
            CandidateSource::Command(name) => format!("cmd:{}", name),
            CandidateSource::Common(name) => format!("common:{}", name),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub source: CandidateSource,
    pub name: String,
    pub description: String,
    /// Confidence in [0, 1].
    pub score: f64,
    /// Layer that produced this candidate.
    pub method: &'static str,
    /// True when the candidate's module tags (or labels) contain the
    /// extracted intent; used for tie-breaking.
    pub intent_tag: bool,
}

#[derive(Debug)]
pub struct Resolution {
    pub query: NormalizedQuery,
    pub candidates: Vec<Candidate>,
    /// Method of the layer that produced the top candidate.
    pub method: String,
    /// Score of the top candidate.
    pub confidence: f64,
}

pub struct Resolver<'a> {
    store: &'a Store,
    journey: Option<&'a JourneyLogger>,
    registry: Option<&'a RegistryClient>,
}

impl<'a> Resolver<'a> {
    pub fn new(store: &'a Store) -> Self {
        Resolver {
            store,
            journey: None,
            registry: None,
        }
    }

    pub fn with_journey(mut self, journey: &'a JourneyLogger) -> Self {
        self.journey = Some(journey);
        self
    }

    pub fn with_registry(mut self, registry: &'a RegistryClient) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Resolves free-text input to a ranked candidate list.
    pub fn resolve(&self, input: &str) -> Result<Resolution> {
        let query = normalize(input);
        let mut record = JourneyLogger::record(input);
        let mut merged: HashMap<String, Candidate> = HashMap::new();

        let started = Instant::now();
        let keyword_candidates = keyword::rank(self.store, &query)?;
        push_journey_step(&mut record.steps, METHOD_KEYWORD, &keyword_candidates, started, None);
        merge(&mut merged, keyword_candidates);

        if self.store.setting_bool("tfidf_enabled").unwrap_or(false) {
            let started = Instant::now();
            let tfidf_candidates = TfIdfIndex::build(self.store)?.query(&query);
            push_journey_step(&mut record.steps, METHOD_TFIDF, &tfidf_candidates, started, None);
            merge(&mut merged, tfidf_candidates);
        }

        let top_so_far = merged
            .values()
            .map(|c| c.score)
            .fold(0.0_f64, f64::max);
        let thresh = self.store.setting_f64("thresh_keyword").unwrap_or(0.6);
        let online = self.store.setting_bool("online_mode").unwrap_or(false);

        if top_so_far < thresh && online {
            if let Some(registry) = self.registry {
                let started = Instant::now();
                match registry.search_commands(input) {
                    Ok(remote) => {
                        let candidates: Vec<Candidate> = remote
                            .into_iter()
                            .enumerate()
                            .map(|(i, c)| Candidate {
                                source: CandidateSource::Common(c.name.clone()),
                                name: c.name,
                                description: c.description,
                                // The registry orders its suggestions but
                                // reports no scores; preserve the order.
                                score: (0.7 - 0.01 * i as f64).max(0.1),
                                method: METHOD_LLM_ONLINE,
                                intent_tag: false,
                            })
                            .collect();
                        push_journey_step(
                            &mut record.steps,
                            METHOD_LLM_ONLINE,
                            &candidates,
                            started,
                            None,
                        );
                        merge(&mut merged, candidates);
                    }
                    Err(e) => {
                        // Layer 3 is best-effort: the error is recorded for
                        // offline analysis and otherwise dropped.
                        push_journey_step(
                            &mut record.steps,
                            METHOD_LLM_ONLINE,
                            &[],
                            started,
                            Some(e.to_string()),
                        );
                    }
                }
            }
        }

        let mut candidates: Vec<Candidate> = merged.into_values().collect();
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.intent_tag.cmp(&a.intent_tag))
                .then_with(|| a.source.tag().cmp(&b.source.tag()))
        });
        candidates.truncate(MAX_CANDIDATES);

        let (method, confidence) = match candidates.first() {
            Some(top) => (top.method.to_string(), top.score),
            None => (METHOD_NONE.to_string(), 0.0),
        };

        if candidates.is_empty() && online {
            if let Some(registry) = self.registry {
                registry.submit_request(input, "");
            }
        }

        record.final_candidates = candidates
            .iter()
            .take(5)
            .map(|c| JourneyCandidate {
                source: c.source.tag(),
                score: c.score,
            })
            .collect();
        if let Some(journey) = self.journey {
            journey.append(&record);
        }

        Ok(Resolution {
            query,
            candidates,
            method,
            confidence,
        })
    }
}

/// Union by source tag, keeping the better score for duplicates.
fn merge(merged: &mut HashMap<String, Candidate>, incoming: Vec<Candidate>) {
    for candidate in incoming {
        let tag = candidate.source.tag();
        match merged.get_mut(&tag) {
            Some(existing) => {
                if candidate.score > existing.score {
                    *existing = candidate;
                }
            }
            None => {
                merged.insert(tag, candidate);
            }
        }
    }
}

fn push_journey_step(
    steps: &mut Vec<JourneyStep>,
    source: &str,
    candidates: &[Candidate],
    started: Instant,
    details: Option<String>,
) {
    let top_score = candidates.iter().map(|c| c.score).fold(0.0_f64, f64::max);
    steps.push(JourneyStep {
        source: source.to_string(),
        candidates: candidates.len(),
        top_score,
        duration_ms: started.elapsed().as_millis() as i64,
        details,
    });
}
