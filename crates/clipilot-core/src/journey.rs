//! Append-only per-query trace for offline quality analysis.
//!
//! One JSON line per resolved query. Strictly local and best-effort: a full
//! disk or missing directory must never block resolution, so every write
//! error is dropped on the floor.

use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize)]
pub struct JourneyRecord {
    pub timestamp: String,
    pub query: String,
    pub steps: Vec<JourneyStep>,
    /// Source tags of the top results, capped at five.
    pub final_candidates: Vec<JourneyCandidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_selection: Option<String>,
}

/// One resolver layer's contribution.
#[derive(Debug, Serialize)]
pub struct JourneyStep {
    pub source: String,
    pub candidates: usize,
    pub top_score: f64,
    pub duration_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JourneyCandidate {
    pub source: String,
    pub score: f64,
}

pub struct JourneyLogger {
    path: PathBuf,
}

impl JourneyLogger {
    pub fn new(path: &Path) -> Self {
        JourneyLogger {
            path: path.to_path_buf(),
        }
    }

    /// Appends one record, silently giving up on any failure.
    pub fn append(&self, record: &JourneyRecord) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(_) => return,
        };
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&self.path) {
            let _ = writeln!(file, "{}", line);
        }
    }

    pub fn record(query: &str) -> JourneyRecord {
        JourneyRecord {
            timestamp: chrono::Utc::now().to_rfc3339(),
            query: query.to_string(),
            steps: Vec::new(),
            final_candidates: Vec::new(),
            user_selection: None,
        }
    }
}
