//! Error kinds shared by the store, loader, catalog and registry client.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// The module source could not be parsed at all.
    #[error("parse error: {0}")]
    Parse(String),

    /// The module parsed but violates a flow or metadata invariant.
    #[error("validation error: {0}")]
    Validation(String),

    /// The underlying store failed.
    #[error("storage failure: {0}")]
    Storage(String),

    /// A module, command or row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The registry could not be reached or returned garbage.
    #[error("network error: {0}")]
    Network(String),

    /// The registry rejected the request.
    #[error("registry refused request: {0}")]
    Auth(String),
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        CoreError::Storage(e.to_string())
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        CoreError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Parse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
