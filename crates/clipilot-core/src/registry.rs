//! Client half of the registry HTTP API.
//!
//! The registry is an opaque JSON endpoint: module metadata listing, module
//! download, command search and a fire-and-forget "nothing matched" request
//! channel. Everything is synchronous (blocking reqwest) with a 30 second
//! timeout.

use serde::Deserialize;
use serde_json::json;
use std::env;
use std::time::Duration;

use crate::error::{CoreError, Result};
use crate::store::Store;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Module metadata as returned by `GET /api/modules`.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryModuleMeta {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub downloads: i64,
}

/// One remote suggestion from `POST /api/commands/search`.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandCandidate {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub use_cases: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CommandSearchResponse {
    #[serde(default)]
    candidates: Vec<CommandCandidate>,
    #[serde(default)]
    #[allow(dead_code)]
    cached: bool,
}

pub struct RegistryClient {
    base_url: String,
    /// Tried once when the primary host cannot be reached; on constrained
    /// mobile environments the system resolver is flaky for known hosts.
    fallback_url: Option<String>,
    client: reqwest::blocking::Client,
}

impl RegistryClient {
    pub fn new(base_url: &str) -> Result<Self> {
        if base_url.trim().is_empty() {
            return Err(CoreError::Validation(
                "no registry URL configured (set registry_url or REGISTRY_URL)".to_string(),
            ));
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()?;
        Ok(RegistryClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            fallback_url: None,
            client,
        })
    }

    /// Builds a client from the stored `registry_url` setting; the
    /// `REGISTRY_URL` environment variable takes precedence. An optional
    /// `registry_fallback_url` setting (typically an IP-based URL) is used
    /// when the primary host cannot be reached.
    pub fn from_store(store: &Store) -> Result<Self> {
        let url = match env::var("REGISTRY_URL") {
            Ok(url) if !url.trim().is_empty() => url,
            _ => store.setting_str("registry_url")?,
        };
        let client = Self::new(&url)?;
        match store.setting_str("registry_fallback_url") {
            Ok(fallback) if !fallback.trim().is_empty() => Ok(client.with_fallback_url(&fallback)),
            _ => Ok(client),
        }
    }

    /// Registers an alternative base URL (typically the registry's IP) used
    /// when the primary host is unreachable.
    pub fn with_fallback_url(mut self, url: &str) -> Self {
        self.fallback_url = Some(url.trim_end_matches('/').to_string());
        self
    }

    fn get(&self, path: &str) -> Result<reqwest::blocking::Response> {
        let primary = format!("{}{}", self.base_url, path);
        match self.client.get(&primary).send() {
            Ok(response) => Ok(response),
            Err(e) if e.is_connect() || e.is_timeout() => match &self.fallback_url {
                Some(fallback) => {
                    let url = format!("{}{}", fallback, path);
                    Ok(self.client.get(&url).send()?)
                }
                None => Err(e.into()),
            },
            Err(e) => Err(e.into()),
        }
    }

    fn post(&self, path: &str, body: &serde_json::Value) -> Result<reqwest::blocking::Response> {
        let primary = format!("{}{}", self.base_url, path);
        match self.client.post(&primary).json(body).send() {
            Ok(response) => Ok(response),
            Err(e) if e.is_connect() || e.is_timeout() => match &self.fallback_url {
                Some(fallback) => {
                    let url = format!("{}{}", fallback, path);
                    Ok(self.client.post(&url).json(body).send()?)
                }
                None => Err(e.into()),
            },
            Err(e) => Err(e.into()),
        }
    }

    fn check(response: reqwest::blocking::Response) -> Result<reqwest::blocking::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            Err(CoreError::Auth(format!("{}: {}", status, body)))
        } else {
            Err(CoreError::Network(format!("{}: {}", status, body)))
        }
    }

    /// Fetches the module listing and caches it without touching installed
    /// rows. The outcome (either way) is recorded in `registry_cache`.
    pub fn sync(&self, store: &mut Store) -> Result<usize> {
        let fetched: Result<Vec<RegistryModuleMeta>> = self
            .get("/api/modules")
            .and_then(Self::check)
            .and_then(|r| r.json::<Vec<RegistryModuleMeta>>().map_err(CoreError::from));

        match fetched {
            Ok(metas) => {
                let count = store.upsert_cached_modules(&metas)?;
                store.set_registry_cache("ok", count as i64)?;
                Ok(count)
            }
            Err(e) => {
                store.set_registry_cache(&format!("error: {}", e), 0).ok();
                Err(e)
            }
        }
    }

    /// True when auto-sync is enabled and the last sync is older than the
    /// configured interval. A store that never synced counts as stale.
    pub fn should_auto_sync(store: &Store) -> Result<bool> {
        if !store.setting_bool("auto_sync")? {
            return Ok(false);
        }
        let interval = store.setting_i64("sync_interval")?;
        match store.registry_cache()? {
            Some(cache) => {
                let elapsed = chrono::Utc::now().timestamp() - cache.last_sync_ts;
                Ok(elapsed > interval)
            }
            None => Ok(true),
        }
    }

    /// Downloads module YAML bytes. Older registries serve `/modules/{id}`,
    /// newer ones `/api/modules/{id}`; both are tried.
    pub fn download(&self, module_id: &str) -> Result<Vec<u8>> {
        let response = self.get(&format!("/modules/{}", module_id))?;
        let response = if response.status().as_u16() == 404 {
            self.get(&format!("/api/modules/{}", module_id))?
        } else {
            response
        };
        let response = Self::check(response)?;
        Ok(response.bytes()?.to_vec())
    }

    /// Reports a query the resolver could not satisfy. Fire-and-forget:
    /// failures are swallowed.
    pub fn submit_request(&self, query: &str, user_context: &str) {
        let body = json!({ "query": query, "user_context": user_context });
        let _ = self.post("/api/module-request", &body).and_then(Self::check);
    }

    /// Remote command search used by the resolver's online fallback layer.
    pub fn search_commands(&self, query: &str) -> Result<Vec<CommandCandidate>> {
        let body = json!({ "query": query });
        let response = Self::check(self.post("/api/commands/search", &body)?)?;
        let parsed: CommandSearchResponse = response.json().map_err(CoreError::from)?;
        Ok(parsed.candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_url_is_rejected() {
        assert!(matches!(
            RegistryClient::new(""),
            Err(CoreError::Validation(_))
        ));
        assert!(matches!(
            RegistryClient::new("   "),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn auto_sync_requires_toggle() {
        let store = Store::open_in_memory().unwrap();
        assert!(!RegistryClient::should_auto_sync(&store).unwrap());

        store.set_setting("auto_sync", "true").unwrap();
        // Never synced: stale by definition.
        assert!(RegistryClient::should_auto_sync(&store).unwrap());

        store.set_registry_cache("ok", 0).unwrap();
        assert!(!RegistryClient::should_auto_sync(&store).unwrap());
    }
}
