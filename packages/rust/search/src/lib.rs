//! Web search providers and the failover search client.
//!
//! - [`SearchProvider`] - one search backend (`search(query, n)`)
//! - [`SerpApiProvider`], [`GoogleCseProvider`] - HTTP backends
//! - [`MultiProviderSearch`] - queries providers in order, falling over on empty results

mod google_cse;
mod serpapi;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, instrument, warn};

use eventharvest_shared::{HarvestError, Result, SearchConfig, SearchHit, env_secret};

pub use google_cse::GoogleCseProvider;
pub use serpapi::SerpApiProvider;

/// User-Agent string for search API requests.
const USER_AGENT: &str = concat!("EventHarvest/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

/// A search backend returning normalized `{title, link, snippet}` hits.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Run `query`, returning at most `n` hits.
    async fn search(&self, query: &str, n: usize) -> Result<Vec<SearchHit>>;
}

/// Build the shared HTTP client for search APIs.
pub(crate) fn build_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| HarvestError::Search(format!("failed to build HTTP client: {e}")))
}

/// Read a string field, trying each key in order.
pub(crate) fn first_str(item: &serde_json::Value, keys: &[&str]) -> String {
    keys.iter()
        .filter_map(|k| item.get(*k).and_then(|v| v.as_str()))
        .find(|s| !s.trim().is_empty())
        .unwrap_or_default()
        .to_string()
}

// ---------------------------------------------------------------------------
// MultiProviderSearch
// ---------------------------------------------------------------------------

/// Ordered list of providers. The first provider that yields any hits wins.
///
/// Provider errors are logged and treated as an empty result, so
/// [`MultiProviderSearch::search`] never fails.
pub struct MultiProviderSearch {
    providers: Vec<Box<dyn SearchProvider>>,
}

impl MultiProviderSearch {
    pub fn new(providers: Vec<Box<dyn SearchProvider>>) -> Self {
        Self { providers }
    }

    /// Build providers from config, skipping any whose keys are not set.
    /// SerpAPI is primary, Google Custom Search secondary.
    pub fn from_config(config: &SearchConfig) -> Result<Self> {
        let mut providers: Vec<Box<dyn SearchProvider>> = Vec::new();

        if let Some(key) = env_secret(&config.serpapi_key_env) {
            providers.push(Box::new(SerpApiProvider::new(
                &config.serpapi_base_url,
                key,
                config.timeout_secs,
            )?));
        } else {
            debug!(env = %config.serpapi_key_env, "SerpAPI key not set, provider disabled");
        }

        match (
            env_secret(&config.google_api_key_env),
            env_secret(&config.google_cse_id_env),
        ) {
            (Some(key), Some(cx)) => providers.push(Box::new(GoogleCseProvider::new(
                &config.google_cse_base_url,
                key,
                cx,
                config.timeout_secs,
            )?)),
            _ => debug!("Google CSE key or engine id not set, provider disabled"),
        }

        if providers.is_empty() {
            warn!("no search provider configured; searches will return no results");
        }

        Ok(Self::new(providers))
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Search each provider in order until one returns hits.
    #[instrument(skip_all, fields(query = %query, n))]
    pub async fn search(&self, query: &str, n: usize) -> Vec<SearchHit> {
        for provider in &self.providers {
            match provider.search(query, n).await {
                Ok(hits) if !hits.is_empty() => {
                    debug!(provider = provider.name(), hits = hits.len(), "search succeeded");
                    return hits;
                }
                Ok(_) => {
                    info!(provider = provider.name(), "no results, trying next provider");
                }
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "search provider failed");
                }
            }
        }
        Vec::new()
    }
}
