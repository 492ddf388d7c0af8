//! SerpAPI Google search backend.

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use eventharvest_shared::{HarvestError, Result, SearchHit};

use crate::{SearchProvider, build_client, first_str};

/// Google results through SerpAPI (`/search.json?engine=google`).
pub struct SerpApiProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl SerpApiProvider {
    pub fn new(base_url: &str, api_key: String, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout_secs)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl SearchProvider for SerpApiProvider {
    fn name(&self) -> &str {
        "serpapi"
    }

    async fn search(&self, query: &str, n: usize) -> Result<Vec<SearchHit>> {
        let url = format!("{}/search.json", self.base_url);
        let num = n.to_string();

        let response = self
            .client
            .get(&url)
            .query(&[
                ("engine", "google"),
                ("q", query),
                ("api_key", self.api_key.as_str()),
                ("num", num.as_str()),
            ])
            .send()
            .await
            .map_err(|e| HarvestError::Search(format!("serpapi: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::Search(format!("serpapi: HTTP {status}")));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| HarvestError::Search(format!("serpapi: invalid JSON: {e}")))?;

        if let Some(err) = body.get("error").and_then(|e| e.as_str()) {
            return Err(HarvestError::Search(format!("serpapi: {err}")));
        }

        let hits = parse_results(&body, n);
        debug!(hits = hits.len(), "serpapi results parsed");
        Ok(hits)
    }
}

/// Normalize `organic_results`, or `local_results` when there are no
/// organic results. Hits without a link are dropped.
fn parse_results(body: &serde_json::Value, n: usize) -> Vec<SearchHit> {
    let items = ["organic_results", "local_results"]
        .iter()
        .filter_map(|key| body.get(*key).and_then(|v| v.as_array()))
        .find(|arr| !arr.is_empty());

    let Some(items) = items else {
        return Vec::new();
    };

    items
        .iter()
        .map(|item| SearchHit {
            title: first_str(item, &["title", "name"]),
            link: first_str(item, &["link", "url", "displayed_link"]),
            snippet: first_str(item, &["snippet", "description"]),
        })
        .filter(|hit| !hit.link.is_empty())
        .take(n)
        .collect()
}
