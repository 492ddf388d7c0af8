//! Google Custom Search JSON API backend.

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use eventharvest_shared::{HarvestError, Result, SearchHit};

use crate::{SearchProvider, build_client, first_str};

/// The Custom Search JSON API returns at most 10 items per request.
const MAX_NUM: usize = 10;

/// Google Custom Search JSON API (`/customsearch/v1`).
pub struct GoogleCseProvider {
    client: Client,
    base_url: String,
    api_key: String,
    cx: String,
}

impl GoogleCseProvider {
    pub fn new(base_url: &str, api_key: String, cx: String, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout_secs)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            cx,
        })
    }
}

#[async_trait]
impl SearchProvider for GoogleCseProvider {
    fn name(&self) -> &str {
        "google_cse"
    }

    async fn search(&self, query: &str, n: usize) -> Result<Vec<SearchHit>> {
        let url = format!("{}/customsearch/v1", self.base_url);
        let num = n.clamp(1, MAX_NUM).to_string();

        let response = self
            .client
            .get(&url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("cx", self.cx.as_str()),
                ("q", query),
                ("num", num.as_str()),
            ])
            .send()
            .await
            .map_err(|e| HarvestError::Search(format!("google_cse: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::Search(format!("google_cse: HTTP {status}")));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| HarvestError::Search(format!("google_cse: invalid JSON: {e}")))?;

        let hits: Vec<SearchHit> = body
            .get("items")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .map(|item| SearchHit {
                        title: first_str(item, &["title"]),
                        link: first_str(item, &["link"]),
                        snippet: first_str(item, &["snippet"]),
                    })
                    .filter(|hit| !hit.link.is_empty())
                    .take(n)
                    .collect()
            })
            .unwrap_or_default();

        debug!(hits = hits.len(), "google cse results parsed");
        Ok(hits)
    }
}
