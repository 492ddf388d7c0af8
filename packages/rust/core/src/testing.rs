//! In-crate fakes for the model, search and fetch collaborators.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use eventharvest_fetcher::PageFetcher;
use eventharvest_search::SearchProvider;
use eventharvest_shared::{HarvestError, Result, RetryPolicy, SearchHit};
use eventharvest_storage::Storage;

use crate::llm::LanguageModel;

pub(crate) async fn temp_storage() -> Storage {
    let tmp = std::env::temp_dir().join(format!("eh_core_test_{}.db", uuid::Uuid::now_v7()));
    Storage::open(&tmp).await.expect("open test db")
}

pub(crate) fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay_ms: 1,
        max_delay_ms: 1,
    }
}

pub(crate) fn hit(title: &str, link: &str, snippet: &str) -> SearchHit {
    SearchHit {
        title: title.into(),
        link: link.into(),
        snippet: snippet.into(),
    }
}

// ---------------------------------------------------------------------------
// ScriptedModel
// ---------------------------------------------------------------------------

/// Replays scripted replies in order; the last one repeats.
pub(crate) struct ScriptedModel {
    replies: Mutex<VecDeque<std::result::Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub(crate) fn new(replies: Vec<std::result::Result<&str, &str>>) -> Self {
        Self {
            replies: Mutex::new(
                replies
                    .into_iter()
                    .map(|r| r.map(str::to_string).map_err(str::to_string))
                    .collect(),
            ),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn replying(reply: &str) -> Self {
        Self::new(vec![Ok(reply)])
    }

    pub(crate) fn prompt_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub(crate) fn prompt(&self, i: usize) -> String {
        self.prompts.lock().unwrap()[i].clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let mut replies = self.replies.lock().unwrap();
        let next = if replies.len() > 1 {
            replies.pop_front()
        } else {
            replies.front().cloned()
        };
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(HarvestError::Llm(message)),
            None => Ok(String::new()),
        }
    }
}

/// Picks a reply by the first marker found in the prompt.
pub(crate) struct RoutedModel {
    routes: Vec<(&'static str, &'static str)>,
    prompts: Mutex<Vec<String>>,
}

impl RoutedModel {
    pub(crate) fn new(routes: Vec<(&'static str, &'static str)>) -> Self {
        Self {
            routes,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn prompts_containing(&self, marker: &str) -> usize {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.contains(marker))
            .count()
    }
}

#[async_trait]
impl LanguageModel for RoutedModel {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self
            .routes
            .iter()
            .find(|(marker, _)| prompt.contains(marker))
            .map(|(_, reply)| reply.to_string())
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// QuerySearch
// ---------------------------------------------------------------------------

/// Search provider keyed by exact query text, with hits for any other query.
#[derive(Default)]
pub(crate) struct QuerySearch {
    pub(crate) results: HashMap<String, Vec<SearchHit>>,
    pub(crate) fallback: Vec<SearchHit>,
    pub(crate) queries: Mutex<Vec<String>>,
}

impl QuerySearch {
    pub(crate) fn always(hits: Vec<SearchHit>) -> Self {
        Self {
            fallback: hits,
            ..Self::default()
        }
    }

    pub(crate) fn with(mut self, query: &str, hits: Vec<SearchHit>) -> Self {
        self.results.insert(query.to_string(), hits);
        self
    }
}

#[async_trait]
impl SearchProvider for QuerySearch {
    fn name(&self) -> &str {
        "fake"
    }

    async fn search(&self, query: &str, n: usize) -> Result<Vec<SearchHit>> {
        self.queries.lock().unwrap().push(query.to_string());
        let hits = self.results.get(query).unwrap_or(&self.fallback);
        Ok(hits.iter().take(n).cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// MapFetcher
// ---------------------------------------------------------------------------

/// Serves pages from a map; unknown urls fail.
#[derive(Default)]
pub(crate) struct MapFetcher {
    pub(crate) pages: HashMap<String, String>,
    pub(crate) fetched: Mutex<Vec<String>>,
}

impl MapFetcher {
    pub(crate) fn with(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.to_string());
        self
    }

    pub(crate) fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFetcher for MapFetcher {
    async fn fetch(&self, url: &str) -> Option<String> {
        self.fetched.lock().unwrap().push(url.to_string());
        self.pages.get(url).cloned()
    }
}
