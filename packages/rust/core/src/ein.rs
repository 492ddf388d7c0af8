//! Tax ID (EIN) lookup across nonprofit registries.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, instrument};

use eventharvest_fetcher::PageFetcher;
use eventharvest_search::MultiProviderSearch;
use eventharvest_shared::SearchHit;

/// Two digits, a hyphen, seven digits.
static EIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{2}-\d{7}\b").expect("valid regex"));

/// First EIN-shaped token in `text`.
pub fn find_ein(text: &str) -> Option<String> {
    EIN_RE.find(text).map(|m| m.as_str().to_string())
}

/// Registry-scoped queries, most authoritative first.
pub fn ein_queries(org_name: &str) -> [String; 4] {
    let name = org_name.trim();
    [
        format!("{name} site:projects.propublica.org OR site:apps.irs.gov"),
        format!("{name} site:causeiq.com"),
        format!("{name} site:charitynavigator.org"),
        format!("{name} nonprofit EIN"),
    ]
}

/// Finds an organization's EIN from search snippets, falling back to the
/// raw HTML of result pages.
pub struct EinLocator<'a> {
    search: &'a MultiProviderSearch,
    fetcher: &'a dyn PageFetcher,
    results_per_query: usize,
    max_page_fetches: usize,
}

impl<'a> EinLocator<'a> {
    pub fn new(
        search: &'a MultiProviderSearch,
        fetcher: &'a dyn PageFetcher,
        results_per_query: usize,
        max_page_fetches: usize,
    ) -> Self {
        Self {
            search,
            fetcher,
            results_per_query,
            max_page_fetches,
        }
    }

    /// Try each registry query in order; the first match wins.
    #[instrument(skip_all, fields(org = %org_name))]
    pub async fn locate(&self, org_name: &str) -> Option<String> {
        if org_name.trim().is_empty() {
            return None;
        }
        for query in ein_queries(org_name) {
            let hits = self.search.search(&query, self.results_per_query).await;
            if let Some(ein) = self.scan(&hits).await {
                info!(%ein, query = %query, "EIN found");
                return Some(ein);
            }
        }
        debug!("no EIN found");
        None
    }

    async fn scan(&self, hits: &[SearchHit]) -> Option<String> {
        let from_snippets = hits
            .iter()
            .find_map(|hit| find_ein(&format!("{} {}", hit.snippet, hit.title)));
        if from_snippets.is_some() {
            return from_snippets;
        }

        let links = hits
            .iter()
            .filter(|hit| !hit.link.is_empty())
            .take(self.max_page_fetches);
        for hit in links {
            if let Some(ein) = self.fetcher.fetch(&hit.link).await.as_deref().and_then(find_ein) {
                debug!(url = %hit.link, "EIN found in page body");
                return Some(ein);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MapFetcher, QuerySearch, hit};

    #[test]
    fn pattern_requires_word_boundaries() {
        assert_eq!(find_ein("EIN: 12-3456789."), Some("12-3456789".into()));
        assert_eq!(find_ein("call 312-555-0100"), None);
        assert_eq!(find_ein("id 123-4567890"), None);
        assert_eq!(find_ein("nothing"), None);
    }

    #[tokio::test]
    async fn registry_snippet_match() {
        let provider = QuerySearch::default().with(
            "Example Foundation site:projects.propublica.org OR site:apps.irs.gov",
            vec![hit(
                "Example Foundation - Nonprofit Explorer",
                "https://projects.propublica.org/nonprofits/organizations/123456789",
                "EIN: 12-3456789 | Chicago, IL",
            )],
        );
        let search = MultiProviderSearch::new(vec![Box::new(provider)]);
        let fetcher = MapFetcher::default();
        let locator = EinLocator::new(&search, &fetcher, 6, 6);

        assert_eq!(
            locator.locate("Example Foundation").await,
            Some("12-3456789".to_string())
        );
        assert!(fetcher.fetched().is_empty());
    }

    #[tokio::test]
    async fn falls_back_to_page_html_then_later_queries() {
        let provider = QuerySearch::default().with(
            "Helping Hands site:causeiq.com",
            vec![
                hit("Helping Hands", "https://www.causeiq.com/a", "A charity"),
                hit("Helping Hands", "https://www.causeiq.com/b", "Chicago"),
            ],
        );
        let search = MultiProviderSearch::new(vec![Box::new(provider)]);
        let fetcher = MapFetcher::default()
            .with("https://www.causeiq.com/b", "<td>EIN</td><td>36-1234567</td>");
        let locator = EinLocator::new(&search, &fetcher, 6, 6);

        assert_eq!(locator.locate("Helping Hands").await, Some("36-1234567".into()));
        assert_eq!(fetcher.fetched().len(), 2);
    }

    #[tokio::test]
    async fn exhausting_queries_is_not_an_error() {
        let search = MultiProviderSearch::new(vec![Box::new(QuerySearch::default())]);
        let fetcher = MapFetcher::default();
        let locator = EinLocator::new(&search, &fetcher, 6, 6);
        assert_eq!(locator.locate("Unknown Org").await, None);
        assert_eq!(locator.locate("   ").await, None);
    }

    #[tokio::test]
    async fn page_fetches_are_bounded() {
        let provider = QuerySearch::default().with(
            "Org nonprofit EIN",
            (0..5)
                .map(|i| hit("Org", &format!("https://r.org/{i}"), ""))
                .collect(),
        );
        let search = MultiProviderSearch::new(vec![Box::new(provider)]);
        let fetcher = MapFetcher::default();
        let locator = EinLocator::new(&search, &fetcher, 6, 2);
        assert_eq!(locator.locate("Org").await, None);
        assert_eq!(fetcher.fetched().len(), 2);
    }
}
