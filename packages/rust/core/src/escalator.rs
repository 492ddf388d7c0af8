//! Completeness-driven escalation.
//!
//! When a single-pass extraction leaves too many fields missing, the
//! escalator searches the web for related pages, aggregates their text, and
//! asks the model to fill only the fields that are still missing.

use std::time::Duration;

use tracing::{debug, info, instrument, warn};
use url::Url;

use eventharvest_fetcher::PageFetcher;
use eventharvest_search::MultiProviderSearch;
use eventharvest_shared::{ExtractedRecord, ExtractionConfig, Field};
use eventharvest_text::{html_to_text, normalize_date_str, truncate_chars};

use crate::extractor::{restrict_to, schema_template};
use crate::llm::PromptRunner;

/// Minimum length of a URL path segment used as a query token.
const MIN_PATH_TOKEN: usize = 3;

/// Path segments joined into the path query.
const MAX_PATH_TOKENS: usize = 4;

/// True when the record misses at least `threshold` schema fields.
pub fn should_escalate(record: &ExtractedRecord, schema: &[Field], threshold: usize) -> bool {
    record.missing_count(schema) >= threshold
}

/// Build secondary search queries from whatever the record already knows.
///
/// Queries are trimmed, deduplicated by exact text and capped at `max`.
pub fn build_queries(url: &str, record: &ExtractedRecord, max: usize) -> Vec<String> {
    let event_name = record.value(Field::EventName);
    let organizer_name = record.value(Field::OrganizerName);
    let mut queries = Vec::new();

    if let Some(en) = event_name {
        queries.push(format!("{en} \"event\""));
        queries.push(format!("{en} site:.org OR site:.com"));
    }
    if let Some(on) = organizer_name {
        queries.push(format!("{on} \"nonprofit\" OR \"charity\""));
        queries.push(format!(
            "{on} site:charitynavigator.org OR site:candid.org OR site:causeiq.com"
        ));
    }

    if let Ok(parsed) = Url::parse(url) {
        if let Some(host) = parsed.host_str() {
            let subject = organizer_name.or(event_name).unwrap_or("event");
            queries.push(format!("site:{host} \"{subject}\""));
        }
        let tokens: Vec<&str> = parsed
            .path()
            .split('/')
            .filter(|t| t.chars().count() >= MIN_PATH_TOKEN)
            .take(MAX_PATH_TOKENS)
            .collect();
        if !tokens.is_empty() {
            queries.push(tokens.join(" "));
        }
    }

    let year = record
        .value(Field::EventDate)
        .and_then(normalize_date_str)
        .and_then(|d| d.split('-').next().map(str::to_string));
    let city = record.value(Field::VenueCity);
    if city.is_some() || year.is_some() {
        let mut q = String::from("event");
        if let Some(city) = city {
            q.push(' ');
            q.push_str(city);
        }
        if let Some(year) = &year {
            q.push(' ');
            q.push_str(year);
        }
        queries.push(q);
    }

    let mut unique: Vec<String> = Vec::new();
    for q in queries {
        let q = q.trim();
        if !q.is_empty() && !unique.iter().any(|u| u == q) {
            unique.push(q.to_string());
        }
    }
    unique.truncate(max);
    unique
}

/// Multi-source synthesis over search results for one record.
pub struct Escalator<'a> {
    search: &'a MultiProviderSearch,
    fetcher: &'a dyn PageFetcher,
    runner: PromptRunner<'a>,
    config: &'a ExtractionConfig,
    results_per_query: usize,
    fetch_pause: Duration,
}

impl<'a> Escalator<'a> {
    pub fn new(
        search: &'a MultiProviderSearch,
        fetcher: &'a dyn PageFetcher,
        runner: PromptRunner<'a>,
        config: &'a ExtractionConfig,
        results_per_query: usize,
        fetch_pause: Duration,
    ) -> Self {
        Self {
            search,
            fetcher,
            runner,
            config,
            results_per_query,
            fetch_pause,
        }
    }

    /// Produce a supplement holding only fields missing from `record`.
    ///
    /// Never fails: no queries, no candidates or no usable pages all give an
    /// empty supplement.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn escalate(&self, url: &str, record: &ExtractedRecord, schema: &[Field]) -> ExtractedRecord {
        let queries = build_queries(url, record, self.config.max_queries);
        debug!(?queries, "deep search queries");

        let candidates = self.collect_candidates(&queries).await;
        if candidates.is_empty() {
            info!("no deep-search candidates found");
            return ExtractedRecord::new();
        }

        let blob = self.aggregate(&candidates).await;
        if blob.is_empty() {
            info!(candidates = candidates.len(), "no candidate page yielded text");
            return ExtractedRecord::new();
        }

        let missing = record.missing_fields(schema);
        if missing.is_empty() {
            return ExtractedRecord::new();
        }

        let prompt = synthesis_prompt(url, record, &missing, &blob);
        let decoded = self.runner.json("synthesize", &prompt).await;
        let supplement = restrict_to(ExtractedRecord::from_json(&decoded), &missing);
        info!(
            candidates = candidates.len(),
            filled = supplement.populated().count(),
            "deep synthesis done"
        );
        supplement
    }

    async fn collect_candidates(&self, queries: &[String]) -> Vec<String> {
        let mut candidates: Vec<String> = Vec::new();
        for query in queries {
            for hit in self.search.search(query, self.results_per_query).await {
                if candidates.len() >= self.config.max_candidates {
                    break;
                }
                if !hit.link.is_empty() && !candidates.contains(&hit.link) {
                    candidates.push(hit.link);
                }
            }
            if candidates.len() >= self.config.max_candidates {
                break;
            }
        }
        candidates
    }

    async fn aggregate(&self, candidates: &[String]) -> String {
        let mut pages: Vec<String> = Vec::new();
        for link in candidates {
            if pages.len() >= self.config.max_pages {
                break;
            }
            let Some(html) = self.fetcher.fetch(link).await else {
                warn!(url = %link, "deep fetch failed, skipping");
                continue;
            };
            let text = html_to_text(&html);
            if !text.is_empty() {
                pages.push(truncate_chars(&text, self.config.page_chars).to_string());
            }
            if !self.fetch_pause.is_zero() {
                tokio::time::sleep(self.fetch_pause).await;
            }
        }
        let joined = pages.join("\n\n");
        truncate_chars(&joined, self.config.total_chars).to_string()
    }
}

/// Prompt asking only for `missing` fields, listing known values as context
/// that must not change.
fn synthesis_prompt(url: &str, record: &ExtractedRecord, missing: &[Field], blob: &str) -> String {
    let known: Vec<String> = record
        .populated()
        .map(|(field, value)| format!("- {}: {}", field.as_str(), value.trim()))
        .collect();
    let known = if known.is_empty() {
        "(none)".to_string()
    } else {
        known.join("\n")
    };

    format!(
        "You are given multiple web page text snippets related to an event and its organizer.\n\
         Using the combined snippets, fill in ONLY the requested fields below. \
         If a field cannot be determined, return an empty string.\n\
         \n\
         Source URL (original): {url}\n\
         \n\
         Fields requested (return valid JSON with these exact keys):\n\
         {}\n\
         \n\
         Only fill fields that are currently empty in the partial extraction; \
         do not overwrite fields already provided.\n\
         Already known (do not change):\n\
         {known}\n\
         \n\
         Combined snippets (multiple pages):\n\
         {blob}\n",
        schema_template(missing)
    )
}
