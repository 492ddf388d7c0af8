//! Raw-link ingestion: run search queries and queue every new result url.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use eventharvest_search::MultiProviderSearch;
use eventharvest_shared::{IngestConfig, Result};
use eventharvest_storage::Storage;
use eventharvest_text::trim_len;

use crate::progress::ProgressReporter;

/// Column cap for stored query text and result titles.
const TEXT_COLUMN_LEN: usize = 255;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub queries_run: usize,
    pub links_saved: usize,
    /// Results whose url was already queued.
    pub links_skipped: usize,
    /// Results that could not be stored.
    pub links_failed: usize,
}

/// Search each query in turn and store new result urls as raw links,
/// stopping once `config.save_limit` links have been saved.
#[instrument(skip_all, fields(queries = queries.len()))]
pub async fn ingest_links(
    storage: &Storage,
    search: &MultiProviderSearch,
    config: &IngestConfig,
    queries: &[String],
    progress: &dyn ProgressReporter,
) -> Result<IngestSummary> {
    let mut summary = IngestSummary::default();
    let pause = Duration::from_millis(config.pause_ms);
    progress.phase("Searching");

    for (i, query) in queries.iter().enumerate() {
        if summary.links_saved >= config.save_limit {
            info!(limit = config.save_limit, "save limit reached");
            break;
        }
        progress.item(query, i + 1, Some(queries.len()));
        summary.queries_run += 1;

        let hits = search.search(query, config.results_per_query).await;
        debug!(query = %query, hits = hits.len(), "search returned");
        if hits.is_empty() {
            warn!(query = %query, "query returned no results");
        }

        let stored_query = trim_len(query, TEXT_COLUMN_LEN);
        for hit in hits {
            if summary.links_saved >= config.save_limit {
                break;
            }
            if hit.link.trim().is_empty() {
                continue;
            }
            let title = trim_len(&hit.title, TEXT_COLUMN_LEN);
            let inserted = storage
                .insert_raw_link(
                    &stored_query,
                    Some(title.as_str()).filter(|t| !t.is_empty()),
                    hit.link.trim(),
                    Some(hit.snippet.as_str()).filter(|s| !s.is_empty()),
                )
                .await;
            match inserted {
                Ok(true) => summary.links_saved += 1,
                Ok(false) => summary.links_skipped += 1,
                Err(e) => {
                    warn!(url = %hit.link, error = %e, "failed to store raw link");
                    summary.links_failed += 1;
                }
            }
        }

        if i + 1 < queries.len() && !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }

    info!(
        queries_run = summary.queries_run,
        links_saved = summary.links_saved,
        links_skipped = summary.links_skipped,
        links_failed = summary.links_failed,
        "ingestion complete"
    );
    progress.finish(&format!(
        "Saved {} new links from {} queries",
        summary.links_saved, summary.queries_run
    ));
    Ok(summary)
}
