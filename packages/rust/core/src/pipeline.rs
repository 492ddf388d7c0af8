//! Link-processing pipeline: raw link → fetch → extract → escalate →
//! fallback → upsert → parse log.

use std::time::Duration;

use serde::Serialize;
use tracing::{info, instrument, warn};

use eventharvest_shared::{
    Event, ExtractedRecord, Field, HarvestError, LogStatus, Organizer, RawLink, Result,
};
use eventharvest_storage::Storage;
use eventharvest_text::{html_to_text, normalize_record, page_title};

use crate::context::HarvestContext;
use crate::escalator::{Escalator, should_escalate};
use crate::extractor::RecordExtractor;
use crate::progress::ProgressReporter;

const FETCH_FAILED: &str = "Fetch failed";
const FALLBACK_USED: &str = "Parse failed: invalid JSON (fallback used)";

/// Outcome counts of one `process_links` run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParseRunSummary {
    /// Links taken from the queue.
    pub processed: usize,
    /// Links whose final parse log is `success`.
    pub succeeded: usize,
    /// Links whose final parse log is `failed`.
    pub failed: usize,
    /// Links that went through deep search.
    pub escalated: usize,
    /// Links whose extraction was replaced by the title-only fallback.
    pub fallbacks: usize,
}

/// Process up to `batch_limit` raw links that have no parse log yet.
///
/// Every link ends with at least one parse log entry, so a second run over
/// the same queue finds nothing to do. Per-link failures are logged and the
/// batch continues; only failing to read the queue is an error.
#[instrument(skip_all, fields(batch_limit = batch_limit))]
pub async fn process_links(
    ctx: &HarvestContext<'_>,
    batch_limit: usize,
    progress: &dyn ProgressReporter,
) -> Result<ParseRunSummary> {
    let links = ctx.storage.unprocessed_links(batch_limit).await?;
    let mut summary = ParseRunSummary::default();
    if links.is_empty() {
        info!("no unprocessed links");
        progress.finish("No new links to process");
        return Ok(summary);
    }

    info!(count = links.len(), "processing raw links");
    progress.phase("Processing links");

    let extraction = &ctx.config.extraction;
    let extractor = RecordExtractor::new(ctx.extraction_runner(), extraction.content_chars);
    let escalator = Escalator::new(
        ctx.search,
        ctx.fetcher,
        ctx.extraction_runner(),
        extraction,
        ctx.config.search.results_per_query,
        Duration::from_millis(ctx.config.fetch.pause_ms),
    );

    let total = links.len();
    for (i, link) in links.iter().enumerate() {
        progress.item(&link.url, i + 1, Some(total));
        summary.processed += 1;

        let outcome = process_link(ctx, &extractor, &escalator, link).await;
        if outcome.escalated {
            summary.escalated += 1;
        }
        if outcome.fallback {
            summary.fallbacks += 1;
        }
        match outcome.status {
            LogStatus::Success => summary.succeeded += 1,
            LogStatus::Failed => summary.failed += 1,
        }
    }

    info!(
        processed = summary.processed,
        succeeded = summary.succeeded,
        failed = summary.failed,
        escalated = summary.escalated,
        "link processing complete"
    );
    progress.finish(&format!(
        "Processed {} links ({} saved, {} failed)",
        summary.processed, summary.succeeded, summary.failed
    ));
    Ok(summary)
}

struct LinkOutcome {
    status: LogStatus,
    escalated: bool,
    fallback: bool,
}

#[instrument(skip_all, fields(link_id = link.id, url = %link.url))]
async fn process_link(
    ctx: &HarvestContext<'_>,
    extractor: &RecordExtractor<'_>,
    escalator: &Escalator<'_>,
    link: &RawLink,
) -> LinkOutcome {
    let mut outcome = LinkOutcome {
        status: LogStatus::Failed,
        escalated: false,
        fallback: false,
    };
    let schema = &Field::ALL;
    let threshold = ctx.config.extraction.missing_fields_threshold;

    let Some(html) = ctx.fetcher.fetch(&link.url).await else {
        append_log(ctx.storage, link.id, LogStatus::Failed, FETCH_FAILED).await;
        return outcome;
    };

    let text = html_to_text(&html);
    let mut record = extractor.extract(&text, schema, &link.url).await;
    let missing = record.missing_count(schema);
    info!(missing, "single-pass extraction");

    if should_escalate(&record, schema, threshold) {
        outcome.escalated = true;
        let supplement = escalator.escalate(&link.url, &record, schema).await;
        let filled = record.merge_missing(&supplement);
        info!(
            filled,
            missing = record.missing_count(schema),
            "merged deep synthesis"
        );
    }

    if record.missing_count(schema) == schema.len() {
        outcome.fallback = true;
        record = fallback_record(&html);
        append_log(ctx.storage, link.id, LogStatus::Failed, FALLBACK_USED).await;
    }

    if record.is_missing(Field::RegistrationUrl) {
        record.set(Field::RegistrationUrl, link.url.as_str());
    }
    normalize_record(&mut record);

    let final_missing = record.missing_count(schema);
    match save_record(ctx.storage, &record).await {
        Ok(event_id) => {
            let status = if final_missing < schema.len() {
                LogStatus::Success
            } else {
                LogStatus::Failed
            };
            info!(event_id, final_missing, "record saved");
            append_log(
                ctx.storage,
                link.id,
                status,
                &format!("Parsed and saved (missing_fields={final_missing})"),
            )
            .await;
            outcome.status = status;
        }
        Err(e) => {
            warn!(error = %e, "save failed");
            append_log(ctx.storage, link.id, LogStatus::Failed, &format!("Save error: {e}"))
                .await;
        }
    }
    outcome
}

/// Title-only record used when extraction produced nothing at all.
fn fallback_record(html: &str) -> ExtractedRecord {
    let mut record = ExtractedRecord::new();
    if let Some(title) = page_title(html) {
        record.set(Field::EventName, title);
    }
    record
}

/// Upsert the organizer (when named) and the event. Returns the event id.
///
/// The event is validated first so a record that cannot be stored leaves
/// no organizer row behind.
async fn save_record(storage: &Storage, record: &ExtractedRecord) -> Result<i64> {
    let event = Event::from_record(record);
    if event.name.is_none() {
        return Err(HarvestError::validation("event name is required"));
    }

    let organizer = Organizer::from_record(record);
    let organizer_id = match organizer.name {
        Some(_) => Some(storage.upsert_organizer(&organizer).await?),
        None => None,
    };
    storage.upsert_event(&event, organizer_id).await
}

async fn append_log(storage: &Storage, link_id: i64, status: LogStatus, message: &str) {
    if let Err(e) = storage.log_parse(link_id, status, message).await {
        warn!(link_id, error = %e, "failed to append parse log");
    }
}
