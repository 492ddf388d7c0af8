//! Extraction and enrichment pipeline for eventharvest.
//!
//! This crate ties the search, fetch, storage and language model
//! collaborators together into the three batch workflows: raw-link
//! ingestion, link processing (extract → escalate → upsert), and the
//! enrichment loop over stored records.

pub mod context;
pub mod decode;
pub mod ein;
pub mod enrichment;
pub mod escalator;
pub mod extractor;
pub mod ingest;
pub mod llm;
pub mod pipeline;
pub mod progress;
pub mod retry;

#[cfg(test)]
pub(crate) mod testing;

pub use context::HarvestContext;
pub use decode::decode_json_object;
pub use ein::EinLocator;
pub use enrichment::{EnrichmentSummary, run_enrichment};
pub use escalator::{Escalator, build_queries, should_escalate};
pub use extractor::RecordExtractor;
pub use ingest::{IngestSummary, ingest_links};
pub use llm::{ChatCompletionsClient, LanguageModel, PromptRunner};
pub use pipeline::{ParseRunSummary, process_links};
pub use progress::{ProgressReporter, SilentProgress};
pub use retry::{ErrorClass, classify, retry_with_backoff};
