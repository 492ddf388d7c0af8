//! Shared collaborators for the batch workflows.

use std::time::Duration;

use eventharvest_fetcher::PageFetcher;
use eventharvest_search::MultiProviderSearch;
use eventharvest_shared::AppConfig;
use eventharvest_storage::Storage;

use crate::llm::{LanguageModel, PromptRunner};

/// Collaborators and configuration shared by every batch operation.
pub struct HarvestContext<'a> {
    pub config: &'a AppConfig,
    pub storage: &'a Storage,
    pub search: &'a MultiProviderSearch,
    /// Fetcher for raw links and deep-search candidates.
    pub fetcher: &'a dyn PageFetcher,
    /// Fetcher for EIN result pages (single attempt, shorter timeout).
    pub ein_fetcher: &'a dyn PageFetcher,
    pub model: &'a dyn LanguageModel,
}

impl<'a> HarvestContext<'a> {
    /// Prompt runner for extraction and synthesis calls.
    pub fn extraction_runner(&self) -> PromptRunner<'a> {
        PromptRunner::new(
            self.model,
            self.config.llm.retry,
            Duration::from_millis(self.config.llm.pause_ms),
        )
    }

    /// Prompt runner for enrichment calls.
    pub fn enrichment_runner(&self) -> PromptRunner<'a> {
        PromptRunner::new(
            self.model,
            self.config.enrichment.retry,
            Duration::from_millis(self.config.llm.pause_ms),
        )
    }
}
