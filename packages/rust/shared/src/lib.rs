//! Shared types, error model, and configuration for eventharvest.
//!
//! This crate is the foundation depended on by all other eventharvest crates.
//! It provides:
//! - [`HarvestError`] - the unified error type
//! - Domain types ([`Field`], [`ExtractedRecord`], [`Organizer`], [`Event`], [`RawLink`])
//! - Configuration ([`AppConfig`], [`RetryPolicy`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, EinConfig, EnrichmentConfig, ExtractionConfig, FetchConfig, IngestConfig,
    LlmConfig, RetryPolicy, SearchConfig, StorageConfig, config_dir, config_file_path,
    env_secret, init_config, load_config, load_config_from, validate_api_key,
};
pub use error::{HarvestError, Result};
pub use types::{
    EnrichmentLogEntry, Event, EventRow, ExtractedRecord, Field, LogStatus, Organizer,
    OrganizerRow, ParseLogEntry, RawLink, SearchHit, SubjectKind, value_to_text,
};
