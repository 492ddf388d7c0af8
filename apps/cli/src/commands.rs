//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use eventharvest_core::{
    ChatCompletionsClient, EnrichmentSummary, HarvestContext, IngestSummary, ParseRunSummary,
    ProgressReporter, ingest_links, process_links, run_enrichment,
};
use eventharvest_fetcher::HttpFetcher;
use eventharvest_search::MultiProviderSearch;
use eventharvest_shared::{
    AppConfig, EventRow, FetchConfig, OrganizerRow, init_config, load_config, validate_api_key,
};
use eventharvest_storage::Storage;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// eventharvest: find fundraising events and their organizers.
#[derive(Parser)]
#[command(
    name = "eventharvest",
    version,
    about = "Search the web for fundraising events, extract them with a language model, and enrich the organizers.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Database file (overrides `storage.database_path`).
    #[arg(long, env = "EVENTHARVEST_DB", global = true)]
    pub database: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run search queries and queue the result links.
    Ingest {
        /// Query to run instead of the configured list (repeatable).
        #[arg(short, long = "query")]
        queries: Vec<String>,
    },

    /// Extract events from queued links that have not been processed yet.
    Parse {
        /// Maximum links to process (defaults to `extraction.batch_limit`).
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Fill in missing organizer and event fields.
    Enrich,

    /// Ingest, parse and enrich in sequence.
    Run {
        /// Maximum links to process in the parse step.
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Print stored records.
    List {
        #[command(subcommand)]
        what: ListTarget,

        /// Print JSON instead of a table.
        #[arg(long, global = true)]
        json: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Record kinds for `list`.
#[derive(Subcommand)]
pub(crate) enum ListTarget {
    Organizers,
    Events,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "eventharvest=info",
        1 => "eventharvest=debug",
        _ => "eventharvest=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let database = cli.database;
    match cli.command {
        Command::Ingest { queries } => cmd_ingest(database, queries).await,
        Command::Parse { limit } => cmd_parse(database, limit).await,
        Command::Enrich => cmd_enrich(database).await,
        Command::Run { limit } => cmd_run(database, limit).await,
        Command::List { what, json } => match what {
            ListTarget::Organizers => cmd_list_organizers(database, json).await,
            ListTarget::Events => cmd_list_events(database, json).await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

/// Load the config, applying the `--database` override.
fn resolve_config(database: Option<PathBuf>) -> Result<AppConfig> {
    let mut config = load_config()?;
    if let Some(path) = database {
        config.storage.database_path = path.to_string_lossy().into_owned();
    }
    Ok(config)
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Owns every collaborator a model-backed command needs.
struct Harvester {
    config: AppConfig,
    storage: Storage,
    search: MultiProviderSearch,
    fetcher: HttpFetcher,
    ein_fetcher: HttpFetcher,
    model: ChatCompletionsClient,
}

impl Harvester {
    async fn open(config: AppConfig) -> Result<Self> {
        validate_api_key(&config)?;

        let storage = Storage::open(&PathBuf::from(&config.storage.database_path)).await?;
        let search = MultiProviderSearch::from_config(&config.search)?;
        let fetcher = HttpFetcher::new(&config.fetch)?;
        let ein_fetcher = HttpFetcher::new(&FetchConfig {
            attempts: 1,
            timeout_secs: config.ein.page_timeout_secs,
            ..config.fetch.clone()
        })?;
        let model = ChatCompletionsClient::from_config(&config.llm)?;

        Ok(Self {
            config,
            storage,
            search,
            fetcher,
            ein_fetcher,
            model,
        })
    }

    fn context(&self) -> HarvestContext<'_> {
        HarvestContext {
            config: &self.config,
            storage: &self.storage,
            search: &self.search,
            fetcher: &self.fetcher,
            ein_fetcher: &self.ein_fetcher,
            model: &self.model,
        }
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_ingest(database: Option<PathBuf>, queries: Vec<String>) -> Result<()> {
    let config = resolve_config(database)?;
    let storage = Storage::open(&PathBuf::from(&config.storage.database_path)).await?;
    let search = MultiProviderSearch::from_config(&config.search)?;
    if search.provider_count() == 0 {
        return Err(eyre!(
            "no search provider configured. Set {} or {} and {}.",
            config.search.serpapi_key_env,
            config.search.google_api_key_env,
            config.search.google_cse_id_env
        ));
    }

    let queries = if queries.is_empty() {
        config.ingest.queries.clone()
    } else {
        queries
    };
    info!(queries = queries.len(), "ingesting search results");

    let started = Instant::now();
    let reporter = CliProgress::new();
    let summary = ingest_links(&storage, &search, &config.ingest, &queries, &reporter).await?;
    print_ingest(&summary, started.elapsed());
    Ok(())
}

async fn cmd_parse(database: Option<PathBuf>, limit: Option<usize>) -> Result<()> {
    let harvester = Harvester::open(resolve_config(database)?).await?;
    let limit = limit.unwrap_or(harvester.config.extraction.batch_limit);

    let started = Instant::now();
    let reporter = CliProgress::new();
    let summary = process_links(&harvester.context(), limit, &reporter).await?;
    print_parse(&summary, started.elapsed());
    Ok(())
}

async fn cmd_enrich(database: Option<PathBuf>) -> Result<()> {
    let harvester = Harvester::open(resolve_config(database)?).await?;

    let started = Instant::now();
    let reporter = CliProgress::new();
    let summary = run_enrichment(&harvester.context(), &reporter).await?;
    print_enrich(&summary, started.elapsed());
    Ok(())
}

async fn cmd_run(database: Option<PathBuf>, limit: Option<usize>) -> Result<()> {
    let harvester = Harvester::open(resolve_config(database)?).await?;
    let config = &harvester.config;
    let ctx = harvester.context();
    let started = Instant::now();

    let reporter = CliProgress::new();
    let ingested = ingest_links(
        ctx.storage,
        ctx.search,
        &config.ingest,
        &config.ingest.queries,
        &reporter,
    )
    .await?;
    print_ingest(&ingested, started.elapsed());

    let reporter = CliProgress::new();
    let limit = limit.unwrap_or(config.extraction.batch_limit);
    let parsed = process_links(&ctx, limit, &reporter).await?;
    print_parse(&parsed, started.elapsed());

    let reporter = CliProgress::new();
    let enriched = run_enrichment(&ctx, &reporter).await?;
    print_enrich(&enriched, started.elapsed());
    Ok(())
}

async fn cmd_list_organizers(database: Option<PathBuf>, json: bool) -> Result<()> {
    let config = resolve_config(database)?;
    let storage = Storage::open_readonly(&PathBuf::from(&config.storage.database_path)).await?;
    let organizers = storage.list_organizers().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&organizers)?);
        return Ok(());
    }
    if organizers.is_empty() {
        println!("No organizers stored.");
        return Ok(());
    }

    println!("{:>5}  {:<40} {:<12} {}", "ID", "NAME", "EIN", "WEBSITE");
    for row in &organizers {
        print_organizer(row);
    }
    println!();
    println!("{} organizer(s)", organizers.len());
    Ok(())
}

async fn cmd_list_events(database: Option<PathBuf>, json: bool) -> Result<()> {
    let config = resolve_config(database)?;
    let storage = Storage::open_readonly(&PathBuf::from(&config.storage.database_path)).await?;
    let events = storage.list_events().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&events)?);
        return Ok(());
    }
    if events.is_empty() {
        println!("No events stored.");
        return Ok(());
    }

    println!(
        "{:>5}  {:<40} {:<10} {:<24} {}",
        "ID", "NAME", "DATE", "VENUE", "CITY"
    );
    for row in &events {
        print_event(row);
    }
    println!();
    println!("{} event(s)", events.len());
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_ingest(summary: &IngestSummary, elapsed: Duration) {
    println!();
    println!("  Ingest complete");
    println!("  Queries: {}", summary.queries_run);
    println!("  Saved:   {}", summary.links_saved);
    println!("  Skipped: {}", summary.links_skipped);
    println!("  Failed:  {}", summary.links_failed);
    println!("  Time:    {:.1}s", elapsed.as_secs_f64());
    println!();
}

fn print_parse(summary: &ParseRunSummary, elapsed: Duration) {
    println!();
    println!("  Parse complete");
    println!("  Processed: {}", summary.processed);
    println!("  Saved:     {}", summary.succeeded);
    println!("  Failed:    {}", summary.failed);
    println!("  Escalated: {}", summary.escalated);
    println!("  Fallbacks: {}", summary.fallbacks);
    println!("  Time:      {:.1}s", elapsed.as_secs_f64());
    println!();
}

fn print_enrich(summary: &EnrichmentSummary, elapsed: Duration) {
    println!();
    println!("  Enrichment complete");
    println!("  Run:        {}", summary.run_id);
    println!("  Organizers: {}", summary.organizers);
    println!("  Events:     {}", summary.events);
    println!("  EINs found: {}", summary.eins_found);
    println!("  Fields:     {}", summary.fields_updated);
    println!("  Time:       {:.1}s", elapsed.as_secs_f64());
    println!();
}

fn print_organizer(row: &OrganizerRow) {
    let org = &row.organizer;
    println!(
        "{:>5}  {:<40} {:<12} {}",
        row.id,
        cell(org.name.as_deref(), 40),
        cell(org.ein.as_deref(), 12),
        org.website.as_deref().unwrap_or("-"),
    );
}

fn print_event(row: &EventRow) {
    let event = &row.event;
    println!(
        "{:>5}  {:<40} {:<10} {:<24} {}",
        row.id,
        cell(event.name.as_deref(), 40),
        cell(event.date.as_deref(), 10),
        cell(event.venue_name.as_deref(), 24),
        event.venue_city.as_deref().unwrap_or("-"),
    );
}

/// Fit an optional value into a fixed-width column.
fn cell(value: Option<&str>, width: usize) -> String {
    let value = value.unwrap_or("-");
    if value.chars().count() <= width {
        return value.to_string();
    }
    let mut out: String = value.chars().take(width.saturating_sub(1)).collect();
    out.push('…');
    out
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn item(&self, label: &str, current: usize, total: Option<usize>) {
        let message = match total {
            Some(total) => format!("[{current}/{total}] {label}"),
            None => format!("[{current}] {label}"),
        };
        self.spinner.set_message(message);
    }

    fn finish(&self, message: &str) {
        self.spinner.finish_and_clear();
        info!("{message}");
    }
}
