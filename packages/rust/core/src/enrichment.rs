//! Batch enrichment of stored organizers and events.
//!
//! Each run gets a UUID v7 `run_id`. A subject is attempted at most once per
//! run: selection skips anything that already has an enrichment log row for
//! the current run, and every attempt appends at least one row. Later runs
//! pick up subjects whose fields are still unknown.

use std::collections::HashSet;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use eventharvest_shared::{
    EventRow, Field, LogStatus, OrganizerRow, Result, SubjectKind, value_to_text,
};
use eventharvest_storage::{EVENT_ENRICHABLE, NewEnrichmentLog, Storage};
use eventharvest_text::{clean_text, trim_len};

use crate::context::HarvestContext;
use crate::ein::EinLocator;
use crate::llm::PromptRunner;
use crate::progress::ProgressReporter;

/// Log source for the EIN lookup.
pub const SOURCE_EIN: &str = "multi_source";
/// Log source for the social/contact prompt.
pub const SOURCE_SOCIAL: &str = "llm_social";
/// Log source for the event field prompt.
pub const SOURCE_EVENT: &str = "llm_event_fields";

/// Reply keys of the social/contact prompt and the columns they fill.
const SOCIAL_KEYS: [(&str, Field); 3] = [
    ("facebook", Field::OrganizerFacebook),
    ("instagram", Field::OrganizerInstagram),
    ("contact_title", Field::OrganizerContactTitle),
];

/// Outcome counts of one enrichment run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrichmentSummary {
    pub run_id: String,
    pub organizers: usize,
    pub events: usize,
    pub eins_found: usize,
    pub fields_updated: usize,
}

/// Run the enrichment loop until nothing is selectable or the configured
/// budget of subjects is spent.
#[instrument(skip_all)]
pub async fn run_enrichment(
    ctx: &HarvestContext<'_>,
    progress: &dyn ProgressReporter,
) -> Result<EnrichmentSummary> {
    let config = &ctx.config.enrichment;
    let run_id = uuid::Uuid::now_v7().to_string();
    let pause = Duration::from_millis(config.pause_ms);
    let batch_size = config.batch_size.max(1);
    let budget = config.budget;

    let runner = ctx.enrichment_runner();
    let locator = EinLocator::new(
        ctx.search,
        ctx.ein_fetcher,
        ctx.config.search.results_per_query,
        ctx.config.ein.max_page_fetches,
    );

    let mut summary = EnrichmentSummary {
        run_id: run_id.clone(),
        ..EnrichmentSummary::default()
    };
    info!(%run_id, budget, "starting enrichment run");
    progress.phase("Enriching records");

    // The enrichment log excludes attempted subjects from selection; these
    // sets keep that true when a log append fails.
    let mut attempted_organizers: HashSet<i64> = HashSet::new();
    let mut attempted_events: HashSet<i64> = HashSet::new();
    let mut organizers_open = true;
    let mut events_open = true;

    let mut processed = 0;
    while processed < budget && (organizers_open || events_open) {
        let mut attempted_this_pass = 0;

        if organizers_open {
            let limit = batch_size.min(budget - processed);
            let selected = ctx
                .storage
                .organizers_to_enrich(&run_id, limit + attempted_organizers.len())
                .await;
            let organizers = match selected {
                Ok(rows) => take_unattempted(rows, |r| r.id, &attempted_organizers, limit),
                Err(e) => {
                    warn!(error = %e, "organizer selection failed, skipping organizers this run");
                    Vec::new()
                }
            };
            organizers_open = !organizers.is_empty();
            for row in &organizers {
                attempted_organizers.insert(row.id);
                attempted_this_pass += 1;
                processed += 1;
                progress.item(&label(row.organizer.name.as_deref()), processed, Some(budget));
                let (ein_found, updated) =
                    enrich_organizer(ctx.storage, &locator, runner, &run_id, row).await;
                summary.organizers += 1;
                summary.eins_found += usize::from(ein_found);
                summary.fields_updated += updated;
                pause_after_subject(pause).await;
            }
        }

        if processed >= budget {
            break;
        }

        if events_open {
            let limit = batch_size.min(budget - processed);
            let selected = ctx
                .storage
                .events_to_enrich(&run_id, limit + attempted_events.len())
                .await;
            let events = match selected {
                Ok(rows) => take_unattempted(rows, |r| r.id, &attempted_events, limit),
                Err(e) => {
                    warn!(error = %e, "event selection failed, skipping events this run");
                    Vec::new()
                }
            };
            events_open = !events.is_empty();
            for row in &events {
                attempted_events.insert(row.id);
                attempted_this_pass += 1;
                processed += 1;
                progress.item(&label(row.event.name.as_deref()), processed, Some(budget));
                summary.events += 1;
                summary.fields_updated += enrich_event(ctx.storage, runner, &run_id, row).await;
                pause_after_subject(pause).await;
            }
        }

        if attempted_this_pass == 0 {
            info!("nothing left to enrich");
            break;
        }
    }

    info!(
        %run_id,
        organizers = summary.organizers,
        events = summary.events,
        eins_found = summary.eins_found,
        fields_updated = summary.fields_updated,
        "enrichment run complete"
    );
    progress.finish(&format!(
        "Enriched {} organizers and {} events ({} fields updated)",
        summary.organizers, summary.events, summary.fields_updated
    ));
    Ok(summary)
}

/// Drop rows already attempted in this run and keep at most `limit`.
fn take_unattempted<T>(
    rows: Vec<T>,
    id: impl Fn(&T) -> i64,
    attempted: &HashSet<i64>,
    limit: usize,
) -> Vec<T> {
    rows.into_iter()
        .filter(|row| !attempted.contains(&id(row)))
        .take(limit)
        .collect()
}

fn label(name: Option<&str>) -> String {
    name.unwrap_or("(unnamed)").to_string()
}

async fn pause_after_subject(pause: Duration) {
    if !pause.is_zero() {
        tokio::time::sleep(pause).await;
    }
}

fn is_unknown(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}

/// Clean a reply value and cap it to the column length.
fn reply_value(map: &Map<String, Value>, key: &str, field: Field) -> Option<String> {
    let text = clean_text(&value_to_text(map.get(key)?)?)?;
    Some(match field.max_len() {
        Some(max) => trim_len(&text, max),
        None => text,
    })
}

/// Appends enrichment log rows for one subject within one run.
struct LogTarget<'a> {
    storage: &'a Storage,
    run_id: &'a str,
    kind: SubjectKind,
    subject_id: i64,
}

impl LogTarget<'_> {
    async fn append(&self, source: &str, value: Option<&str>, status: LogStatus, message: &str) {
        let entry = NewEnrichmentLog {
            run_id: self.run_id,
            subject_kind: self.kind,
            subject_id: self.subject_id,
            source,
            value,
            status,
            message,
        };
        if let Err(e) = self.storage.log_enrichment(&entry).await {
            warn!(subject_id = self.subject_id, source, error = %e, "failed to append enrichment log");
        }
    }
}

// ---------------------------------------------------------------------------
// Organizers
// ---------------------------------------------------------------------------

pub fn social_prompt(name: &str, website: Option<&str>) -> String {
    format!(
        "We have a nonprofit or event organizer profile.\n\
         \n\
         Organizer: {name}\n\
         Website: {}\n\
         \n\
         Return ONLY JSON with:\n\
         {{\n  \
           \"facebook\": \"full URL or empty string\",\n  \
           \"instagram\": \"full URL or empty string\",\n  \
           \"contact_title\": \"e.g. Development Director, Events Manager (or empty)\"\n\
         }}\n",
        website.unwrap_or("unknown")
    )
}

/// Returns whether an EIN was found and how many columns were written.
#[instrument(skip_all, fields(organizer_id = row.id))]
async fn enrich_organizer(
    storage: &Storage,
    locator: &EinLocator<'_>,
    runner: PromptRunner<'_>,
    run_id: &str,
    row: &OrganizerRow,
) -> (bool, usize) {
    let log = LogTarget {
        storage,
        run_id,
        kind: SubjectKind::Organizer,
        subject_id: row.id,
    };
    let org = &row.organizer;
    let name = org.name.as_deref().unwrap_or_default();
    let mut updates: Vec<(Field, String)> = Vec::new();
    let mut ein_found = false;

    if is_unknown(&org.ein) {
        match locator.locate(name).await {
            Some(ein) => {
                let ein = trim_len(&ein, Field::OrganizerEin.max_len().unwrap_or(20));
                log.append(SOURCE_EIN, Some(&ein), LogStatus::Success, "EIN found").await;
                updates.push((Field::OrganizerEin, ein));
                ein_found = true;
            }
            None => {
                log.append(SOURCE_EIN, None, LogStatus::Failed, "No EIN found").await;
            }
        }
    }

    let social_unknown = is_unknown(&org.facebook)
        || is_unknown(&org.instagram)
        || is_unknown(&org.contact_title);
    let mut social_values = 0;
    if social_unknown {
        let reply = runner
            .json(SOURCE_SOCIAL, &social_prompt(name, org.website.as_deref()))
            .await;
        for (key, field) in SOCIAL_KEYS {
            if let Some(value) = reply_value(&reply, key, field) {
                updates.push((field, value));
                social_values += 1;
            }
        }
    }

    let written = match storage.update_organizer_fields(row.id, &updates).await {
        Ok(n) => n,
        Err(e) => {
            warn!(error = %e, "organizer update failed");
            log.append(SOURCE_SOCIAL, None, LogStatus::Failed, &format!("Update error: {e}")).await;
            return (ein_found, 0);
        }
    };

    if social_unknown {
        let (status, message) = if social_values > 0 {
            (LogStatus::Success, format!("Updated {written} fields"))
        } else {
            (LogStatus::Failed, "No social or contact data returned".to_string())
        };
        log.append(SOURCE_SOCIAL, None, status, &message).await;
    }
    debug!(written, ein_found, "organizer enriched");
    (ein_found, written)
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

pub fn event_prompt(row: &EventRow) -> String {
    let ev = &row.event;
    let show = |v: &Option<String>| v.clone().unwrap_or_else(|| "unknown".to_string());
    format!(
        "Some event fields are missing. Infer them from context if possible.\n\
         Return ONLY JSON with all keys present.\n\
         \n\
         Event Name: {}\n\
         Event Date: {}\n\
         Venue: {} in {}, {}\n\
         Registration URL: {}\n\
         Sponsorship URL: {}\n\
         \n\
         {{\n  \
           \"description\": \"1-3 sentence summary or empty\",\n  \
           \"event_type\": \"Gala / Fundraiser / Conference / etc. or empty\",\n  \
           \"dress_code\": \"Black-tie / Formal / Business / Casual / empty\",\n  \
           \"venue_parking\": \"Parking/valet notes or empty\",\n  \
           \"sponsorship_tiers\": \"e.g. Gold/Silver/Bronze or empty\",\n  \
           \"sponsorship_contact\": \"name/email or empty\",\n  \
           \"past_sponsors\": \"list or string of sponsor names (can be empty)\"\n\
         }}\n",
        show(&ev.name),
        show(&ev.date),
        show(&ev.venue_name),
        show(&ev.venue_city),
        show(&ev.venue_state),
        show(&ev.registration_url),
        show(&ev.sponsorship_url),
    )
}

/// Organizer fields have no event column.
static NO_VALUE: Option<String> = None;

fn event_value(row: &EventRow, field: Field) -> &Option<String> {
    let ev = &row.event;
    match field {
        Field::Description => &ev.description,
        Field::EventType => &ev.event_type,
        Field::DressCode => &ev.dress_code,
        Field::VenueParking => &ev.venue_parking,
        Field::SponsorshipTiers => &ev.sponsorship_tiers,
        Field::SponsorshipContact => &ev.sponsorship_contact,
        Field::PastSponsors => &ev.past_sponsors,
        Field::EventName => &ev.name,
        Field::EventDate => &ev.date,
        Field::VenueName => &ev.venue_name,
        Field::VenueAddress => &ev.venue_address,
        Field::VenueCity => &ev.venue_city,
        Field::VenueState => &ev.venue_state,
        Field::VenueZip => &ev.venue_zip,
        Field::VenueWebsite => &ev.venue_website,
        Field::RegistrationUrl => &ev.registration_url,
        Field::SponsorshipUrl => &ev.sponsorship_url,
        Field::OrganizerName
        | Field::OrganizerEin
        | Field::OrganizerWebsite
        | Field::OrganizerEmail
        | Field::OrganizerPhone
        | Field::OrganizerContactName
        | Field::OrganizerContactTitle
        | Field::OrganizerContactEmail
        | Field::OrganizerFacebook
        | Field::OrganizerInstagram => &NO_VALUE,
    }
}

/// Returns how many columns were written.
#[instrument(skip_all, fields(event_id = row.id))]
async fn enrich_event(
    storage: &Storage,
    runner: PromptRunner<'_>,
    run_id: &str,
    row: &EventRow,
) -> usize {
    let log = LogTarget {
        storage,
        run_id,
        kind: SubjectKind::Event,
        subject_id: row.id,
    };
    let reply = runner.json(SOURCE_EVENT, &event_prompt(row)).await;

    let updates: Vec<(Field, String)> = EVENT_ENRICHABLE
        .iter()
        .filter(|f| is_unknown(event_value(row, **f)))
        .filter_map(|f| reply_value(&reply, f.as_str(), *f).map(|v| (*f, v)))
        .collect();

    if updates.is_empty() {
        log.append(SOURCE_EVENT, None, LogStatus::Failed, "No event fields inferred").await;
        return 0;
    }

    match storage.update_event_fields(row.id, &updates).await {
        Ok(written) => {
            let names: Vec<&str> = updates.iter().map(|(f, _)| f.as_str()).collect();
            log.append(
                SOURCE_EVENT,
                None,
                LogStatus::Success,
                &format!("Updated {written} fields: {}", names.join(", ")),
            )
            .await;
            written
        }
        Err(e) => {
            warn!(error = %e, "event update failed");
            log.append(SOURCE_EVENT, None, LogStatus::Failed, &format!("Update error: {e}")).await;
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SilentProgress;
    use crate::testing::{MapFetcher, QuerySearch, RoutedModel, fast_retry, hit, temp_storage};
    use eventharvest_search::MultiProviderSearch;
    use eventharvest_shared::{AppConfig, Event, Organizer};

    const SOCIAL: &str = "We have a nonprofit";
    const EVENT: &str = "Some event fields are missing";

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.llm.pause_ms = 0;
        config.enrichment.pause_ms = 0;
        config.enrichment.retry = fast_retry();
        config
    }

    fn organizer(name: &str) -> Organizer {
        Organizer {
            name: Some(name.into()),
            website: Some(format!("https://{}.org", name.to_lowercase().replace(' ', ""))),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn enriches_organizer_ein_and_socials() {
        let storage = temp_storage().await;
        let id = storage.upsert_organizer(&organizer("Helping Hands")).await.unwrap();

        let config = test_config();
        let search = MultiProviderSearch::new(vec![Box::new(QuerySearch::default().with(
            "Helping Hands site:projects.propublica.org OR site:apps.irs.gov",
            vec![hit("Helping Hands", "https://projects.propublica.org/x", "EIN 36-1234567")],
        ))]);
        let fetcher = MapFetcher::default();
        let model = RoutedModel::new(vec![(
            SOCIAL,
            r#"{"facebook": "https://facebook.com/helpinghands", "instagram": "",
                "contact_title": "Development Director"}"#,
        )]);
        let ctx = HarvestContext {
            config: &config,
            storage: &storage,
            search: &search,
            fetcher: &fetcher,
            ein_fetcher: &fetcher,
            model: &model,
        };

        let summary = run_enrichment(&ctx, &SilentProgress).await.unwrap();
        assert_eq!(summary.organizers, 1);
        assert_eq!(summary.events, 0);
        assert_eq!(summary.eins_found, 1);
        assert_eq!(summary.fields_updated, 3);

        let row = storage.get_organizer(id).await.unwrap().unwrap();
        assert_eq!(row.organizer.ein.as_deref(), Some("36-1234567"));
        assert_eq!(
            row.organizer.facebook.as_deref(),
            Some("https://facebook.com/helpinghands")
        );
        assert_eq!(row.organizer.instagram, None);
        assert_eq!(row.organizer.contact_title.as_deref(), Some("Development Director"));

        let logs = storage
            .enrichment_logs_for(SubjectKind::Organizer, id)
            .await
            .unwrap();
        let sources: Vec<&str> = logs.iter().map(|l| l.source.as_str()).collect();
        assert_eq!(sources, vec![SOURCE_EIN, SOURCE_SOCIAL]);
        assert_eq!(logs[0].value.as_deref(), Some("36-1234567"));
        assert!(logs.iter().all(|l| l.run_id == summary.run_id));
        assert_eq!(model.prompts_containing(SOCIAL), 1);
    }

    #[tokio::test]
    async fn event_fields_never_overwrite_known_values() {
        let storage = temp_storage().await;
        let event = Event {
            name: Some("Spring Gala".into()),
            event_type: Some("Gala".into()),
            description: Some("An evening of giving.".into()),
            ..Default::default()
        };
        let id = storage.upsert_event(&event, None).await.unwrap();

        let config = test_config();
        let search = MultiProviderSearch::new(vec![]);
        let fetcher = MapFetcher::default();
        let model = RoutedModel::new(vec![(
            EVENT,
            r#"{"description": "Replaced", "event_type": "Conference", "dress_code": "Black-tie",
                "venue_parking": "", "sponsorship_contact": null,
                "past_sponsors": ["Acme", "Globex"]}"#,
        )]);
        let ctx = HarvestContext {
            config: &config,
            storage: &storage,
            search: &search,
            fetcher: &fetcher,
            ein_fetcher: &fetcher,
            model: &model,
        };

        let summary = run_enrichment(&ctx, &SilentProgress).await.unwrap();
        assert_eq!(summary.events, 1);
        assert_eq!(summary.fields_updated, 2);

        let row = storage.get_event(id).await.unwrap().unwrap();
        assert_eq!(row.event.description.as_deref(), Some("An evening of giving."));
        assert_eq!(row.event.event_type.as_deref(), Some("Gala"));
        assert_eq!(row.event.dress_code.as_deref(), Some("Black-tie"));
        assert_eq!(row.event.past_sponsors.as_deref(), Some(r#"["Acme","Globex"]"#));
        assert_eq!(row.event.venue_parking, None);
        assert_eq!(row.event.sponsorship_contact, None);

        let logs = storage.enrichment_logs_for(SubjectKind::Event, id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].source, SOURCE_EVENT);
        assert_eq!(logs[0].status, LogStatus::Success);
    }

    #[tokio::test]
    async fn stops_at_budget_and_when_nothing_selectable() {
        let storage = temp_storage().await;
        for name in ["Alpha Fund", "Beta Trust", "Gamma Society"] {
            storage.upsert_organizer(&organizer(name)).await.unwrap();
        }

        let mut config = test_config();
        config.enrichment.budget = 2;
        config.enrichment.batch_size = 8;
        let search = MultiProviderSearch::new(vec![]);
        let fetcher = MapFetcher::default();
        let model = RoutedModel::new(vec![]);
        let ctx = HarvestContext {
            config: &config,
            storage: &storage,
            search: &search,
            fetcher: &fetcher,
            ein_fetcher: &fetcher,
            model: &model,
        };

        let summary = run_enrichment(&ctx, &SilentProgress).await.unwrap();
        assert_eq!(summary.organizers, 2);
        assert_eq!(summary.fields_updated, 0);

        // A fresh run re-selects subjects whose fields are still unknown.
        let unbounded = test_config();
        let ctx = HarvestContext {
            config: &unbounded,
            ..ctx
        };
        let summary = run_enrichment(&ctx, &SilentProgress).await.unwrap();
        assert_eq!(summary.organizers, 3);
        assert_eq!(summary.eins_found, 0);
    }

    #[tokio::test]
    async fn subject_is_attempted_once_even_when_logs_cannot_be_written() {
        let tmp = std::env::temp_dir().join(format!("eh_enrich_{}.db", uuid::Uuid::now_v7()));
        let rw = Storage::open(&tmp).await.unwrap();
        rw.upsert_organizer(&organizer("Helping Hands")).await.unwrap();
        drop(rw);
        let storage = Storage::open_readonly(&tmp).await.unwrap();

        let mut config = test_config();
        config.enrichment.budget = 5;
        let search = MultiProviderSearch::new(vec![]);
        let fetcher = MapFetcher::default();
        let model = RoutedModel::new(vec![(SOCIAL, r#"{"facebook": "https://facebook.com/hh"}"#)]);
        let ctx = HarvestContext {
            config: &config,
            storage: &storage,
            search: &search,
            fetcher: &fetcher,
            ein_fetcher: &fetcher,
            model: &model,
        };

        let summary = run_enrichment(&ctx, &SilentProgress).await.unwrap();
        assert_eq!(summary.organizers, 1);
        assert_eq!(summary.fields_updated, 0);
        assert_eq!(model.prompts_containing(SOCIAL), 1);
    }

    #[tokio::test]
    async fn selection_errors_end_the_run_without_failing() {
        // An empty file opens as a database with no tables.
        let tmp = std::env::temp_dir().join(format!("eh_enrich_{}.db", uuid::Uuid::now_v7()));
        std::fs::write(&tmp, b"").unwrap();
        let storage = Storage::open_readonly(&tmp).await.unwrap();

        let config = test_config();
        let search = MultiProviderSearch::new(vec![]);
        let fetcher = MapFetcher::default();
        let model = RoutedModel::new(vec![]);
        let ctx = HarvestContext {
            config: &config,
            storage: &storage,
            search: &search,
            fetcher: &fetcher,
            ein_fetcher: &fetcher,
            model: &model,
        };

        let summary = run_enrichment(&ctx, &SilentProgress).await.unwrap();
        assert_eq!(summary.organizers + summary.events, 0);
    }

    #[test]
    fn event_value_reads_the_matching_column() {
        let row = EventRow {
            id: 1,
            uid: "u".into(),
            organizer_id: None,
            event: Event {
                name: Some("Spring Gala".into()),
                past_sponsors: Some("Acme Bank".into()),
                ..Default::default()
            },
        };
        assert_eq!(event_value(&row, Field::PastSponsors).as_deref(), Some("Acme Bank"));
        assert_eq!(event_value(&row, Field::EventName).as_deref(), Some("Spring Gala"));
        assert_eq!(event_value(&row, Field::DressCode), &None);
        assert_eq!(event_value(&row, Field::OrganizerName), &None);
    }

    #[test]
    fn take_unattempted_skips_seen_ids() {
        let attempted = HashSet::from([1, 3]);
        let kept = take_unattempted(vec![1, 2, 3, 4, 5], |id| *id, &attempted, 2);
        assert_eq!(kept, vec![2, 4]);
    }

    #[tokio::test]
    async fn empty_store_finishes_immediately() {
        let storage = temp_storage().await;
        let config = test_config();
        let search = MultiProviderSearch::new(vec![]);
        let fetcher = MapFetcher::default();
        let model = RoutedModel::new(vec![]);
        let ctx = HarvestContext {
            config: &config,
            storage: &storage,
            search: &search,
            fetcher: &fetcher,
            ein_fetcher: &fetcher,
            model: &model,
        };

        let summary = run_enrichment(&ctx, &SilentProgress).await.unwrap();
        assert_eq!(summary.organizers + summary.events, 0);
        assert!(!summary.run_id.is_empty());
    }

    #[test]
    fn prompts_describe_the_subject() {
        let prompt = social_prompt("Helping Hands", None);
        assert!(prompt.contains("Organizer: Helping Hands"));
        assert!(prompt.contains("Website: unknown"));

        let row = EventRow {
            id: 1,
            uid: "u".into(),
            organizer_id: None,
            event: Event {
                name: Some("Spring Gala".into()),
                venue_name: Some("The Drake".into()),
                venue_city: Some("Chicago".into()),
                venue_state: Some("IL".into()),
                ..Default::default()
            },
        };
        let prompt = event_prompt(&row);
        assert!(prompt.contains("Event Name: Spring Gala"));
        assert!(prompt.contains("Venue: The Drake in Chicago, IL"));
        assert!(prompt.contains("\"past_sponsors\""));
    }
}
