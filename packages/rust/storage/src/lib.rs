//! libSQL storage layer (local file mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding organizers, events,
//! raw search links and the two append-only logs. It is also the
//! deduplicating upsert layer: it alone computes identity keys (see
//! [`identity`]) and decides between create and resolve.
//!
//! Every operation opens a fresh connection and drops it on return; no
//! transaction spans more than one call.

mod identity;
mod migrations;

use std::path::Path;

use chrono::Utc;
use libsql::{Connection, Database, params};
use tracing::debug;

use eventharvest_shared::{
    EnrichmentLogEntry, Event, EventRow, Field, HarvestError, LogStatus, Organizer, OrganizerRow,
    ParseLogEntry, RawLink, Result, SubjectKind,
};

pub use identity::{event_identity, identity, organizer_identity};

/// Organizer fields the enrichment loop tries to fill.
pub const ORGANIZER_ENRICHABLE: [Field; 4] = [
    Field::OrganizerEin,
    Field::OrganizerFacebook,
    Field::OrganizerInstagram,
    Field::OrganizerContactTitle,
];

/// Event fields the enrichment loop tries to fill.
pub const EVENT_ENRICHABLE: [Field; 7] = [
    Field::Description,
    Field::EventType,
    Field::DressCode,
    Field::VenueParking,
    Field::SponsorshipTiers,
    Field::SponsorshipContact,
    Field::PastSponsors,
];

const ORGANIZER_COLUMNS: &str = "id, uid, name, ein, website, email, phone, contact_name, \
     contact_title, contact_email, facebook, instagram";

const EVENT_COLUMNS: &str = "id, uid, organizer_id, name, date, event_type, description, \
     venue_name, venue_address, venue_city, venue_state, venue_zip, venue_parking, \
     venue_website, registration_url, sponsorship_url, sponsorship_tiers, \
     sponsorship_contact, past_sponsors, dress_code";

/// A new row for the enrichment log.
#[derive(Debug, Clone)]
pub struct NewEnrichmentLog<'a> {
    pub run_id: &'a str,
    pub subject_kind: SubjectKind,
    pub subject_id: i64,
    pub source: &'a str,
    pub value: Option<&'a str>,
    pub status: LogStatus,
    pub message: &'a str,
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    db: Database,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| HarvestError::io(parent, e))?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` for reading only.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(HarvestError::Storage(format!(
                "database not found: {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;

        Ok(Self { db, readonly: true })
    }

    /// Open a short-lived connection for one operation.
    fn connect(&self) -> Result<Connection> {
        self.db
            .connect()
            .map_err(|e| HarvestError::Storage(e.to_string()))
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;
        let conn = self.connect()?;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                conn.execute_batch(migration.sql).await.map_err(|e| {
                    HarvestError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let Ok(conn) = self.connect() else {
            return 0;
        };
        let result = conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(HarvestError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Raw links
    // -----------------------------------------------------------------------

    /// Store a search result. Returns `false` if the url was already stored.
    pub async fn insert_raw_link(
        &self,
        query: &str,
        title: Option<&str>,
        url: &str,
        snippet: Option<&str>,
    ) -> Result<bool> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let inserted = self
            .connect()?
            .execute(
                "INSERT INTO raw_links (query, title, url, snippet, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(url) DO NOTHING",
                params![query, title, url, snippet, now.as_str()],
            )
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;
        Ok(inserted == 1)
    }

    /// Raw links with no parse log entry, oldest first.
    pub async fn unprocessed_links(&self, limit: usize) -> Result<Vec<RawLink>> {
        let mut rows = self
            .connect()?
            .query(
                "SELECT r.id, r.query, r.title, r.url, r.snippet, r.created_at
                 FROM raw_links r
                 WHERE NOT EXISTS (SELECT 1 FROM parse_logs p WHERE p.raw_link_id = r.id)
                 ORDER BY r.id
                 LIMIT ?1",
                params![limit as i64],
            )
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(RawLink {
                id: row
                    .get::<i64>(0)
                    .map_err(|e| HarvestError::Storage(e.to_string()))?,
                query: row
                    .get::<String>(1)
                    .map_err(|e| HarvestError::Storage(e.to_string()))?,
                title: row.get::<String>(2).ok(),
                url: row
                    .get::<String>(3)
                    .map_err(|e| HarvestError::Storage(e.to_string()))?,
                snippet: row.get::<String>(4).ok(),
                created_at: row
                    .get::<String>(5)
                    .map_err(|e| HarvestError::Storage(e.to_string()))?,
            });
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Parse log
    // -----------------------------------------------------------------------

    /// Append a processing outcome for a raw link.
    pub async fn log_parse(&self, raw_link_id: i64, status: LogStatus, message: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.connect()?
            .execute(
                "INSERT INTO parse_logs (raw_link_id, status, message, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![raw_link_id, status.as_str(), message, now.as_str()],
            )
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;
        Ok(())
    }

    /// All parse log entries for a raw link, oldest first.
    pub async fn parse_logs_for(&self, raw_link_id: i64) -> Result<Vec<ParseLogEntry>> {
        let mut rows = self
            .connect()?
            .query(
                "SELECT id, raw_link_id, status, message, created_at
                 FROM parse_logs WHERE raw_link_id = ?1 ORDER BY id",
                params![raw_link_id],
            )
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let status: String = row
                .get(2)
                .map_err(|e| HarvestError::Storage(e.to_string()))?;
            results.push(ParseLogEntry {
                id: row
                    .get::<i64>(0)
                    .map_err(|e| HarvestError::Storage(e.to_string()))?,
                raw_link_id: row
                    .get::<i64>(1)
                    .map_err(|e| HarvestError::Storage(e.to_string()))?,
                status: parse_status(&status)?,
                message: row
                    .get::<String>(3)
                    .map_err(|e| HarvestError::Storage(e.to_string()))?,
                created_at: row
                    .get::<String>(4)
                    .map_err(|e| HarvestError::Storage(e.to_string()))?,
            });
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Upserts
    // -----------------------------------------------------------------------

    /// Insert an organizer or resolve the existing one with the same identity.
    ///
    /// An existing row is never modified: the first write wins.
    pub async fn upsert_organizer(&self, organizer: &Organizer) -> Result<i64> {
        self.check_writable()?;
        let name = required_name(organizer.name.as_deref(), "organizer")?;
        let uid = organizer_identity(name, organizer.website.as_deref());
        let now = Utc::now().to_rfc3339();
        let conn = self.connect()?;

        let inserted = conn
            .execute(
                "INSERT INTO organizers (uid, name, ein, website, email, phone, contact_name,
                     contact_title, contact_email, facebook, instagram, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(uid) DO NOTHING",
                params![
                    uid.as_str(),
                    name,
                    organizer.ein.as_deref(),
                    organizer.website.as_deref(),
                    organizer.email.as_deref(),
                    organizer.phone.as_deref(),
                    organizer.contact_name.as_deref(),
                    organizer.contact_title.as_deref(),
                    organizer.contact_email.as_deref(),
                    organizer.facebook.as_deref(),
                    organizer.instagram.as_deref(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;

        let id = id_for_uid(&conn, "organizers", &uid).await?;
        debug!(id, created = inserted == 1, "organizer upserted");
        Ok(id)
    }

    /// Insert an event or resolve the existing one with the same identity.
    ///
    /// An existing row is never modified: the first write wins.
    pub async fn upsert_event(&self, event: &Event, organizer_id: Option<i64>) -> Result<i64> {
        self.check_writable()?;
        let name = required_name(event.name.as_deref(), "event")?;
        let uid = event_identity(name, event.date.as_deref(), event.venue_name.as_deref());
        let now = Utc::now().to_rfc3339();
        let conn = self.connect()?;

        let inserted = conn
            .execute(
                "INSERT INTO events (uid, organizer_id, name, date, event_type, description,
                     venue_name, venue_address, venue_city, venue_state, venue_zip,
                     venue_parking, venue_website, registration_url, sponsorship_url,
                     sponsorship_tiers, sponsorship_contact, past_sponsors, dress_code,
                     created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                     ?16, ?17, ?18, ?19, ?20)
                 ON CONFLICT(uid) DO NOTHING",
                params![
                    uid.as_str(),
                    organizer_id,
                    name,
                    event.date.as_deref(),
                    event.event_type.as_deref(),
                    event.description.as_deref(),
                    event.venue_name.as_deref(),
                    event.venue_address.as_deref(),
                    event.venue_city.as_deref(),
                    event.venue_state.as_deref(),
                    event.venue_zip.as_deref(),
                    event.venue_parking.as_deref(),
                    event.venue_website.as_deref(),
                    event.registration_url.as_deref(),
                    event.sponsorship_url.as_deref(),
                    event.sponsorship_tiers.as_deref(),
                    event.sponsorship_contact.as_deref(),
                    event.past_sponsors.as_deref(),
                    event.dress_code.as_deref(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;

        let id = id_for_uid(&conn, "events", &uid).await?;
        debug!(id, created = inserted == 1, "event upserted");
        Ok(id)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn get_organizer(&self, id: i64) -> Result<Option<OrganizerRow>> {
        let sql = format!("SELECT {ORGANIZER_COLUMNS} FROM organizers WHERE id = ?1");
        let mut rows = self
            .connect()?
            .query(&sql, params![id])
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_organizer(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(HarvestError::Storage(e.to_string())),
        }
    }

    pub async fn get_event(&self, id: i64) -> Result<Option<EventRow>> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1");
        let mut rows = self
            .connect()?
            .query(&sql, params![id])
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_event(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(HarvestError::Storage(e.to_string())),
        }
    }

    /// All organizers ordered by id.
    pub async fn list_organizers(&self) -> Result<Vec<OrganizerRow>> {
        let sql = format!("SELECT {ORGANIZER_COLUMNS} FROM organizers ORDER BY id");
        self.query_organizers(&sql, params![]).await
    }

    /// All events ordered by id.
    pub async fn list_events(&self) -> Result<Vec<EventRow>> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events ORDER BY id");
        self.query_events(&sql, params![]).await
    }

    async fn query_organizers(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<OrganizerRow>> {
        let mut rows = self
            .connect()?
            .query(sql, params)
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_organizer(&row)?);
        }
        Ok(results)
    }

    async fn query_events(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<EventRow>> {
        let mut rows = self
            .connect()?
            .query(sql, params)
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_event(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Enrichment selection and updates
    // -----------------------------------------------------------------------

    /// Organizers with a usable name and at least one unknown enrichable
    /// field, excluding any already logged in `run_id`.
    pub async fn organizers_to_enrich(
        &self,
        run_id: &str,
        limit: usize,
    ) -> Result<Vec<OrganizerRow>> {
        let sql = format!(
            "SELECT {ORGANIZER_COLUMNS} FROM organizers o
             WHERE TRIM(o.name) != ''
               AND LOWER(TRIM(o.name)) NOT IN ('none', 'null')
               AND ({unknown})
               AND NOT EXISTS (
                   SELECT 1 FROM enrichment_logs l
                   WHERE l.run_id = ?1 AND l.subject_kind = 'organizer' AND l.subject_id = o.id)
             ORDER BY o.id
             LIMIT ?2",
            unknown = any_unknown("o", &ORGANIZER_ENRICHABLE, organizer_column),
        );
        self.query_organizers(&sql, params![run_id, limit as i64])
            .await
    }

    /// Events with at least one unknown enrichable field, excluding any
    /// already logged in `run_id`.
    pub async fn events_to_enrich(&self, run_id: &str, limit: usize) -> Result<Vec<EventRow>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events e
             WHERE ({unknown})
               AND NOT EXISTS (
                   SELECT 1 FROM enrichment_logs l
                   WHERE l.run_id = ?1 AND l.subject_kind = 'event' AND l.subject_id = e.id)
             ORDER BY e.id
             LIMIT ?2",
            unknown = any_unknown("e", &EVENT_ENRICHABLE, event_column),
        );
        self.query_events(&sql, params![run_id, limit as i64]).await
    }

    /// Write values into organizer columns that are still unknown.
    /// Returns the number of columns actually written.
    pub async fn update_organizer_fields(&self, id: i64, fields: &[(Field, String)]) -> Result<usize> {
        self.update_fields("organizers", id, fields, organizer_column)
            .await
    }

    /// Write values into event columns that are still unknown.
    /// Returns the number of columns actually written.
    pub async fn update_event_fields(&self, id: i64, fields: &[(Field, String)]) -> Result<usize> {
        self.update_fields("events", id, fields, event_column).await
    }

    async fn update_fields(
        &self,
        table: &str,
        id: i64,
        fields: &[(Field, String)],
        column_for: fn(Field) -> Option<&'static str>,
    ) -> Result<usize> {
        self.check_writable()?;

        let mut columns = Vec::with_capacity(fields.len());
        for (field, value) in fields {
            let column = column_for(*field)
                .filter(|_| !is_identity_field(*field))
                .ok_or_else(|| {
                    HarvestError::validation(format!("{field} is not an updatable {table} column"))
                })?;
            if !value.trim().is_empty() {
                columns.push((column, value.as_str()));
            }
        }

        let conn = self.connect()?;
        let mut written = 0;
        for (column, value) in columns {
            let sql = format!(
                "UPDATE {table} SET {column} = ?1
                 WHERE id = ?2 AND NULLIF(TRIM({column}), '') IS NULL"
            );
            let n = conn
                .execute(&sql, params![value, id])
                .await
                .map_err(|e| HarvestError::Storage(e.to_string()))?;
            written += n as usize;
        }
        Ok(written)
    }

    // -----------------------------------------------------------------------
    // Enrichment log
    // -----------------------------------------------------------------------

    pub async fn log_enrichment(&self, entry: &NewEnrichmentLog<'_>) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.connect()?
            .execute(
                "INSERT INTO enrichment_logs
                     (run_id, subject_kind, subject_id, source, value, status, message, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    entry.run_id,
                    entry.subject_kind.as_str(),
                    entry.subject_id,
                    entry.source,
                    entry.value,
                    entry.status.as_str(),
                    entry.message,
                    now.as_str(),
                ],
            )
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;
        Ok(())
    }

    /// All enrichment log entries for a subject, oldest first.
    pub async fn enrichment_logs_for(
        &self,
        kind: SubjectKind,
        subject_id: i64,
    ) -> Result<Vec<EnrichmentLogEntry>> {
        let mut rows = self
            .connect()?
            .query(
                "SELECT id, run_id, subject_kind, subject_id, source, value, status, message,
                        created_at
                 FROM enrichment_logs
                 WHERE subject_kind = ?1 AND subject_id = ?2
                 ORDER BY id",
                params![kind.as_str(), subject_id],
            )
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let kind: String = row
                .get(2)
                .map_err(|e| HarvestError::Storage(e.to_string()))?;
            let status: String = row
                .get(6)
                .map_err(|e| HarvestError::Storage(e.to_string()))?;
            results.push(EnrichmentLogEntry {
                id: row
                    .get::<i64>(0)
                    .map_err(|e| HarvestError::Storage(e.to_string()))?,
                run_id: row
                    .get::<String>(1)
                    .map_err(|e| HarvestError::Storage(e.to_string()))?,
                subject_kind: SubjectKind::parse(&kind).ok_or_else(|| {
                    HarvestError::Storage(format!("unknown subject kind: {kind}"))
                })?,
                subject_id: row
                    .get::<i64>(3)
                    .map_err(|e| HarvestError::Storage(e.to_string()))?,
                source: row
                    .get::<String>(4)
                    .map_err(|e| HarvestError::Storage(e.to_string()))?,
                value: row.get::<String>(5).ok(),
                status: parse_status(&status)?,
                message: row
                    .get::<String>(7)
                    .map_err(|e| HarvestError::Storage(e.to_string()))?,
                created_at: row
                    .get::<String>(8)
                    .map_err(|e| HarvestError::Storage(e.to_string()))?,
            });
        }
        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn required_name<'a>(name: Option<&'a str>, kind: &str) -> Result<&'a str> {
    name.map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| HarvestError::validation(format!("{kind} name is required")))
}

async fn id_for_uid(conn: &Connection, table: &str, uid: &str) -> Result<i64> {
    let sql = format!("SELECT id FROM {table} WHERE uid = ?1");
    let mut rows = conn
        .query(&sql, params![uid])
        .await
        .map_err(|e| HarvestError::Storage(e.to_string()))?;

    match rows.next().await {
        Ok(Some(row)) => row
            .get::<i64>(0)
            .map_err(|e| HarvestError::Storage(e.to_string())),
        Ok(None) => Err(HarvestError::Storage(format!(
            "{table}: no row for uid {uid} after insert"
        ))),
        Err(e) => Err(HarvestError::Storage(e.to_string())),
    }
}

fn parse_status(s: &str) -> Result<LogStatus> {
    LogStatus::parse(s).ok_or_else(|| HarvestError::Storage(format!("unknown log status: {s}")))
}

/// `(NULLIF(TRIM(a.c1), '') IS NULL OR ...)` over the given fields.
fn any_unknown(alias: &str, fields: &[Field], column_for: fn(Field) -> Option<&'static str>) -> String {
    fields
        .iter()
        .filter_map(|f| column_for(*f))
        .map(|c| format!("NULLIF(TRIM({alias}.{c}), '') IS NULL"))
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Fields that feed an identity key; never updated after insert.
fn is_identity_field(field: Field) -> bool {
    matches!(
        field,
        Field::OrganizerName
            | Field::OrganizerWebsite
            | Field::EventName
            | Field::EventDate
            | Field::VenueName
    )
}

fn organizer_column(field: Field) -> Option<&'static str> {
    match field {
        Field::OrganizerName => Some("name"),
        Field::OrganizerEin => Some("ein"),
        Field::OrganizerWebsite => Some("website"),
        Field::OrganizerEmail => Some("email"),
        Field::OrganizerPhone => Some("phone"),
        Field::OrganizerContactName => Some("contact_name"),
        Field::OrganizerContactTitle => Some("contact_title"),
        Field::OrganizerContactEmail => Some("contact_email"),
        Field::OrganizerFacebook => Some("facebook"),
        Field::OrganizerInstagram => Some("instagram"),
        _ => None,
    }
}

fn event_column(field: Field) -> Option<&'static str> {
    match field {
        Field::EventName => Some("name"),
        Field::EventDate => Some("date"),
        Field::EventType => Some("event_type"),
        Field::Description => Some("description"),
        Field::VenueName => Some("venue_name"),
        Field::VenueAddress => Some("venue_address"),
        Field::VenueCity => Some("venue_city"),
        Field::VenueState => Some("venue_state"),
        Field::VenueZip => Some("venue_zip"),
        Field::VenueParking => Some("venue_parking"),
        Field::VenueWebsite => Some("venue_website"),
        Field::RegistrationUrl => Some("registration_url"),
        Field::SponsorshipUrl => Some("sponsorship_url"),
        Field::SponsorshipTiers => Some("sponsorship_tiers"),
        Field::SponsorshipContact => Some("sponsorship_contact"),
        Field::PastSponsors => Some("past_sponsors"),
        Field::DressCode => Some("dress_code"),
        _ => None,
    }
}

/// Convert a database row to an [`OrganizerRow`].
fn row_to_organizer(row: &libsql::Row) -> Result<OrganizerRow> {
    Ok(OrganizerRow {
        id: row
            .get::<i64>(0)
            .map_err(|e| HarvestError::Storage(e.to_string()))?,
        uid: row
            .get::<String>(1)
            .map_err(|e| HarvestError::Storage(e.to_string()))?,
        organizer: Organizer {
            name: row.get::<String>(2).ok(),
            ein: row.get::<String>(3).ok(),
            website: row.get::<String>(4).ok(),
            email: row.get::<String>(5).ok(),
            phone: row.get::<String>(6).ok(),
            contact_name: row.get::<String>(7).ok(),
            contact_title: row.get::<String>(8).ok(),
            contact_email: row.get::<String>(9).ok(),
            facebook: row.get::<String>(10).ok(),
            instagram: row.get::<String>(11).ok(),
        },
    })
}

/// Convert a database row to an [`EventRow`].
fn row_to_event(row: &libsql::Row) -> Result<EventRow> {
    Ok(EventRow {
        id: row
            .get::<i64>(0)
            .map_err(|e| HarvestError::Storage(e.to_string()))?,
        uid: row
            .get::<String>(1)
            .map_err(|e| HarvestError::Storage(e.to_string()))?,
        organizer_id: row.get::<i64>(2).ok(),
        event: Event {
            name: row.get::<String>(3).ok(),
            date: row.get::<String>(4).ok(),
            event_type: row.get::<String>(5).ok(),
            description: row.get::<String>(6).ok(),
            venue_name: row.get::<String>(7).ok(),
            venue_address: row.get::<String>(8).ok(),
            venue_city: row.get::<String>(9).ok(),
            venue_state: row.get::<String>(10).ok(),
            venue_zip: row.get::<String>(11).ok(),
            venue_parking: row.get::<String>(12).ok(),
            venue_website: row.get::<String>(13).ok(),
            registration_url: row.get::<String>(14).ok(),
            sponsorship_url: row.get::<String>(15).ok(),
            sponsorship_tiers: row.get::<String>(16).ok(),
            sponsorship_contact: row.get::<String>(17).ok(),
            past_sponsors: row.get::<String>(18).ok(),
            dress_code: row.get::<String>(19).ok(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("eh_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn organizer(name: &str, website: &str) -> Organizer {
        Organizer {
            name: Some(name.into()),
            website: Some(website.into()),
            ..Default::default()
        }
    }

    fn event(name: &str, date: &str) -> Event {
        Event {
            name: Some(name.into()),
            date: Some(date.into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        let version = storage.get_schema_version().await;
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("eh_test_{}.db", Uuid::now_v7()));
        let _s1 = Storage::open(&tmp).await.expect("first open");
        drop(_s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn organizer_identity_variants_resolve_to_same_id() {
        let storage = test_storage().await;

        let first = storage
            .upsert_organizer(&organizer("Example Gala", "example.org"))
            .await
            .expect("first upsert");
        let second = storage
            .upsert_organizer(&organizer(" EXAMPLE GALA ", "example.org"))
            .await
            .expect("second upsert");

        assert_eq!(first, second);
        assert_eq!(storage.list_organizers().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn organizer_first_write_wins() {
        let storage = test_storage().await;

        let mut original = organizer("Helping Hands", "helpinghands.org");
        original.email = Some("info@helpinghands.org".into());
        let id = storage.upsert_organizer(&original).await.unwrap();

        let mut later = organizer("helping hands", "helpinghands.org");
        later.email = Some("other@example.com".into());
        later.ein = Some("12-3456789".into());
        assert_eq!(storage.upsert_organizer(&later).await.unwrap(), id);

        let stored = storage.get_organizer(id).await.unwrap().unwrap();
        assert_eq!(stored.organizer.name.as_deref(), Some("Helping Hands"));
        assert_eq!(stored.organizer.email.as_deref(), Some("info@helpinghands.org"));
        assert!(stored.organizer.ein.is_none());
    }

    #[tokio::test]
    async fn organizer_requires_name() {
        let storage = test_storage().await;
        let result = storage.upsert_organizer(&organizer("  ", "x.org")).await;
        assert!(result.unwrap_err().to_string().contains("name is required"));
    }

    #[tokio::test]
    async fn event_upsert_is_idempotent() {
        let storage = test_storage().await;
        let org_id = storage
            .upsert_organizer(&organizer("Helping Hands", "helpinghands.org"))
            .await
            .unwrap();

        let mut gala = event("Spring Gala", "2025-03-08");
        gala.venue_name = Some("Grand Ballroom".into());
        gala.description = Some("An evening of giving".into());
        let id = storage.upsert_event(&gala, Some(org_id)).await.unwrap();

        let mut again = event("spring  gala", "2025-03-08");
        again.venue_name = Some("GRAND BALLROOM".into());
        again.description = Some("Overwritten?".into());
        assert_eq!(storage.upsert_event(&again, None).await.unwrap(), id);

        let stored = storage.get_event(id).await.unwrap().unwrap();
        assert_eq!(stored.organizer_id, Some(org_id));
        assert_eq!(stored.event.description.as_deref(), Some("An evening of giving"));

        let other = storage
            .upsert_event(&event("Spring Gala", "2026-03-07"), None)
            .await
            .unwrap();
        assert_ne!(other, id);
        assert_eq!(storage.list_events().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn raw_links_dedupe_and_track_processing() {
        let storage = test_storage().await;

        assert!(
            storage
                .insert_raw_link("gala chicago", Some("Gala"), "https://a.org/gala", None)
                .await
                .unwrap()
        );
        assert!(
            !storage
                .insert_raw_link("other query", None, "https://a.org/gala", Some("dup"))
                .await
                .unwrap()
        );
        assert!(
            storage
                .insert_raw_link("gala chicago", None, "https://b.org/", None)
                .await
                .unwrap()
        );

        let pending = storage.unprocessed_links(10).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].url, "https://a.org/gala");
        assert_eq!(pending[0].title.as_deref(), Some("Gala"));

        storage
            .log_parse(pending[0].id, LogStatus::Failed, "Fetch failed")
            .await
            .unwrap();

        let pending_after = storage.unprocessed_links(10).await.unwrap();
        assert_eq!(pending_after.len(), 1);
        assert_eq!(pending_after[0].url, "https://b.org/");

        let logs = storage.parse_logs_for(pending[0].id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, LogStatus::Failed);
        assert_eq!(logs[0].message, "Fetch failed");
    }

    #[tokio::test]
    async fn organizer_selection_rules() {
        let storage = test_storage().await;
        let run = Uuid::now_v7().to_string();

        let incomplete = storage
            .upsert_organizer(&organizer("Helping Hands", "helpinghands.org"))
            .await
            .unwrap();
        storage
            .upsert_organizer(&organizer("None", "none.org"))
            .await
            .unwrap();
        let complete = storage
            .upsert_organizer(&Organizer {
                name: Some("Complete Org".into()),
                ein: Some("12-3456789".into()),
                facebook: Some("https://facebook.com/c".into()),
                instagram: Some("https://instagram.com/c".into()),
                contact_title: Some("Director".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        let selected = storage.organizers_to_enrich(&run, 10).await.unwrap();
        let ids: Vec<i64> = selected.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![incomplete]);
        assert!(!ids.contains(&complete));

        storage
            .log_enrichment(&NewEnrichmentLog {
                run_id: &run,
                subject_kind: SubjectKind::Organizer,
                subject_id: incomplete,
                source: "multi_source",
                value: None,
                status: LogStatus::Failed,
                message: "EIN not found",
            })
            .await
            .unwrap();

        assert!(storage.organizers_to_enrich(&run, 10).await.unwrap().is_empty());
        let next_run = Uuid::now_v7().to_string();
        assert_eq!(storage.organizers_to_enrich(&next_run, 10).await.unwrap().len(), 1);

        let logs = storage
            .enrichment_logs_for(SubjectKind::Organizer, incomplete)
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].source, "multi_source");
        assert_eq!(logs[0].run_id, run);
    }

    #[tokio::test]
    async fn updates_only_fill_unknown_columns() {
        let storage = test_storage().await;
        let mut org = organizer("Helping Hands", "helpinghands.org");
        org.facebook = Some("https://facebook.com/original".into());
        org.contact_title = Some("   ".into());
        let id = storage.upsert_organizer(&org).await.unwrap();

        let written = storage
            .update_organizer_fields(
                id,
                &[
                    (Field::OrganizerEin, "12-3456789".into()),
                    (Field::OrganizerFacebook, "https://facebook.com/new".into()),
                    (Field::OrganizerContactTitle, "Executive Director".into()),
                    (Field::OrganizerInstagram, "".into()),
                ],
            )
            .await
            .unwrap();
        assert_eq!(written, 2);

        let stored = storage.get_organizer(id).await.unwrap().unwrap().organizer;
        assert_eq!(stored.ein.as_deref(), Some("12-3456789"));
        assert_eq!(stored.facebook.as_deref(), Some("https://facebook.com/original"));
        assert_eq!(stored.contact_title.as_deref(), Some("Executive Director"));
        assert!(stored.instagram.is_none());
    }

    #[tokio::test]
    async fn updates_reject_identity_and_foreign_fields() {
        let storage = test_storage().await;
        let id = storage
            .upsert_organizer(&organizer("Helping Hands", ""))
            .await
            .unwrap();

        let err = storage
            .update_organizer_fields(id, &[(Field::OrganizerWebsite, "x.org".into())])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not an updatable"));

        let err = storage
            .update_organizer_fields(id, &[(Field::DressCode, "Formal".into())])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not an updatable"));
    }

    #[tokio::test]
    async fn event_selection_and_update() {
        let storage = test_storage().await;
        let run = Uuid::now_v7().to_string();
        let id = storage
            .upsert_event(&event("Spring Gala", "2025-03-08"), None)
            .await
            .unwrap();

        let selected = storage.events_to_enrich(&run, 5).await.unwrap();
        assert_eq!(selected.len(), 1);

        let written = storage
            .update_event_fields(
                id,
                &[
                    (Field::Description, "A benefit dinner".into()),
                    (Field::DressCode, "Black tie".into()),
                ],
            )
            .await
            .unwrap();
        assert_eq!(written, 2);

        let stored = storage.get_event(id).await.unwrap().unwrap();
        assert_eq!(stored.event.dress_code.as_deref(), Some("Black tie"));
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("eh_test_{}.db", Uuid::now_v7()));
        let rw = Storage::open(&tmp).await.unwrap();
        rw.insert_raw_link("q", None, "https://a.org", None)
            .await
            .unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        let result = ro.insert_raw_link("q", None, "https://b.org", None).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
        assert_eq!(ro.unprocessed_links(10).await.unwrap().len(), 1);
    }
}
