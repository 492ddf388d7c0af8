//! SQL migration definitions for the eventharvest database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: organizers, events, raw_links, parse_logs, enrichment_logs",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Organizations running events; uid = identity(name, website)
CREATE TABLE IF NOT EXISTS organizers (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    uid           TEXT NOT NULL UNIQUE,
    name          TEXT NOT NULL,
    ein           TEXT,
    website       TEXT,
    email         TEXT,
    phone         TEXT,
    contact_name  TEXT,
    contact_title TEXT,
    contact_email TEXT,
    facebook      TEXT,
    instagram     TEXT,
    created_at    TEXT NOT NULL
);

-- Events; uid = identity(name, date, venue_name)
CREATE TABLE IF NOT EXISTS events (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    uid                 TEXT NOT NULL UNIQUE,
    organizer_id        INTEGER REFERENCES organizers(id) ON DELETE SET NULL,
    name                TEXT NOT NULL,
    date                TEXT,
    event_type          TEXT,
    description         TEXT,
    venue_name          TEXT,
    venue_address       TEXT,
    venue_city          TEXT,
    venue_state         TEXT,
    venue_zip           TEXT,
    venue_parking       TEXT,
    venue_website       TEXT,
    registration_url    TEXT,
    sponsorship_url     TEXT,
    sponsorship_tiers   TEXT,
    sponsorship_contact TEXT,
    past_sponsors       TEXT,
    dress_code          TEXT,
    created_at          TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_organizer ON events(organizer_id);

-- Search results queued for extraction
CREATE TABLE IF NOT EXISTS raw_links (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    query      TEXT NOT NULL,
    title      TEXT,
    url        TEXT NOT NULL UNIQUE,
    snippet    TEXT,
    created_at TEXT NOT NULL
);

-- One row per processing attempt of a raw link (insert-only)
CREATE TABLE IF NOT EXISTS parse_logs (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    raw_link_id INTEGER NOT NULL REFERENCES raw_links(id) ON DELETE CASCADE,
    status      TEXT NOT NULL CHECK (status IN ('success', 'failed')),
    message     TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_parse_logs_link ON parse_logs(raw_link_id);

-- One row per enrichment attempt (insert-only)
CREATE TABLE IF NOT EXISTS enrichment_logs (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id       TEXT NOT NULL,
    subject_kind TEXT NOT NULL CHECK (subject_kind IN ('organizer', 'event')),
    subject_id   INTEGER NOT NULL,
    source       TEXT NOT NULL,
    value        TEXT,
    status       TEXT NOT NULL CHECK (status IN ('success', 'failed')),
    message      TEXT NOT NULL,
    created_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_enrichment_logs_subject
    ON enrichment_logs(subject_kind, subject_id);
CREATE INDEX IF NOT EXISTS idx_enrichment_logs_run ON enrichment_logs(run_id);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
