//! SQL migration definitions for the boardsync database.
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
    vec![
        Migration {
            version: 1,
            description: "Initial schema: content records, translations, proposals, events, users",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Crawled notices
CREATE TABLE IF NOT EXISTS content_records (
    id              TEXT PRIMARY KEY,
    author_id       TEXT NOT NULL,
    author_nickname TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    title           TEXT NOT NULL,
    body            TEXT NOT NULL,
    image_url       TEXT,
    source_url      TEXT NOT NULL,
    published_at    TEXT NOT NULL,
    hit_count       INTEGER NOT NULL DEFAULT 0,
    like_count      INTEGER NOT NULL DEFAULT 0,
    liked_by_json   TEXT NOT NULL DEFAULT '[]',
    is_notice       INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_content_records_source_url ON content_records(source_url);

-- One row per (record, language); either half may be NULL
CREATE TABLE IF NOT EXISTS content_translations (
    record_id TEXT NOT NULL REFERENCES content_records(id) ON DELETE CASCADE,
    language  TEXT NOT NULL,
    title     TEXT,
    body      TEXT,
    PRIMARY KEY (record_id, language)
);

-- Pending calendar-event submissions
CREATE TABLE IF NOT EXISTS event_proposals (
    id              TEXT PRIMARY KEY,
    author_id       TEXT NOT NULL,
    author_nickname TEXT NOT NULL,
    title           TEXT NOT NULL,
    start_date      TEXT NOT NULL,
    end_date        TEXT NOT NULL,
    contents        TEXT,
    source_url      TEXT NOT NULL DEFAULT '',
    event_type      TEXT NOT NULL DEFAULT '',
    created_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_event_proposals_title ON event_proposals(title);

-- Promoted calendar events
CREATE TABLE IF NOT EXISTS confirmed_events (
    id                TEXT PRIMARY KEY,
    start_date        TEXT NOT NULL,
    end_date          TEXT NOT NULL,
    title             TEXT NOT NULL,
    contents          TEXT NOT NULL,
    author_id         TEXT NOT NULL,
    author_nickname   TEXT NOT NULL,
    is_admin_authored INTEGER NOT NULL DEFAULT 0,
    source_url        TEXT NOT NULL DEFAULT '',
    event_type        TEXT NOT NULL DEFAULT '',
    created_at        TEXT NOT NULL
);

-- Account profiles (owned by the account service, read here)
CREATE TABLE IF NOT EXISTS users (
    id       TEXT PRIMARY KEY,
    nickname TEXT NOT NULL,
    is_admin INTEGER NOT NULL DEFAULT 0
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Job run history and merge claims",
            sql: r#"
-- Stage run history
CREATE TABLE IF NOT EXISTS job_runs (
    id          TEXT PRIMARY KEY,
    stage       TEXT NOT NULL,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    stats_json  TEXT
);

CREATE INDEX IF NOT EXISTS idx_job_runs_stage ON job_runs(stage);

-- Per-title merge leases
CREATE TABLE IF NOT EXISTS merge_claims (
    title      TEXT PRIMARY KEY,
    claim_id   TEXT NOT NULL,
    claimed_at INTEGER NOT NULL
);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
