//! libSQL storage layer for the notice mirror and the event calendar.
//!
//! The [`Storage`] struct wraps a local libSQL database holding crawled
//! content records and their translations, pending event proposals,
//! confirmed events, user profiles, stage run history, and merge claims.
//!
//! Every error surfaced from this crate is a [`BoardSyncError::Storage`],
//! which callers treat as "store unavailable" and use to abort the running stage.

mod migrations;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use boardsync_shared::{
    BoardSyncError, ConfirmedEvent, ContentRecord, EventProposal, Result, Translation,
    UserProfile,
};
use chrono::{DateTime, NaiveDate, Utc};
use libsql::{Connection, Database, params};
use uuid::Uuid;

/// Column list shared by every `content_records` query.
const CONTENT_COLUMNS: &str = "id, author_id, author_nickname, created_at, title, body, image_url,
     source_url, published_at, hit_count, like_count, liked_by_json, is_notice";

/// Column list shared by every `event_proposals` query.
const PROPOSAL_COLUMNS: &str = "id, author_id, author_nickname, title, start_date, end_date,
     contents, source_url, event_type, created_at";

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BoardSyncError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(BoardSyncError::storage)?;

        let conn = db.connect().map_err(BoardSyncError::storage)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` for inspection only.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(BoardSyncError::Storage(format!(
                "database {} does not exist",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(BoardSyncError::storage)?;

        let conn = db.connect().map_err(BoardSyncError::storage)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        BoardSyncError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
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
            return Err(BoardSyncError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Content records
    // -----------------------------------------------------------------------

    /// Insert a freshly crawled record. Translations on the record are ignored.
    pub async fn insert_content_record(&self, record: &ContentRecord) -> Result<()> {
        self.check_writable()?;
        let liked_by = serde_json::to_string(&record.liked_by).map_err(BoardSyncError::storage)?;
        self.conn
            .execute(
                "INSERT INTO content_records (id, author_id, author_nickname, created_at, title, body,
                     image_url, source_url, published_at, hit_count, like_count, liked_by_json, is_notice)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    record.id.as_str(),
                    record.author_id.as_str(),
                    record.author_nickname.as_str(),
                    record.created_at.to_rfc3339(),
                    record.title.as_str(),
                    record.body.as_str(),
                    record.image_url.as_deref(),
                    record.source_url.as_str(),
                    record.published_at.to_string(),
                    record.hit_count as i64,
                    record.like_count as i64,
                    liked_by,
                    i64::from(record.is_notice),
                ],
            )
            .await
            .map_err(BoardSyncError::storage)?;
        Ok(())
    }

    /// Get a record with its translations.
    pub async fn get_content_record(&self, id: &str) -> Result<Option<ContentRecord>> {
        let sql = format!("SELECT {CONTENT_COLUMNS} FROM content_records WHERE id = ?1");
        let mut rows = self
            .conn
            .query(&sql, params![id])
            .await
            .map_err(BoardSyncError::storage)?;

        let mut record = match rows.next().await {
            Ok(Some(row)) => row_to_content_record(&row)?,
            Ok(None) => return Ok(None),
            Err(e) => return Err(BoardSyncError::storage(e)),
        };
        record.translations = self
            .load_translations(Some(&record.id))
            .await?
            .remove(&record.id)
            .unwrap_or_default();
        Ok(Some(record))
    }

    /// List every record, oldest first, with translations attached.
    pub async fn list_content_records(&self) -> Result<Vec<ContentRecord>> {
        let sql = format!("SELECT {CONTENT_COLUMNS} FROM content_records ORDER BY created_at, id");
        let records = self.query_content_records(&sql, params![]).await?;
        self.attach_translations(records).await
    }

    /// List records with no stored title translation for `language`.
    pub async fn list_untranslated(&self, language: &str) -> Result<Vec<ContentRecord>> {
        let sql = format!(
            "SELECT {CONTENT_COLUMNS} FROM content_records r
             WHERE NOT EXISTS (
                 SELECT 1 FROM content_translations t
                 WHERE t.record_id = r.id AND t.language = ?1
                   AND t.title IS NOT NULL AND t.title != ''
             )
             ORDER BY created_at, id"
        );
        let records = self.query_content_records(&sql, params![language]).await?;
        self.attach_translations(records).await
    }

    /// Whether any record already points at `source_url`.
    pub async fn content_source_url_exists(&self, source_url: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM content_records WHERE source_url = ?1 LIMIT 1",
                params![source_url],
            )
            .await
            .map_err(BoardSyncError::storage)?;

        match rows.next().await {
            Ok(row) => Ok(row.is_some()),
            Err(e) => Err(BoardSyncError::storage(e)),
        }
    }

    /// Store translated fields for one record and language.
    ///
    /// `None` leaves the existing value of that field untouched.
    pub async fn upsert_translation(
        &self,
        record_id: &str,
        language: &str,
        title: Option<&str>,
        body: Option<&str>,
    ) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO content_translations (record_id, language, title, body)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(record_id, language) DO UPDATE SET
                   title = COALESCE(excluded.title, content_translations.title),
                   body = COALESCE(excluded.body, content_translations.body)",
                params![record_id, language, title, body],
            )
            .await
            .map_err(BoardSyncError::storage)?;
        Ok(())
    }

    /// Delete a record and its translations. Returns whether a record was removed.
    pub async fn delete_content_record(&self, id: &str) -> Result<bool> {
        self.check_writable()?;
        self.conn
            .execute(
                "DELETE FROM content_translations WHERE record_id = ?1",
                params![id],
            )
            .await
            .map_err(BoardSyncError::storage)?;
        let deleted = self
            .conn
            .execute("DELETE FROM content_records WHERE id = ?1", params![id])
            .await
            .map_err(BoardSyncError::storage)?;
        Ok(deleted > 0)
    }

    async fn query_content_records(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<ContentRecord>> {
        let mut rows = self
            .conn
            .query(sql, params)
            .await
            .map_err(BoardSyncError::storage)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(BoardSyncError::storage)? {
            results.push(row_to_content_record(&row)?);
        }
        Ok(results)
    }

    async fn attach_translations(
        &self,
        mut records: Vec<ContentRecord>,
    ) -> Result<Vec<ContentRecord>> {
        if records.is_empty() {
            return Ok(records);
        }
        let mut all = self.load_translations(None).await?;
        for record in &mut records {
            if let Some(translations) = all.remove(&record.id) {
                record.translations = translations;
            }
        }
        Ok(records)
    }

    /// Load every translation row grouped by record id.
    /// Load translations keyed by record, for one record or all of them.
    async fn load_translations(
        &self,
        record_id: Option<&str>,
    ) -> Result<BTreeMap<String, BTreeMap<String, Translation>>> {
        let mut rows = match record_id {
            Some(id) => {
                self.conn
                    .query(
                        "SELECT record_id, language, title, body FROM content_translations
                         WHERE record_id = ?1",
                        params![id],
                    )
                    .await
            }
            None => {
                self.conn
                    .query(
                        "SELECT record_id, language, title, body FROM content_translations",
                        params![],
                    )
                    .await
            }
        }
        .map_err(BoardSyncError::storage)?;

        let mut by_record: BTreeMap<String, BTreeMap<String, Translation>> = BTreeMap::new();
        while let Some(row) = rows.next().await.map_err(BoardSyncError::storage)? {
            let record_id: String = row.get(0).map_err(BoardSyncError::storage)?;
            let language: String = row.get(1).map_err(BoardSyncError::storage)?;
            let translation = Translation {
                title: row.get::<String>(2).ok(),
                body: row.get::<String>(3).ok(),
            };
            by_record
                .entry(record_id)
                .or_default()
                .insert(language, translation);
        }
        Ok(by_record)
    }

    // -----------------------------------------------------------------------
    // Event proposals
    // -----------------------------------------------------------------------

    /// Insert a pending proposal (normally done by the submission service).
    pub async fn insert_event_proposal(&self, proposal: &EventProposal) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO event_proposals (id, author_id, author_nickname, title, start_date,
                     end_date, contents, source_url, event_type, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    proposal.id.as_str(),
                    proposal.author_id.as_str(),
                    proposal.author_nickname.as_str(),
                    proposal.title.as_str(),
                    proposal.start_date.to_string(),
                    proposal.end_date.to_string(),
                    proposal.contents.as_deref(),
                    proposal.source_url.as_str(),
                    proposal.event_type.as_str(),
                    proposal.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(BoardSyncError::storage)?;
        Ok(())
    }

    /// List every pending proposal, oldest first.
    pub async fn list_event_proposals(&self) -> Result<Vec<EventProposal>> {
        let sql = format!("SELECT {PROPOSAL_COLUMNS} FROM event_proposals ORDER BY created_at, id");
        self.query_proposals(&sql, params![]).await
    }

    /// List the pending proposals sharing `title`, oldest first.
    pub async fn list_proposals_by_title(&self, title: &str) -> Result<Vec<EventProposal>> {
        let sql = format!(
            "SELECT {PROPOSAL_COLUMNS} FROM event_proposals WHERE title = ?1 ORDER BY created_at, id"
        );
        self.query_proposals(&sql, params![title]).await
    }

    async fn query_proposals(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<EventProposal>> {
        let mut rows = self
            .conn
            .query(sql, params)
            .await
            .map_err(BoardSyncError::storage)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(BoardSyncError::storage)? {
            results.push(row_to_proposal(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Confirmed events
    // -----------------------------------------------------------------------

    /// Insert `event` and delete every proposal titled `title`, atomically.
    ///
    /// Rolls back when fewer than `expected` proposals are removed, which
    /// means the group was already promoted or changed underneath the caller.
    /// Returns the number of proposals removed.
    pub async fn promote_proposals(
        &self,
        event: &ConfirmedEvent,
        title: &str,
        expected: u64,
    ) -> Result<u64> {
        self.check_writable()?;
        let tx = self
            .conn
            .transaction()
            .await
            .map_err(BoardSyncError::storage)?;

        tx.execute(
            "INSERT INTO confirmed_events (id, start_date, end_date, title, contents, author_id,
                 author_nickname, is_admin_authored, source_url, event_type, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                event.id.as_str(),
                event.start_date.to_string(),
                event.end_date.to_string(),
                event.title.as_str(),
                event.contents.as_str(),
                event.author_id.as_str(),
                event.author_nickname.as_str(),
                i64::from(event.is_admin_authored),
                event.source_url.as_str(),
                event.event_type.as_str(),
                event.created_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(BoardSyncError::storage)?;

        let removed = tx
            .execute("DELETE FROM event_proposals WHERE title = ?1", params![title])
            .await
            .map_err(BoardSyncError::storage)?;

        if removed == 0 || removed < expected {
            tx.rollback().await.map_err(BoardSyncError::storage)?;
            return Err(BoardSyncError::validation(format!(
                "group '{title}' changed during promotion: expected {expected} proposals, found {removed}"
            )));
        }

        tx.commit().await.map_err(BoardSyncError::storage)?;
        Ok(removed)
    }

    /// List confirmed events, oldest first.
    pub async fn list_confirmed_events(&self) -> Result<Vec<ConfirmedEvent>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, start_date, end_date, title, contents, author_id, author_nickname,
                     is_admin_authored, source_url, event_type, created_at
                 FROM confirmed_events ORDER BY created_at, id",
                params![],
            )
            .await
            .map_err(BoardSyncError::storage)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(BoardSyncError::storage)? {
            results.push(ConfirmedEvent {
                id: row.get(0).map_err(BoardSyncError::storage)?,
                start_date: parse_date(&row.get::<String>(1).map_err(BoardSyncError::storage)?)?,
                end_date: parse_date(&row.get::<String>(2).map_err(BoardSyncError::storage)?)?,
                title: row.get(3).map_err(BoardSyncError::storage)?,
                contents: row.get(4).map_err(BoardSyncError::storage)?,
                author_id: row.get(5).map_err(BoardSyncError::storage)?,
                author_nickname: row.get(6).map_err(BoardSyncError::storage)?,
                is_admin_authored: row.get::<i64>(7).map_err(BoardSyncError::storage)? != 0,
                source_url: row.get(8).map_err(BoardSyncError::storage)?,
                event_type: row.get(9).map_err(BoardSyncError::storage)?,
                created_at: parse_timestamp(
                    &row.get::<String>(10).map_err(BoardSyncError::storage)?,
                )?,
            });
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Merge claims
    // -----------------------------------------------------------------------

    /// Try to take the merge lease for `title`.
    ///
    /// Succeeds when no lease exists or the existing one is older than
    /// `lease_secs`. Returns `false` when another run holds a live lease.
    pub async fn try_claim_merge(
        &self,
        title: &str,
        claim_id: &str,
        lease_secs: u64,
    ) -> Result<bool> {
        self.check_writable()?;
        let now = Utc::now().timestamp();
        let expired_before = now - lease_secs as i64;
        let changed = self
            .conn
            .execute(
                "INSERT INTO merge_claims (title, claim_id, claimed_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(title) DO UPDATE SET
                   claim_id = excluded.claim_id,
                   claimed_at = excluded.claimed_at
                 WHERE merge_claims.claimed_at < ?4",
                params![title, claim_id, now, expired_before],
            )
            .await
            .map_err(BoardSyncError::storage)?;
        Ok(changed > 0)
    }

    /// Release a lease taken with [`Storage::try_claim_merge`].
    pub async fn release_merge_claim(&self, title: &str, claim_id: &str) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "DELETE FROM merge_claims WHERE title = ?1 AND claim_id = ?2",
                params![title, claim_id],
            )
            .await
            .map_err(BoardSyncError::storage)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Users
    // -----------------------------------------------------------------------

    /// Insert or replace a user profile.
    pub async fn upsert_user(&self, user: &UserProfile) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO users (id, nickname, is_admin) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET
                   nickname = excluded.nickname,
                   is_admin = excluded.is_admin",
                params![user.id.as_str(), user.nickname.as_str(), i64::from(user.is_admin)],
            )
            .await
            .map_err(BoardSyncError::storage)?;
        Ok(())
    }

    /// Look up a user profile by id.
    pub async fn get_user(&self, id: &str) -> Result<Option<UserProfile>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, nickname, is_admin FROM users WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(BoardSyncError::storage)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(UserProfile {
                id: row.get(0).map_err(BoardSyncError::storage)?,
                nickname: row.get(1).map_err(BoardSyncError::storage)?,
                is_admin: row.get::<i64>(2).map_err(BoardSyncError::storage)? != 0,
            })),
            Ok(None) => Ok(None),
            Err(e) => Err(BoardSyncError::storage(e)),
        }
    }

    // -----------------------------------------------------------------------
    // Job runs
    // -----------------------------------------------------------------------

    /// Record the start of a stage run. Returns the generated run ID.
    pub async fn insert_job_run(&self, stage: &str) -> Result<String> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO job_runs (id, stage, started_at) VALUES (?1, ?2, ?3)",
                params![id.as_str(), stage, now.as_str()],
            )
            .await
            .map_err(BoardSyncError::storage)?;
        Ok(id)
    }

    /// Record completion data for a stage run.
    pub async fn finish_job_run(&self, run_id: &str, stats_json: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE job_runs SET finished_at = ?1, stats_json = ?2 WHERE id = ?3",
                params![now.as_str(), stats_json, run_id],
            )
            .await
            .map_err(BoardSyncError::storage)?;
        Ok(())
    }

    /// Most recent runs, newest first. Returns `Vec<(stage, started_at, stats_json)>`.
    pub async fn recent_job_runs(
        &self,
        limit: u32,
    ) -> Result<Vec<(String, String, Option<String>)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT stage, started_at, stats_json FROM job_runs
                 ORDER BY started_at DESC, id DESC LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(BoardSyncError::storage)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push((
                row.get::<String>(0).map_err(BoardSyncError::storage)?,
                row.get::<String>(1).map_err(BoardSyncError::storage)?,
                row.get::<String>(2).ok(),
            ));
        }
        Ok(results)
    }
}

/// Parse a `YYYY-MM-DD` column.
fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| BoardSyncError::Storage(format!("invalid date '{s}': {e}")))
}

/// Parse an RFC 3339 column.
fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| BoardSyncError::Storage(format!("invalid timestamp '{s}': {e}")))
}

/// Convert a database row to a [`ContentRecord`] (translations left empty).
fn row_to_content_record(row: &libsql::Row) -> Result<ContentRecord> {
    let liked_by_json: String = row.get(11).map_err(BoardSyncError::storage)?;
    let liked_by: BTreeSet<String> =
        serde_json::from_str(&liked_by_json).map_err(BoardSyncError::storage)?;

    Ok(ContentRecord {
        id: row.get(0).map_err(BoardSyncError::storage)?,
        author_id: row.get(1).map_err(BoardSyncError::storage)?,
        author_nickname: row.get(2).map_err(BoardSyncError::storage)?,
        created_at: parse_timestamp(&row.get::<String>(3).map_err(BoardSyncError::storage)?)?,
        title: row.get(4).map_err(BoardSyncError::storage)?,
        body: row.get(5).map_err(BoardSyncError::storage)?,
        translations: BTreeMap::new(),
        image_url: row.get::<String>(6).ok(),
        source_url: row.get(7).map_err(BoardSyncError::storage)?,
        published_at: parse_date(&row.get::<String>(8).map_err(BoardSyncError::storage)?)?,
        hit_count: row.get::<i64>(9).map_err(BoardSyncError::storage)?.max(0) as u64,
        like_count: row.get::<i64>(10).map_err(BoardSyncError::storage)?.max(0) as u64,
        liked_by,
        is_notice: row.get::<i64>(12).map_err(BoardSyncError::storage)? != 0,
    })
}

/// Convert a database row to an [`EventProposal`].
fn row_to_proposal(row: &libsql::Row) -> Result<EventProposal> {
    Ok(EventProposal {
        id: row.get(0).map_err(BoardSyncError::storage)?,
        author_id: row.get(1).map_err(BoardSyncError::storage)?,
        author_nickname: row.get(2).map_err(BoardSyncError::storage)?,
        title: row.get(3).map_err(BoardSyncError::storage)?,
        start_date: parse_date(&row.get::<String>(4).map_err(BoardSyncError::storage)?)?,
        end_date: parse_date(&row.get::<String>(5).map_err(BoardSyncError::storage)?)?,
        contents: row.get::<String>(6).ok(),
        source_url: row.get(7).map_err(BoardSyncError::storage)?,
        event_type: row.get(8).map_err(BoardSyncError::storage)?,
        created_at: parse_timestamp(&row.get::<String>(9).map_err(BoardSyncError::storage)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("bs_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn record(url: &str) -> ContentRecord {
        ContentRecord {
            id: Uuid::now_v7().to_string(),
            author_id: "admin-id".into(),
            author_nickname: "admin".into(),
            created_at: Utc::now(),
            title: "장학금 신청 안내".into(),
            body: "신청 기간은 다음과 같습니다.\n".into(),
            translations: BTreeMap::new(),
            image_url: Some("https://example.com/img/a.png".into()),
            source_url: url.into(),
            published_at: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            hit_count: 0,
            like_count: 0,
            liked_by: BTreeSet::new(),
            is_notice: true,
        }
    }

    fn proposal(title: &str, start: (i32, u32, u32), minutes_ago: i64) -> EventProposal {
        EventProposal {
            id: Uuid::now_v7().to_string(),
            author_id: "u1".into(),
            author_nickname: "kim".into(),
            title: title.into(),
            start_date: NaiveDate::from_ymd_opt(start.0, start.1, start.2).unwrap(),
            end_date: NaiveDate::from_ymd_opt(start.0, start.1, start.2 + 1).unwrap(),
            contents: None,
            source_url: "https://example.com/event".into(),
            event_type: "academic".into(),
            created_at: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        let version = storage.get_schema_version().await;
        assert_eq!(version, 2);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("bs_test_{}.db", Uuid::now_v7()));
        let _s1 = Storage::open(&tmp).await.expect("first open");
        drop(_s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn content_record_roundtrip() {
        let storage = test_storage().await;
        let rec = record("https://example.com/notice/1");
        storage.insert_content_record(&rec).await.expect("insert");

        let found = storage
            .get_content_record(&rec.id)
            .await
            .expect("get")
            .expect("present");
        assert_eq!(found.title, rec.title);
        assert_eq!(found.published_at, rec.published_at);
        assert_eq!(found.image_url, rec.image_url);
        assert!(found.is_notice);
        assert!(found.translations.is_empty());

        assert!(
            storage
                .content_source_url_exists("https://example.com/notice/1")
                .await
                .unwrap()
        );
        assert!(
            !storage
                .content_source_url_exists("https://example.com/notice/2")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn untranslated_selection_follows_title_translation() {
        let storage = test_storage().await;
        let done = record("https://example.com/notice/1");
        let pending = record("https://example.com/notice/2");
        storage.insert_content_record(&done).await.unwrap();
        storage.insert_content_record(&pending).await.unwrap();

        storage
            .upsert_translation(&done.id, "en", Some("Scholarship"), None)
            .await
            .unwrap();
        // A body alone does not count as translated.
        storage
            .upsert_translation(&pending.id, "en", None, Some("body only"))
            .await
            .unwrap();

        let untranslated = storage.list_untranslated("en").await.unwrap();
        assert_eq!(untranslated.len(), 1);
        assert_eq!(untranslated[0].id, pending.id);

        let zh = storage.list_untranslated("zh").await.unwrap();
        assert_eq!(zh.len(), 2);
    }

    #[tokio::test]
    async fn translation_upsert_keeps_existing_fields() {
        let storage = test_storage().await;
        let rec = record("https://example.com/notice/1");
        storage.insert_content_record(&rec).await.unwrap();

        storage
            .upsert_translation(&rec.id, "en", Some("Title"), Some("Body"))
            .await
            .unwrap();
        storage
            .upsert_translation(&rec.id, "en", Some("New title"), None)
            .await
            .unwrap();

        let found = storage.get_content_record(&rec.id).await.unwrap().unwrap();
        let en = &found.translations["en"];
        assert_eq!(en.title.as_deref(), Some("New title"));
        assert_eq!(en.body.as_deref(), Some("Body"));
    }

    #[tokio::test]
    async fn record_lookup_attaches_only_its_own_translations() {
        let storage = test_storage().await;
        let a = record("https://example.com/notice/1");
        let b = record("https://example.com/notice/2");
        storage.insert_content_record(&a).await.unwrap();
        storage.insert_content_record(&b).await.unwrap();
        storage
            .upsert_translation(&a.id, "en", Some("A"), None)
            .await
            .unwrap();
        storage
            .upsert_translation(&b.id, "zh", Some("乙"), None)
            .await
            .unwrap();

        let scoped = storage.load_translations(Some(&a.id)).await.unwrap();
        assert_eq!(scoped.keys().collect::<Vec<_>>(), vec![&a.id]);

        let found = storage.get_content_record(&b.id).await.unwrap().unwrap();
        assert_eq!(found.translations.keys().collect::<Vec<_>>(), vec!["zh"]);
    }

    #[tokio::test]
    async fn delete_removes_record_and_translations() {
        let storage = test_storage().await;
        let rec = record("https://example.com/notice/1");
        storage.insert_content_record(&rec).await.unwrap();
        storage
            .upsert_translation(&rec.id, "zh", Some("标题"), None)
            .await
            .unwrap();

        assert!(storage.delete_content_record(&rec.id).await.unwrap());
        assert!(!storage.delete_content_record(&rec.id).await.unwrap());
        assert!(storage.list_content_records().await.unwrap().is_empty());
        assert!(storage.load_translations(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn promote_inserts_event_and_clears_title_group() {
        let storage = test_storage().await;
        storage
            .insert_event_proposal(&proposal("Seminar", (2024, 5, 1), 30))
            .await
            .unwrap();
        storage
            .insert_event_proposal(&proposal("Seminar", (2024, 5, 2), 20))
            .await
            .unwrap();
        storage
            .insert_event_proposal(&proposal("Workshop", (2024, 6, 1), 10))
            .await
            .unwrap();

        let seminar = storage.list_proposals_by_title("Seminar").await.unwrap();
        assert_eq!(seminar.len(), 2);
        assert!(seminar[0].created_at < seminar[1].created_at);

        let event = ConfirmedEvent {
            id: Uuid::now_v7().to_string(),
            start_date: seminar[0].start_date,
            end_date: seminar[0].end_date,
            title: "Seminar".into(),
            contents: "Date: 2024-05-01 ~ Date: 2024-05-02".into(),
            author_id: "u1".into(),
            author_nickname: "kim".into(),
            is_admin_authored: false,
            source_url: seminar[0].source_url.clone(),
            event_type: seminar[0].event_type.clone(),
            created_at: Utc::now(),
        };
        let removed = storage.promote_proposals(&event, "Seminar", 2).await.unwrap();
        assert_eq!(removed, 2);

        let events = storage.list_confirmed_events().await.unwrap();
        assert_eq!(events, vec![event]);

        let remaining = storage.list_event_proposals().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].title, "Workshop");
    }

    #[tokio::test]
    async fn promote_rolls_back_when_group_already_gone() {
        let storage = test_storage().await;
        let first = proposal("Seminar", (2024, 5, 1), 30);
        storage.insert_event_proposal(&first).await.unwrap();
        storage
            .insert_event_proposal(&proposal("Seminar", (2024, 5, 1), 20))
            .await
            .unwrap();

        let event = |id: String| ConfirmedEvent {
            id,
            start_date: first.start_date,
            end_date: first.end_date,
            title: "Seminar".into(),
            contents: "Date: 2024-05-01 ~ Date: 2024-05-01".into(),
            author_id: "u1".into(),
            author_nickname: "kim".into(),
            is_admin_authored: false,
            source_url: first.source_url.clone(),
            event_type: first.event_type.clone(),
            created_at: Utc::now(),
        };

        // Planned from a larger snapshot than what is stored
        let err = storage
            .promote_proposals(&event(Uuid::now_v7().to_string()), "Seminar", 3)
            .await
            .unwrap_err();
        assert!(matches!(err, BoardSyncError::Validation { .. }));
        assert!(storage.list_confirmed_events().await.unwrap().is_empty());
        assert_eq!(storage.list_proposals_by_title("Seminar").await.unwrap().len(), 2);

        storage
            .promote_proposals(&event(Uuid::now_v7().to_string()), "Seminar", 2)
            .await
            .unwrap();

        // A second promotion of the same title finds nothing to remove
        let err = storage
            .promote_proposals(&event(Uuid::now_v7().to_string()), "Seminar", 2)
            .await
            .unwrap_err();
        assert!(matches!(err, BoardSyncError::Validation { .. }));
        assert_eq!(storage.list_confirmed_events().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn merge_claim_is_exclusive_until_released() {
        let storage = test_storage().await;
        assert!(storage.try_claim_merge("Seminar", "a", 600).await.unwrap());
        assert!(!storage.try_claim_merge("Seminar", "b", 600).await.unwrap());
        assert!(storage.try_claim_merge("Workshop", "b", 600).await.unwrap());

        // Releasing with the wrong claim id is a no-op.
        storage.release_merge_claim("Seminar", "b").await.unwrap();
        assert!(!storage.try_claim_merge("Seminar", "b", 600).await.unwrap());

        storage.release_merge_claim("Seminar", "a").await.unwrap();
        assert!(storage.try_claim_merge("Seminar", "b", 600).await.unwrap());
    }

    #[tokio::test]
    async fn stale_merge_claim_can_be_taken_over() {
        let storage = test_storage().await;
        storage
            .conn
            .execute(
                "INSERT INTO merge_claims (title, claim_id, claimed_at) VALUES (?1, ?2, ?3)",
                params!["Seminar", "crashed", Utc::now().timestamp() - 3600],
            )
            .await
            .unwrap();

        assert!(storage.try_claim_merge("Seminar", "fresh", 600).await.unwrap());
    }

    #[tokio::test]
    async fn user_lookup() {
        let storage = test_storage().await;
        let user = UserProfile {
            id: "u1".into(),
            nickname: "kim".into(),
            is_admin: true,
        };
        storage.upsert_user(&user).await.unwrap();
        assert_eq!(storage.get_user("u1").await.unwrap(), Some(user));
        assert_eq!(storage.get_user("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn job_run_lifecycle() {
        let storage = test_storage().await;
        let run_id = storage.insert_job_run("crawl").await.expect("insert run");
        assert!(!run_id.is_empty());

        storage
            .finish_job_run(&run_id, r#"{"created": 3}"#)
            .await
            .expect("finish run");

        let runs = storage.recent_job_runs(5).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].0, "crawl");
        assert!(runs[0].2.as_deref().unwrap().contains("created"));
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("bs_test_{}.db", Uuid::now_v7()));
        let rw = Storage::open(&tmp).await.unwrap();
        rw.insert_content_record(&record("https://example.com/a"))
            .await
            .unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        assert_eq!(ro.list_content_records().await.unwrap().len(), 1);
        let result = ro
            .insert_content_record(&record("https://example.com/b"))
            .await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }
}
