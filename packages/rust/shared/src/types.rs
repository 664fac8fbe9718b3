//! Core domain types: notices, content records, event proposals.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// NoticeItem
// ---------------------------------------------------------------------------

/// One row of the notice-board listing page. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoticeItem {
    /// Title with edit/new markers and tabs removed.
    pub title: String,
    /// Link relative to the site origin (e.g. `/front/student/notice/view?id=7`).
    pub relative_url: String,
    /// Whether the listing marks this row as a pinned notice.
    pub is_notice: bool,
}

// ---------------------------------------------------------------------------
// ContentRecord
// ---------------------------------------------------------------------------

/// Translated title/body pair for one language.
///
/// Either half may be absent: the title is missing until a translation run
/// succeeds, the body stays absent when the body policy declines it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Translation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// A crawled notice, persisted in the local mirror.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentRecord {
    /// Unique record identifier (UUID v7).
    pub id: String,
    pub author_id: String,
    pub author_nickname: String,
    pub created_at: DateTime<Utc>,
    pub title: String,
    pub body: String,
    /// Translations keyed by ISO 639-1 language code.
    #[serde(default)]
    pub translations: BTreeMap<String, Translation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Absolute URL of the detail page on the source site.
    pub source_url: String,
    /// Publish date, truncated to the day in UTC+9.
    pub published_at: NaiveDate,
    pub hit_count: u64,
    pub like_count: u64,
    /// User ids that liked the record. Maintained by other services.
    #[serde(default)]
    pub liked_by: BTreeSet<String>,
    pub is_notice: bool,
}

impl ContentRecord {
    /// Translated title for `language`, if one has been stored.
    pub fn translated_title(&self, language: &str) -> Option<&str> {
        self.translations
            .get(language)
            .and_then(|t| t.title.as_deref())
    }
}

// ---------------------------------------------------------------------------
// Calendar events
// ---------------------------------------------------------------------------

/// A user-submitted, not yet confirmed calendar event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventProposal {
    pub id: String,
    pub author_id: String,
    pub author_nickname: String,
    /// Grouping key for consensus.
    pub title: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<String>,
    pub source_url: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub created_at: DateTime<Utc>,
}

/// A calendar event promoted from a group of agreeing proposals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedEvent {
    pub id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub title: String,
    pub contents: String,
    pub author_id: String,
    pub author_nickname: String,
    pub is_admin_authored: bool,
    pub source_url: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub created_at: DateTime<Utc>,
}

/// Public profile of a registered user, as seen by the merger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub nickname: String,
    pub is_admin: bool,
}
