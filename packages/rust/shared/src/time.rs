//! Day-granularity time helpers pinned to UTC+9.
//!
//! The notice board publishes in Korea Standard Time; every date comparison
//! in the crawl pipeline happens in that offset.

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, TimeZone, Utc};

/// UTC+9, seconds east of UTC.
const KST_OFFSET_SECS: i32 = 9 * 3600;

/// The fixed UTC+9 offset.
pub fn kst() -> FixedOffset {
    // east_opt only rejects offsets of a full day or more
    FixedOffset::east_opt(KST_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// The calendar date of `instant` in UTC+9.
pub fn kst_date<Tz: TimeZone>(instant: &DateTime<Tz>) -> NaiveDate {
    instant.with_timezone(&kst()).date_naive()
}

/// Today's date in UTC+9.
pub fn kst_today() -> NaiveDate {
    kst_date(&Utc::now())
}
