//! Notice-board crawler, page extraction, and liveness probing.
//!
//! This crate provides:
//! - [`extract`]: listing and detail page parsing
//! - [`engine`]: bounded-concurrency crawl that ingests today's notices
//! - [`probe`]: source URL reachability checks used by reconciliation

pub mod engine;
pub mod extract;
pub mod probe;

pub use engine::{
    CrawlReport, Crawler, ItemOutcome, SkipReason, USER_AGENT, build_client, detail_url,
};
pub use extract::{NoticeDetail, NoticeLayout, parse_publish_date};
pub use probe::Prober;
