//! Notice-board crawl engine.
//!
//! Fetches the listing page, fans detail fetches out over a bounded worker
//! pool, filters by publish date, and inserts new content records.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};
use reqwest::Client;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use boardsync_shared::{
    BoardSyncError, ContentRecord, CrawlConfig, NoticeItem, Result, SourceConfig, kst_today,
};
use boardsync_storage::Storage;

use crate::extract::{NoticeDetail, NoticeLayout};

/// User-Agent string for every outbound request.
pub const USER_AGENT: &str = concat!("boardsync/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Why an item was passed over without creating a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The detail page was published before today (UTC+9).
    PublishedBeforeToday,
    /// A record with the same source URL already exists.
    AlreadyStored,
}

/// Result of processing one listing row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// A new record was inserted.
    Created { record_id: String, url: String },
    /// The item was intentionally not ingested.
    Skipped { url: String, reason: SkipReason },
    /// Fetching or parsing failed; the item is dropped for this run.
    Failed { url: String, error: String },
}

/// Summary of a completed crawl.
#[derive(Debug, Clone)]
pub struct CrawlReport {
    /// Per-item outcomes in listing order.
    pub outcomes: Vec<ItemOutcome>,
    /// Total duration of the crawl.
    pub duration: Duration,
}

impl CrawlReport {
    /// Number of records inserted.
    pub fn created(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ItemOutcome::Created { .. }))
            .count()
    }

    /// Number of items skipped on purpose.
    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ItemOutcome::Skipped { .. }))
            .count()
    }

    /// `(url, error)` for every failed item.
    pub fn errors(&self) -> Vec<(String, String)> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                ItemOutcome::Failed { url, error } => Some((url.clone(), error.clone())),
                _ => None,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Crawler
// ---------------------------------------------------------------------------

/// Build the shared HTTP client.
pub fn build_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(5))
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| BoardSyncError::Network(format!("failed to build HTTP client: {e}")))
}

/// Notice-board crawler.
pub struct Crawler {
    source: SourceConfig,
    config: CrawlConfig,
    origin: Url,
    client: Client,
    layout: Arc<NoticeLayout>,
}

impl Crawler {
    /// Create a crawler for the configured source.
    pub fn new(source: SourceConfig, config: CrawlConfig) -> Result<Self> {
        let origin = Url::parse(&source.origin_url).map_err(|e| {
            BoardSyncError::config(format!("invalid origin '{}': {e}", source.origin_url))
        })?;
        let layout = NoticeLayout::new(&source.selectors, &source.title_markers)?;
        let client = build_client(config.timeout_secs)?;

        Ok(Self {
            source,
            config,
            origin,
            client,
            layout: Arc::new(layout),
        })
    }

    /// Crawl the listing and ingest everything published today (UTC+9).
    pub async fn crawl(&self, storage: &Storage) -> Result<CrawlReport> {
        self.crawl_for_day(storage, kst_today()).await
    }

    /// Crawl the listing, treating `today` as the cutoff date.
    ///
    /// Fails only when the listing cannot be fetched or the store is
    /// unavailable; per-item problems are reported in the outcomes.
    #[instrument(skip_all, fields(listing = %self.source.listing_url, today = %today))]
    pub async fn crawl_for_day(&self, storage: &Storage, today: NaiveDate) -> Result<CrawlReport> {
        let start_time = Instant::now();

        info!(concurrency = self.config.concurrency, "starting crawl");

        let listing_html = fetch_text(&self.client, &self.source.listing_url).await?;
        let rows = self.layout.parse_listing(&listing_html);
        debug!(rows = rows.len(), "listing parsed");

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency as usize));
        let mut handles = Vec::with_capacity(rows.len());

        for (index, row) in rows.into_iter().enumerate() {
            let item = match row {
                Ok(item) => item,
                Err(e) => {
                    warn!(index, error = %e, "skipping unparseable listing row");
                    handles.push(Pending::Rejected {
                        url: format!("{}#row-{index}", self.source.listing_url),
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            let url = detail_url(&self.source.origin_url, &item.relative_url);
            let client = self.client.clone();
            let layout = self.layout.clone();
            let origin = self.origin.clone();
            let sem = semaphore.clone();
            let task_url = url.clone();

            let handle = tokio::spawn(async move {
                let _permit = sem
                    .acquire_owned()
                    .await
                    .map_err(|e| BoardSyncError::Network(format!("worker pool closed: {e}")))?;
                let html = fetch_text(&client, &task_url).await?;
                layout.parse_detail(&html, &origin)
            });

            handles.push(Pending::Fetching { item, url, handle });
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        let mut seen_this_run: BTreeSet<String> = BTreeSet::new();

        // Collect in listing order
        for pending in handles {
            let (item, url, fetched) = match pending {
                Pending::Rejected { url, error } => {
                    outcomes.push(ItemOutcome::Failed { url, error });
                    continue;
                }
                Pending::Fetching { item, url, handle } => {
                    let fetched = match handle.await {
                        Ok(result) => result,
                        Err(e) => Err(BoardSyncError::Network(format!("detail task failed: {e}"))),
                    };
                    (item, url, fetched)
                }
            };

            let detail = match fetched {
                Ok(detail) => detail,
                Err(e) => {
                    warn!(%url, error = %e, "detail fetch failed, continuing");
                    outcomes.push(ItemOutcome::Failed {
                        url,
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            if detail.published_at < today {
                debug!(%url, published_at = %detail.published_at, "not published today, skipping");
                outcomes.push(ItemOutcome::Skipped {
                    url,
                    reason: SkipReason::PublishedBeforeToday,
                });
                continue;
            }

            if self.config.dedupe_source_urls
                && (seen_this_run.contains(&url) || storage.content_source_url_exists(&url).await?)
            {
                debug!(%url, "source URL already stored, skipping");
                outcomes.push(ItemOutcome::Skipped {
                    url,
                    reason: SkipReason::AlreadyStored,
                });
                continue;
            }

            let record = self.build_record(&item, &url, detail);
            storage.insert_content_record(&record).await?;
            info!(%url, record_id = %record.id, title = %record.title, "record created");

            seen_this_run.insert(url.clone());
            outcomes.push(ItemOutcome::Created {
                record_id: record.id,
                url,
            });
        }

        let report = CrawlReport {
            outcomes,
            duration: start_time.elapsed(),
        };

        info!(
            created = report.created(),
            skipped = report.skipped(),
            errors = report.errors().len(),
            duration_ms = report.duration.as_millis(),
            "crawl completed"
        );

        Ok(report)
    }

    fn build_record(&self, item: &NoticeItem, url: &str, detail: NoticeDetail) -> ContentRecord {
        ContentRecord {
            id: Uuid::now_v7().to_string(),
            author_id: self.source.admin_id.clone(),
            author_nickname: self.source.admin_nickname.clone(),
            created_at: Utc::now(),
            title: item.title.clone(),
            body: detail.body,
            translations: Default::default(),
            image_url: detail.image_url,
            source_url: url.to_string(),
            published_at: detail.published_at,
            hit_count: 0,
            like_count: 0,
            liked_by: BTreeSet::new(),
            is_notice: item.is_notice,
        }
    }
}

/// A listing row waiting for its detail page.
enum Pending {
    Rejected {
        url: String,
        error: String,
    },
    Fetching {
        item: NoticeItem,
        url: String,
        handle: tokio::task::JoinHandle<Result<NoticeDetail>>,
    },
}

/// Detail URL: the origin with the relative link appended verbatim.
pub fn detail_url(origin: &str, relative: &str) -> String {
    if relative.starts_with("http://") || relative.starts_with("https://") {
        return relative.to_string();
    }
    let origin = origin.trim_end_matches('/');
    if relative.starts_with('/') {
        format!("{origin}{relative}")
    } else {
        format!("{origin}/{relative}")
    }
}

/// GET `url` and return the body of a 2xx response.
async fn fetch_text(client: &Client, url: &str) -> Result<String> {
    debug!(%url, "fetching page");

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| BoardSyncError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(BoardSyncError::Network(format!("{url}: HTTP {status}")));
    }

    response
        .text()
        .await
        .map_err(|e| BoardSyncError::Network(format!("{url}: body read failed: {e}")))
}
