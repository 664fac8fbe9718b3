//! Removal of stored records whose source page is gone.

use std::time::Instant;

use serde::Serialize;
use tracing::{info, instrument, warn};

use boardsync_crawler::Prober;
use boardsync_shared::{CrawlConfig, Result};
use boardsync_storage::Storage;

/// Outcome of one reconcile pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    /// Records whose source answered with a success status.
    pub retained: usize,
    /// Records deleted because their source failed to answer.
    pub removed: usize,
    /// `(record id, message)` for deletes that failed.
    pub failures: Vec<(String, String)>,
}

/// Probes every stored record and deletes the stale ones.
pub struct Reconciler {
    prober: Prober,
}

impl Reconciler {
    pub fn new(config: &CrawlConfig) -> Result<Self> {
        Ok(Self {
            prober: Prober::new(config)?,
        })
    }

    #[instrument(skip_all)]
    pub async fn reconcile(&self, storage: &Storage) -> Result<ReconcileReport> {
        let start = Instant::now();
        let records = storage.list_content_records().await?;
        info!(records = records.len(), "starting reconcile");

        let targets = records
            .into_iter()
            .map(|r| (r.id, r.source_url))
            .collect();
        let results = self.prober.probe_many(targets).await;

        let mut report = ReconcileReport::default();
        for (id, probe) in results {
            let reason = match probe {
                Ok(()) => {
                    report.retained += 1;
                    continue;
                }
                Err(e) => e,
            };

            match storage.delete_content_record(&id).await {
                Ok(true) => {
                    info!(record_id = %id, reason = %reason, "removed stale record");
                    report.removed += 1;
                }
                Ok(false) => {
                    warn!(record_id = %id, "stale record already gone");
                }
                Err(e) => {
                    warn!(record_id = %id, error = %e, "failed to delete stale record");
                    report.failures.push((id, e.to_string()));
                }
            }
        }

        info!(
            retained = report.retained,
            removed = report.removed,
            failures = report.failures.len(),
            duration_ms = start.elapsed().as_millis(),
            "reconcile completed"
        );

        Ok(report)
    }
}
