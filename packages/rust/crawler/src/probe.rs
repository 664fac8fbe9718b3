//! Source-URL liveness probing.

use std::sync::Arc;

use reqwest::Client;
use tokio::sync::Semaphore;
use tracing::{debug, instrument};

use boardsync_shared::{BoardSyncError, CrawlConfig, Result};

use crate::engine::build_client;

/// Checks whether source pages are still reachable.
pub struct Prober {
    client: Client,
    concurrency: usize,
}

impl Prober {
    pub fn new(config: &CrawlConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            concurrency: config.concurrency.max(1) as usize,
        })
    }

    /// GET `url`; any non-2xx status or transport error is an `Err`.
    pub async fn probe(&self, url: &str) -> Result<()> {
        probe_url(&self.client, url).await
    }

    /// Probe every `(key, url)` pair with bounded concurrency.
    ///
    /// Results come back in input order, one per pair.
    #[instrument(skip_all, fields(targets = targets.len()))]
    pub async fn probe_many(&self, targets: Vec<(String, String)>) -> Vec<(String, Result<()>)> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(targets.len());

        for (key, url) in targets {
            let client = self.client.clone();
            let sem = semaphore.clone();
            let handle = tokio::spawn(async move {
                let _permit = sem
                    .acquire_owned()
                    .await
                    .map_err(|e| BoardSyncError::Network(format!("worker pool closed: {e}")))?;
                probe_url(&client, &url).await
            });
            handles.push((key, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (key, handle) in handles {
            let result = match handle.await {
                Ok(r) => r,
                Err(e) => Err(BoardSyncError::Network(format!("probe task failed: {e}"))),
            };
            results.push((key, result));
        }
        results
    }
}

async fn probe_url(client: &Client, url: &str) -> Result<()> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| BoardSyncError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    debug!(%url, %status, "probed");
    if status.is_success() {
        Ok(())
    } else {
        Err(BoardSyncError::Network(format!("{url}: HTTP {status}")))
    }
}
