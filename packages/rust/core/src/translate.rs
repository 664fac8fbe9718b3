//! Batch translation of stored content records into one target language.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use boardsync_shared::Result;
use boardsync_storage::Storage;
use boardsync_translate::{Translate, classify, should_translate_body};

/// Outcome of one `translate_batch` call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TranslateReport {
    /// Target language code.
    pub language: String,
    /// Records whose title translation was stored.
    pub titles: usize,
    /// Records whose body translation was stored.
    pub bodies: usize,
    /// `(record id, message)` for every failed field or update.
    pub failures: Vec<(String, String)>,
}

/// Translated fields for one record, staged before the single update.
struct Staged {
    record_id: String,
    title: Result<String>,
    body: Option<Result<String>>,
}

/// Translates records that lack a title in the target language.
pub struct Translator {
    client: Arc<dyn Translate>,
    concurrency: usize,
}

impl Translator {
    pub fn new(client: Arc<dyn Translate>, concurrency: u32) -> Self {
        Self {
            client,
            concurrency: concurrency.max(1) as usize,
        }
    }

    /// Translate every untranslated record into `language`.
    ///
    /// Only listing the records can fail the batch. Field and update
    /// failures are collected in the report.
    #[instrument(skip_all, fields(language = %language))]
    pub async fn translate_batch(&self, storage: &Storage, language: &str) -> Result<TranslateReport> {
        let start = Instant::now();
        let records = storage.list_untranslated(language).await?;
        info!(pending = records.len(), "starting translation batch");

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(records.len());

        for record in records {
            let client = self.client.clone();
            let sem = semaphore.clone();
            let target = language.to_string();

            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire_owned().await.ok();
                let sample = classify(&record.body);
                debug!(
                    record_id = %record.id,
                    start = %sample.start,
                    middle = %sample.middle,
                    "classified body"
                );

                let title = client.translate(&record.title, &target).await;
                let body = if should_translate_body(&sample, &target) {
                    Some(client.translate(&record.body, &target).await)
                } else {
                    None
                };

                Staged {
                    record_id: record.id,
                    title,
                    body,
                }
            }));
        }

        let mut report = TranslateReport {
            language: language.to_string(),
            ..Default::default()
        };

        for handle in handles {
            let staged = match handle.await {
                Ok(staged) => staged,
                Err(e) => {
                    warn!(error = %e, "translation task failed");
                    report
                        .failures
                        .push((String::new(), format!("translation task failed: {e}")));
                    continue;
                }
            };
            self.apply(storage, language, staged, &mut report).await;
        }

        info!(
            titles = report.titles,
            bodies = report.bodies,
            failures = report.failures.len(),
            duration_ms = start.elapsed().as_millis(),
            "translation batch completed"
        );

        Ok(report)
    }

    /// Persist whatever was translated for one record.
    async fn apply(
        &self,
        storage: &Storage,
        language: &str,
        staged: Staged,
        report: &mut TranslateReport,
    ) {
        let id = staged.record_id;

        let title = match staged.title {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(record_id = %id, error = %e, "title translation failed");
                report.failures.push((id.clone(), format!("title: {e}")));
                None
            }
        };
        let body = match staged.body {
            Some(Ok(text)) => Some(text),
            Some(Err(e)) => {
                warn!(record_id = %id, error = %e, "body translation failed");
                report.failures.push((id.clone(), format!("body: {e}")));
                None
            }
            None => None,
        };

        if title.is_none() && body.is_none() {
            return;
        }

        match storage
            .upsert_translation(&id, language, title.as_deref(), body.as_deref())
            .await
        {
            Ok(()) => {
                report.titles += usize::from(title.is_some());
                report.bodies += usize::from(body.is_some());
            }
            Err(e) => {
                warn!(record_id = %id, error = %e, "failed to store translation");
                report.failures.push((id, format!("update: {e}")));
            }
        }
    }
}
