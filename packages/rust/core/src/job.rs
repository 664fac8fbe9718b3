//! Daily job: crawl → translate (per language) → reconcile → merge.
//!
//! Each stage is recorded in `job_runs` with its aggregated stats. A stage
//! that aborts is listed in the [`JobReport`] and the remaining stages still
//! run.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{error, info, instrument, warn};

use boardsync_crawler::{CrawlReport, Crawler, ItemOutcome, SkipReason};
use boardsync_shared::{
    AppConfig, BoardSyncError, ConsensusConfig, CrawlConfig, Result, SourceConfig,
    TranslateConfig,
};
use boardsync_storage::Storage;
use boardsync_translate::Translate;

use crate::consensus::{ConsensusMerger, UserDirectory};
use crate::reconcile::Reconciler;
use crate::translate::Translator;

/// One step of the daily job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    Crawl,
    Translate(String),
    Reconcile,
    Merge,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Crawl => f.write_str("crawl"),
            Self::Translate(lang) => write!(f, "translate:{lang}"),
            Self::Reconcile => f.write_str("reconcile"),
            Self::Merge => f.write_str("merge"),
        }
    }
}

/// Progress callback for reporting job status.
pub trait ProgressReporter: Send + Sync {
    /// Called when a stage starts.
    fn stage_started(&self, stage: &Stage);
    /// Called when a stage completes, with a one-line summary.
    fn stage_finished(&self, stage: &Stage, summary: &str);
    /// Called when a stage aborts.
    fn stage_failed(&self, stage: &Stage, error: &BoardSyncError);
    /// Called when the job completes.
    fn done(&self, report: &JobReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn stage_started(&self, _stage: &Stage) {}
    fn stage_finished(&self, _stage: &Stage, _summary: &str) {}
    fn stage_failed(&self, _stage: &Stage, _error: &BoardSyncError) {}
    fn done(&self, _report: &JobReport) {}
}

/// Aggregated result of one stage.
#[derive(Debug, Clone)]
pub struct StageSummary {
    pub stage: Stage,
    /// Human-readable one-liner.
    pub summary: String,
    /// Counts and error list, as stored in `job_runs`.
    pub stats: serde_json::Value,
}

/// Result of the daily job.
#[derive(Debug, Default)]
pub struct JobReport {
    /// Stages that ran to completion.
    pub completed: Vec<StageSummary>,
    /// Stages that aborted, with the error message.
    pub aborted: Vec<(String, String)>,
    /// Set when Ctrl-C stopped the job before every stage ran.
    pub interrupted: bool,
    pub elapsed: Duration,
}

impl JobReport {
    pub fn is_success(&self) -> bool {
        self.aborted.is_empty() && !self.interrupted
    }
}

/// The configured pipeline components.
pub struct DailyJob {
    crawler: Crawler,
    translator: Option<Translator>,
    reconciler: Reconciler,
    merger: ConsensusMerger,
    languages: Vec<String>,
}

impl DailyJob {
    /// Build every stage from the app config.
    ///
    /// `translate` may be `None` when no API key is available; translation
    /// stages then abort with a config error while the others still run.
    pub fn new(config: &AppConfig, translate: Option<Arc<dyn Translate>>) -> Result<Self> {
        let crawl = CrawlConfig::from(config);
        let translate_config = TranslateConfig::from(config);

        Ok(Self {
            crawler: Crawler::new(SourceConfig::from(config), crawl.clone())?,
            translator: translate
                .map(|client| Translator::new(client, translate_config.concurrency)),
            reconciler: Reconciler::new(&crawl)?,
            merger: ConsensusMerger::new(ConsensusConfig::from(config)),
            languages: translate_config.languages,
        })
    }

    /// Stages in execution order.
    pub fn stages(&self) -> Vec<Stage> {
        let mut stages = vec![Stage::Crawl];
        stages.extend(self.languages.iter().cloned().map(Stage::Translate));
        stages.push(Stage::Reconcile);
        stages.push(Stage::Merge);
        stages
    }

    /// Run every stage in order.
    ///
    /// Once `cancel` is set no further stage is started; the stage in
    /// flight finishes.
    #[instrument(skip_all)]
    pub async fn run(
        &self,
        storage: &Storage,
        users: &dyn UserDirectory,
        progress: &dyn ProgressReporter,
        cancel: &AtomicBool,
    ) -> JobReport {
        let start = Instant::now();
        let mut report = JobReport::default();

        for stage in self.stages() {
            if cancel.load(Ordering::SeqCst) {
                warn!(next = %stage, "job interrupted");
                report.interrupted = true;
                break;
            }

            progress.stage_started(&stage);
            match self.run_stage(&stage, storage, users).await {
                Ok(summary) => {
                    progress.stage_finished(&stage, &summary.summary);
                    report.completed.push(summary);
                }
                Err(e) => {
                    error!(stage = %stage, error = %e, "stage aborted");
                    progress.stage_failed(&stage, &e);
                    report.aborted.push((stage.to_string(), e.to_string()));
                }
            }
        }

        report.elapsed = start.elapsed();
        info!(
            completed = report.completed.len(),
            aborted = report.aborted.len(),
            interrupted = report.interrupted,
            elapsed_ms = report.elapsed.as_millis(),
            "daily job finished"
        );
        progress.done(&report);
        report
    }

    /// Run one stage and record it in `job_runs`.
    #[instrument(skip_all, fields(stage = %stage))]
    pub async fn run_stage(
        &self,
        stage: &Stage,
        storage: &Storage,
        users: &dyn UserDirectory,
    ) -> Result<StageSummary> {
        let run_id = storage.insert_job_run(&stage.to_string()).await?;

        let outcome = self.execute(stage, storage, users).await;
        let stats = match &outcome {
            Ok((_, stats)) => stats.clone(),
            Err(e) => json!({ "aborted": e.to_string() }),
        };
        if let Err(e) = storage.finish_job_run(&run_id, &stats.to_string()).await {
            warn!(error = %e, "failed to record stage stats");
        }

        let (summary, stats) = outcome?;
        Ok(StageSummary {
            stage: stage.clone(),
            summary,
            stats,
        })
    }

    async fn execute(
        &self,
        stage: &Stage,
        storage: &Storage,
        users: &dyn UserDirectory,
    ) -> Result<(String, serde_json::Value)> {
        match stage {
            Stage::Crawl => {
                let report = self.crawler.crawl(storage).await?;
                Ok((
                    format!(
                        "{} created, {} skipped, {} failed",
                        report.created(),
                        report.skipped(),
                        report.errors().len()
                    ),
                    crawl_stats(&report),
                ))
            }
            Stage::Translate(lang) => {
                let translator = self.translator.as_ref().ok_or_else(|| {
                    BoardSyncError::config("translation API key is not configured")
                })?;
                let report = translator.translate_batch(storage, lang).await?;
                Ok((
                    format!(
                        "{} titles, {} bodies, {} failed",
                        report.titles,
                        report.bodies,
                        report.failures.len()
                    ),
                    to_stats(&report)?,
                ))
            }
            Stage::Reconcile => {
                let report = self.reconciler.reconcile(storage).await?;
                Ok((
                    format!(
                        "{} retained, {} removed, {} failed",
                        report.retained,
                        report.removed,
                        report.failures.len()
                    ),
                    to_stats(&report)?,
                ))
            }
            Stage::Merge => {
                let report = self.merger.merge_proposals(storage, users).await?;
                Ok((
                    format!(
                        "{} promoted, {} below quorum, {} contended, {} failed",
                        report.promoted.len(),
                        report.below_quorum,
                        report.contended.len(),
                        report.failures.len()
                    ),
                    to_stats(&report)?,
                ))
            }
        }
    }
}

fn to_stats(report: &impl serde::Serialize) -> Result<serde_json::Value> {
    serde_json::to_value(report)
        .map_err(|e| BoardSyncError::validation(format!("failed to serialize stats: {e}")))
}

fn crawl_stats(report: &CrawlReport) -> serde_json::Value {
    let already_stored = report
        .outcomes
        .iter()
        .filter(|o| {
            matches!(
                o,
                ItemOutcome::Skipped {
                    reason: SkipReason::AlreadyStored,
                    ..
                }
            )
        })
        .count();

    json!({
        "created": report.created(),
        "skipped": report.skipped(),
        "already_stored": already_stored,
        "errors": report.errors(),
        "duration_ms": report.duration.as_millis() as u64,
    })
}
