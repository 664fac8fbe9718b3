//! Stage orchestration for boardsync.
//!
//! This crate ties the crawler, translator, and store together:
//! - [`translate`]: batch translation of stored records
//! - [`reconcile`]: removal of records whose source page is gone
//! - [`consensus`]: promotion of event proposals that reached quorum
//! - [`job`]: the daily job running every stage in order

pub mod consensus;
pub mod job;
pub mod reconcile;
pub mod translate;

pub use consensus::{ConsensusMerger, MergeOutcome, MergePlan, MergeReport, UserDirectory, plan_merge};
pub use job::{DailyJob, JobReport, ProgressReporter, SilentProgress, Stage, StageSummary};
pub use reconcile::{ReconcileReport, Reconciler};
pub use translate::{TranslateReport, Translator};
