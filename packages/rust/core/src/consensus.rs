//! Promotion of agreed-upon event proposals into confirmed calendar events.
//!
//! Proposals are grouped by exact title. A group with at least `quorum`
//! members is merged into one [`ConfirmedEvent`]: the most-voted start date
//! wins, the earliest submission supplies the remaining fields and the
//! author, and the top-ranked dates are listed in the event contents.

use std::collections::BTreeMap;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use boardsync_shared::{
    BoardSyncError, ConfirmedEvent, ConsensusConfig, EventProposal, Result, UserProfile,
};
use boardsync_storage::Storage;

/// Read access to account profiles.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, id: &str) -> Result<Option<UserProfile>>;
}

#[async_trait]
impl UserDirectory for Storage {
    async fn find_user(&self, id: &str) -> Result<Option<UserProfile>> {
        self.get_user(id).await
    }
}

/// What happened to one title group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Promoted {
        title: String,
        event_id: String,
        removed: u64,
    },
    BelowQuorum {
        title: String,
        count: usize,
    },
    /// Another run holds the merge claim for this title.
    Contended {
        title: String,
    },
    Failed {
        title: String,
        error: String,
    },
}

/// Outcome of one merge pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeReport {
    /// Titles promoted to confirmed events.
    pub promoted: Vec<String>,
    /// Number of groups left alone for lack of votes.
    pub below_quorum: usize,
    /// Titles skipped because their claim was held.
    pub contended: Vec<String>,
    /// `(title, message)` for groups that failed.
    pub failures: Vec<(String, String)>,
}

impl MergeReport {
    fn record(&mut self, outcome: MergeOutcome) {
        match outcome {
            MergeOutcome::Promoted { title, .. } => self.promoted.push(title),
            MergeOutcome::BelowQuorum { .. } => self.below_quorum += 1,
            MergeOutcome::Contended { title } => self.contended.push(title),
            MergeOutcome::Failed { title, error } => self.failures.push((title, error)),
        }
    }
}

/// Date ranking and synthesized contents for one qualifying group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan {
    /// Index of the earliest-created proposal in the group.
    pub founder: usize,
    /// Most-voted start date.
    pub start_date: NaiveDate,
    /// One `Date: … ~ Date: …` line per displayed slot.
    pub contents: String,
}

/// Rank the group's start dates and build the contents text.
///
/// Dates are ordered by vote count, then by earlier date. Every line ends
/// with the top slot's end date, taken from the earliest proposal in that
/// slot. Returns `None` for an empty group.
pub fn plan_merge(proposals: &[EventProposal], display_slots: usize) -> Option<MergePlan> {
    let founder = earliest(proposals.iter().enumerate())?;

    let mut slots: BTreeMap<NaiveDate, Vec<usize>> = BTreeMap::new();
    for (i, p) in proposals.iter().enumerate() {
        slots.entry(p.start_date).or_default().push(i);
    }

    let mut ranked: Vec<(NaiveDate, Vec<usize>)> = slots.into_iter().collect();
    // Stable sort keeps BTreeMap's ascending date order among equal counts
    ranked.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

    let (start_date, top_members) = ranked.first()?;
    let top_end = earliest(top_members.iter().map(|&i| (i, &proposals[i])))
        .map(|i| proposals[i].end_date)?;

    let contents = ranked
        .iter()
        .take(display_slots.min(ranked.len()))
        .map(|(date, _)| format!("Date: {date} ~ Date: {top_end}"))
        .collect::<Vec<_>>()
        .join("\n");

    Some(MergePlan {
        founder,
        start_date: *start_date,
        contents,
    })
}

fn earliest<'a>(items: impl Iterator<Item = (usize, &'a EventProposal)>) -> Option<usize> {
    items
        .min_by(|(_, a), (_, b)| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
        .map(|(i, _)| i)
}

/// Merges proposal groups that reached quorum.
pub struct ConsensusMerger {
    config: ConsensusConfig,
}

impl ConsensusMerger {
    pub fn new(config: ConsensusConfig) -> Self {
        Self { config }
    }

    /// Merge every qualifying title group.
    ///
    /// Only loading the proposals can fail the pass. Each group's failure
    /// is recorded in the report and the remaining groups still run.
    #[instrument(skip_all, fields(quorum = self.config.quorum))]
    pub async fn merge_proposals(
        &self,
        storage: &Storage,
        users: &dyn UserDirectory,
    ) -> Result<MergeReport> {
        let start = Instant::now();
        let proposals = storage.list_event_proposals().await?;

        let mut groups: BTreeMap<String, Vec<EventProposal>> = BTreeMap::new();
        for p in proposals {
            groups.entry(p.title.clone()).or_default().push(p);
        }
        info!(groups = groups.len(), "starting merge");

        let mut report = MergeReport::default();
        for (title, group) in groups {
            let outcome = self.merge_group(storage, users, title, &group).await;
            report.record(outcome);
        }

        info!(
            promoted = report.promoted.len(),
            below_quorum = report.below_quorum,
            contended = report.contended.len(),
            failures = report.failures.len(),
            duration_ms = start.elapsed().as_millis(),
            "merge completed"
        );

        Ok(report)
    }

    async fn merge_group(
        &self,
        storage: &Storage,
        users: &dyn UserDirectory,
        title: String,
        group: &[EventProposal],
    ) -> MergeOutcome {
        if group.len() < self.config.quorum {
            debug!(%title, count = group.len(), "below quorum");
            return MergeOutcome::BelowQuorum {
                title,
                count: group.len(),
            };
        }

        let claim_id = Uuid::now_v7().to_string();
        match storage
            .try_claim_merge(&title, &claim_id, self.config.claim_lease_secs)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                info!(%title, "merge claim held elsewhere, skipping");
                return MergeOutcome::Contended { title };
            }
            Err(e) => {
                warn!(%title, error = %e, "failed to claim group");
                return MergeOutcome::Failed {
                    title,
                    error: e.to_string(),
                };
            }
        }

        let outcome = self.merge_claimed(storage, users, title.clone()).await;

        if let Err(e) = storage.release_merge_claim(&title, &claim_id).await {
            warn!(%title, error = %e, "failed to release merge claim");
        }

        outcome
    }

    /// Re-read the group under the claim and promote it if it still qualifies.
    async fn merge_claimed(
        &self,
        storage: &Storage,
        users: &dyn UserDirectory,
        title: String,
    ) -> MergeOutcome {
        // The snapshot may predate another run's promotion of this title
        let group = match storage.list_proposals_by_title(&title).await {
            Ok(group) => group,
            Err(e) => {
                warn!(%title, error = %e, "failed to reload group");
                return MergeOutcome::Failed {
                    title,
                    error: e.to_string(),
                };
            }
        };
        if group.len() < self.config.quorum {
            debug!(%title, count = group.len(), "group shrank below quorum");
            return MergeOutcome::BelowQuorum {
                title,
                count: group.len(),
            };
        }

        match self.promote(storage, users, &title, &group).await {
            Ok((event_id, removed)) => {
                info!(%title, %event_id, removed, "promoted proposals");
                MergeOutcome::Promoted {
                    title,
                    event_id,
                    removed,
                }
            }
            Err(e) => {
                warn!(%title, error = %e, "merge failed");
                MergeOutcome::Failed {
                    title,
                    error: e.to_string(),
                }
            }
        }
    }

    async fn promote(
        &self,
        storage: &Storage,
        users: &dyn UserDirectory,
        title: &str,
        group: &[EventProposal],
    ) -> Result<(String, u64)> {
        let plan = plan_merge(group, self.config.display_slots)
            .ok_or_else(|| BoardSyncError::validation(format!("empty group '{title}'")))?;
        let founder = &group[plan.founder];

        let author = users.find_user(&founder.author_id).await?.ok_or_else(|| {
            BoardSyncError::validation(format!("unknown author '{}'", founder.author_id))
        })?;

        let event = ConfirmedEvent {
            id: Uuid::now_v7().to_string(),
            start_date: plan.start_date,
            end_date: founder.end_date,
            title: founder.title.clone(),
            contents: plan.contents,
            author_id: author.id,
            author_nickname: author.nickname,
            is_admin_authored: author.is_admin,
            source_url: founder.source_url.clone(),
            event_type: founder.event_type.clone(),
            created_at: Utc::now(),
        };

        let removed = storage
            .promote_proposals(&event, title, group.len() as u64)
            .await?;
        Ok((event.id, removed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 20, 9, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
    }

    fn proposal(title: &str, author: &str, start: u32, end: u32, created: i64) -> EventProposal {
        EventProposal {
            id: Uuid::now_v7().to_string(),
            author_id: author.into(),
            author_nickname: format!("{author}-nick"),
            title: title.into(),
            start_date: d(start),
            end_date: d(end),
            contents: None,
            source_url: format!("https://www.example.ac.kr/{author}"),
            event_type: "academic".into(),
            created_at: t(created),
        }
    }

    fn user(id: &str, is_admin: bool) -> UserProfile {
        UserProfile {
            id: id.into(),
            nickname: format!("{id}-profile"),
            is_admin,
        }
    }

    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("bs-consensus-test-{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.unwrap()
    }

    fn merger() -> ConsensusMerger {
        ConsensusMerger::new(ConsensusConfig::default())
    }

    #[test]
    fn plan_picks_most_voted_date_and_founder() {
        let group = vec![
            proposal("Seminar", "u2", 1, 3, 10),
            proposal("Seminar", "u1", 1, 2, 0),
            proposal("Seminar", "u3", 2, 4, 20),
        ];
        let plan = plan_merge(&group, 2).unwrap();
        assert_eq!(plan.founder, 1);
        assert_eq!(plan.start_date, d(1));
        // Both lines reuse the top slot's end date
        assert_eq!(
            plan.contents,
            "Date: 2024-05-01 ~ Date: 2024-05-02\nDate: 2024-05-02 ~ Date: 2024-05-02"
        );
    }

    #[test]
    fn plan_breaks_ties_with_earlier_date() {
        let group = vec![
            proposal("Fair", "u1", 7, 8, 0),
            proposal("Fair", "u2", 3, 9, 5),
        ];
        let plan = plan_merge(&group, 2).unwrap();
        assert_eq!(plan.start_date, d(3));
        assert_eq!(
            plan.contents,
            "Date: 2024-05-03 ~ Date: 2024-05-09\nDate: 2024-05-07 ~ Date: 2024-05-09"
        );
    }

    #[test]
    fn plan_limits_lines_to_display_slots() {
        let group = vec![
            proposal("Expo", "u1", 1, 1, 0),
            proposal("Expo", "u2", 2, 2, 1),
            proposal("Expo", "u3", 3, 3, 2),
        ];
        assert_eq!(plan_merge(&group, 2).unwrap().contents.lines().count(), 2);
        assert_eq!(plan_merge(&group, 5).unwrap().contents.lines().count(), 3);

        let single = vec![proposal("Expo", "u1", 1, 1, 0), proposal("Expo", "u2", 1, 4, 1)];
        assert_eq!(
            plan_merge(&single, 2).unwrap().contents,
            "Date: 2024-05-01 ~ Date: 2024-05-01"
        );
    }

    #[test]
    fn plan_of_empty_group_is_none() {
        assert!(plan_merge(&[], 2).is_none());
    }

    #[tokio::test]
    async fn seminar_group_is_promoted_and_workshop_untouched() {
        let storage = test_storage().await;
        storage.upsert_user(&user("t1", true)).await.unwrap();
        storage.upsert_user(&user("t2", false)).await.unwrap();
        storage.upsert_user(&user("t3", false)).await.unwrap();

        storage.insert_event_proposal(&proposal("Seminar", "t2", 1, 1, 10)).await.unwrap();
        storage.insert_event_proposal(&proposal("Seminar", "t1", 1, 2, 0)).await.unwrap();
        storage.insert_event_proposal(&proposal("Seminar", "t3", 2, 2, 20)).await.unwrap();
        storage.insert_event_proposal(&proposal("Workshop", "t2", 9, 9, 5)).await.unwrap();

        let report = merger().merge_proposals(&storage, &storage).await.unwrap();
        assert_eq!(report.promoted, vec!["Seminar".to_string()]);
        assert_eq!(report.below_quorum, 1);
        assert!(report.failures.is_empty());

        let events = storage.list_confirmed_events().await.unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.title, "Seminar");
        assert_eq!(event.start_date, d(1));
        assert_eq!(event.end_date, d(2));
        assert_eq!(event.author_id, "t1");
        assert_eq!(event.author_nickname, "t1-profile");
        assert!(event.is_admin_authored);
        assert_eq!(event.source_url, "https://www.example.ac.kr/t1");
        assert_eq!(event.event_type, "academic");

        assert!(storage.list_proposals_by_title("Seminar").await.unwrap().is_empty());
        assert_eq!(storage.list_proposals_by_title("Workshop").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_founder_fails_only_that_group() {
        let storage = test_storage().await;
        storage.upsert_user(&user("a", false)).await.unwrap();

        storage.insert_event_proposal(&proposal("Ghost", "missing", 1, 1, 0)).await.unwrap();
        storage.insert_event_proposal(&proposal("Ghost", "a", 1, 1, 1)).await.unwrap();
        storage.insert_event_proposal(&proposal("Talk", "a", 4, 4, 0)).await.unwrap();
        storage.insert_event_proposal(&proposal("Talk", "a", 4, 5, 1)).await.unwrap();

        let report = merger().merge_proposals(&storage, &storage).await.unwrap();
        assert_eq!(report.promoted, vec!["Talk".to_string()]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "Ghost");

        assert_eq!(storage.list_proposals_by_title("Ghost").await.unwrap().len(), 2);
        // Claim released so the next run can retry
        assert!(storage.try_claim_merge("Ghost", "next-run", 600).await.unwrap());
    }

    #[tokio::test]
    async fn held_claim_skips_group() {
        let storage = test_storage().await;
        storage.upsert_user(&user("a", false)).await.unwrap();
        storage.insert_event_proposal(&proposal("Concert", "a", 1, 1, 0)).await.unwrap();
        storage.insert_event_proposal(&proposal("Concert", "a", 1, 1, 1)).await.unwrap();

        assert!(storage.try_claim_merge("Concert", "other-run", 600).await.unwrap());

        let report = merger().merge_proposals(&storage, &storage).await.unwrap();
        assert_eq!(report.contended, vec!["Concert".to_string()]);
        assert!(report.promoted.is_empty());
        assert_eq!(storage.list_proposals_by_title("Concert").await.unwrap().len(), 2);
        assert!(storage.list_confirmed_events().await.unwrap().is_empty());
    }

    /// Runs a whole second merge pass the first time an author is looked up,
    /// interleaving it with the pass that called it.
    struct OverlappingRun<'a> {
        storage: &'a Storage,
        fired: AtomicBool,
        inner: Mutex<Option<MergeReport>>,
    }

    #[async_trait]
    impl UserDirectory for OverlappingRun<'_> {
        async fn find_user(&self, id: &str) -> Result<Option<UserProfile>> {
            if !self.fired.swap(true, Ordering::SeqCst) {
                let report = merger().merge_proposals(self.storage, self.storage).await?;
                *self.inner.lock().unwrap() = Some(report);
            }
            self.storage.get_user(id).await
        }
    }

    #[tokio::test]
    async fn overlapping_runs_promote_each_group_once() {
        let storage = test_storage().await;
        storage.upsert_user(&user("a", false)).await.unwrap();
        storage.insert_event_proposal(&proposal("Alpha", "a", 1, 1, 0)).await.unwrap();
        storage.insert_event_proposal(&proposal("Alpha", "a", 1, 1, 1)).await.unwrap();
        storage.insert_event_proposal(&proposal("Seminar", "a", 2, 2, 0)).await.unwrap();
        storage.insert_event_proposal(&proposal("Seminar", "a", 2, 2, 1)).await.unwrap();

        let users = OverlappingRun {
            storage: &storage,
            fired: AtomicBool::new(false),
            inner: Mutex::new(None),
        };
        let outer = merger().merge_proposals(&storage, &users).await.unwrap();
        let inner = users.inner.lock().unwrap().take().unwrap();

        assert_eq!(inner.promoted, vec!["Seminar".to_string()]);
        assert_eq!(inner.contended, vec!["Alpha".to_string()]);
        assert_eq!(outer.promoted, vec!["Alpha".to_string()]);
        assert_eq!(outer.below_quorum, 1);
        assert!(outer.failures.is_empty());

        let events = storage.list_confirmed_events().await.unwrap();
        let titles: Vec<&str> = events.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles.iter().filter(|t| **t == "Seminar").count(), 1);
        assert_eq!(titles.iter().filter(|t| **t == "Alpha").count(), 1);
        assert!(storage.list_event_proposals().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn expired_claim_is_taken_over() {
        let storage = test_storage().await;
        storage.upsert_user(&user("a", false)).await.unwrap();
        storage.insert_event_proposal(&proposal("Concert", "a", 1, 1, 0)).await.unwrap();
        storage.insert_event_proposal(&proposal("Concert", "a", 1, 1, 1)).await.unwrap();

        assert!(storage.try_claim_merge("Concert", "crashed-run", 600).await.unwrap());
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

        let merger = ConsensusMerger::new(ConsensusConfig {
            claim_lease_secs: 0,
            ..ConsensusConfig::default()
        });
        let report = merger.merge_proposals(&storage, &storage).await.unwrap();
        assert_eq!(report.promoted, vec!["Concert".to_string()]);
    }

    #[tokio::test]
    async fn quorum_is_configurable() {
        let storage = test_storage().await;
        storage.upsert_user(&user("a", false)).await.unwrap();
        storage.insert_event_proposal(&proposal("Solo", "a", 1, 1, 0)).await.unwrap();

        let merger = ConsensusMerger::new(ConsensusConfig {
            quorum: 1,
            ..ConsensusConfig::default()
        });
        let report = merger.merge_proposals(&storage, &storage).await.unwrap();
        assert_eq!(report.promoted, vec!["Solo".to_string()]);
    }
}
