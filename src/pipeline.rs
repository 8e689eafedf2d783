use crate::aggregator::{self, NewFollow};
use crate::config::Config;
use crate::differ::{self, Comparison};
use crate::error::{ErrorRecovery, FollowwatchError, SnapshotError};
use crate::fetcher::{fetch_all, Collection};
use crate::governor::RateGovernor;
use crate::report::RunOutcome;
use crate::store::{Snapshot, SnapshotStore};
use crate::summary::RunSummary;
use crate::twitter::{Account, FollowSource};
use chrono::NaiveDate;
use tracing::{debug, error, info, warn};

/// Which stages a run performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Collect snapshots, then compare and rank
    Full,
    CollectOnly,
    /// Compare already stored snapshots without fetching following lists
    CompareOnly,
}

impl RunMode {
    fn collects(self) -> bool {
        matches!(self, RunMode::Full | RunMode::CollectOnly)
    }

    fn compares(self) -> bool {
        matches!(self, RunMode::Full | RunMode::CompareOnly)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub list_id: String,
    pub page_size: u32,
    pub window_days: u32,
    pub min_originators: usize,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            list_id: config.twitter.list_id.clone(),
            page_size: config.page_size(),
            window_days: config.window_days(),
            min_originators: config.min_originators(),
        }
    }
}

/// Collect → compare → rank over the members of one list.
///
/// Members are processed one at a time. A failure that only concerns one
/// member is logged and recorded in the summary; see
/// [`ErrorRecovery::aborts_batch`] for the failures that stop the run.
pub struct Pipeline<'a, S, T> {
    source: &'a S,
    store: &'a T,
    governor: RateGovernor,
    settings: PipelineSettings,
}

impl<'a, S, T> Pipeline<'a, S, T>
where
    S: FollowSource,
    T: SnapshotStore,
{
    pub fn new(
        source: &'a S,
        store: &'a T,
        governor: RateGovernor,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            source,
            store,
            governor,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Current members of the tracked list
    pub async fn list_members(&self) -> Result<Vec<Account>, FollowwatchError> {
        let collection = Collection::ListMembers {
            list_id: self.settings.list_id.clone(),
        };
        let max_page = collection.max_page_size();
        let fetched = fetch_all(self.source, collection, max_page).await?;

        let members: Vec<Account> = fetched.records.iter().map(|r| r.account()).collect();
        info!(
            "List {} has {} members",
            self.settings.list_id,
            members.len()
        );
        Ok(members)
    }

    /// Fetch and store every member's following list for `date`
    pub async fn collect(
        &mut self,
        members: &[Account],
        date: NaiveDate,
        summary: &mut RunSummary,
    ) -> Result<(), FollowwatchError> {
        for (index, member) in members.iter().enumerate() {
            debug!(
                "Collecting member {}/{}: {}",
                index + 1,
                members.len(),
                member.username
            );

            match self.collect_member(member, date, summary).await {
                Ok(()) => summary.snapshots_saved += 1,
                Err(e) if ErrorRecovery::aborts_batch(&e) => {
                    error!("Aborting collection at {}: {}", member.username, e);
                    return Err(e);
                }
                Err(e) => {
                    warn!("Skipping {}: {}", member.username, e);
                    summary.record_failure(&member.username, e.to_string());
                }
            }
        }

        summary.cooldowns = self.governor.cooldowns();
        Ok(())
    }

    async fn collect_member(
        &mut self,
        member: &Account,
        date: NaiveDate,
        summary: &mut RunSummary,
    ) -> Result<(), FollowwatchError> {
        let following_count = self.source.following_count(&member.id).await?;
        info!("{} is following {}", member.username, following_count);

        let admission = self.governor.admit(following_count).await;
        summary.estimated_calls += u64::from(admission.calls_required);

        info!("Recording who {} is following", member.username);
        let collection = Collection::Following {
            user_id: member.id.clone(),
        };
        let fetched = fetch_all(self.source, collection, self.settings.page_size).await?;
        summary.actual_calls += u64::from(fetched.calls);

        if fetched.calls > admission.calls_required {
            debug!(
                "{} took {} calls, {} estimated",
                member.username, fetched.calls, admission.calls_required
            );
        }

        self.store.save(&Snapshot {
            date,
            handle: member.username.clone(),
            records: fetched.records,
        })?;
        Ok(())
    }

    /// Compare each member's snapshot for `date` with the one a window
    /// earlier and gather everything they newly followed
    pub fn compare(
        &self,
        members: &[Account],
        date: NaiveDate,
        summary: &mut RunSummary,
    ) -> Vec<NewFollow> {
        let window_days = self.settings.window_days;
        info!(
            "Checking for changes in accounts followed over the last {} day(s)",
            window_days
        );

        let mut comparisons: Vec<(&str, Comparison)> = Vec::new();

        for member in members {
            let handle = member.username.as_str();
            match differ::compare(self.store, date, handle, window_days) {
                Ok(Comparison::NoBaseline { baseline_date }) => {
                    warn!(
                        "No snapshot of {} for {}. It may have joined the list in the last {} day(s); skipping",
                        handle, baseline_date, window_days
                    );
                    summary.no_baseline.push(handle.to_string());
                }
                Ok(comparison) => {
                    let added = comparison.added().len();
                    if added == 0 {
                        info!("No new follows by {}", handle);
                        summary.unchanged += 1;
                    } else {
                        info!("{} followed {} new accounts", handle, added);
                        summary.with_new_follows += 1;
                    }
                    comparisons.push((handle, comparison));
                }
                Err(SnapshotError::NotFound { key }) => {
                    warn!("No current snapshot {} for {}; skipping", key, handle);
                    summary.missing_current.push(handle.to_string());
                }
                Err(e) => {
                    warn!("Cannot compare {}: {}", handle, e);
                    summary.corrupt_snapshots.push(handle.to_string());
                }
            }
        }

        let new_follows = aggregator::collect_new_follows(
            comparisons
                .iter()
                .map(|(handle, comparison)| (*handle, comparison.added())),
        );
        summary.new_follows = new_follows.len();
        new_follows
    }

    /// Run the stages selected by `mode` for the logical `date`
    pub async fn run(
        &mut self,
        mode: RunMode,
        date: NaiveDate,
    ) -> Result<RunOutcome, FollowwatchError> {
        let mut summary = RunSummary::default();

        let members = self.list_members().await?;
        summary.members = members.len();

        if mode.collects() {
            self.collect(&members, date, &mut summary).await?;
        }

        let findings = if mode.compares() {
            let new_follows = self.compare(&members, date, &mut summary);
            let aggregation = aggregator::rank(&new_follows, self.settings.min_originators);
            summary.anomalies = aggregation.anomalies.len();
            Some(aggregation.findings)
        } else {
            None
        };

        if summary.is_partial() {
            warn!(
                "Run completed with {} collection failure(s), {} missing and {} unreadable snapshot(s)",
                summary.collection_failures.len(),
                summary.missing_current.len(),
                summary.corrupt_snapshots.len()
            );
        }

        Ok(RunOutcome {
            date,
            window_days: self.settings.window_days,
            findings,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UpstreamError;
    use crate::store::JsonFileStore;
    use crate::twitter::{PageMeta, UserPage, UserRecord};
    use std::collections::HashMap;
    use std::time::Duration;

    fn record(id: &str) -> UserRecord {
        UserRecord {
            created_at: None,
            id: id.to_string(),
            name: None,
            username: format!("target{id}"),
        }
    }

    /// Pages of the requested size, the offset serving as continuation token
    #[derive(Default)]
    struct FakeSource {
        members: Vec<UserRecord>,
        following: HashMap<String, Vec<UserRecord>>,
        failures: HashMap<String, UpstreamError>,
    }

    impl FakeSource {
        fn member(mut self, id: &str, handle: &str, follows: &[&str]) -> Self {
            self.members.push(UserRecord {
                created_at: None,
                id: id.to_string(),
                name: None,
                username: handle.to_string(),
            });
            self.following
                .insert(id.to_string(), follows.iter().map(|f| record(f)).collect());
            self
        }

        fn failing(mut self, id: &str, error: UpstreamError) -> Self {
            self.failures.insert(id.to_string(), error);
            self
        }
    }

    impl FollowSource for FakeSource {
        async fn fetch_page(
            &self,
            collection: &Collection,
            page_size: u32,
            pagination_token: Option<&str>,
        ) -> Result<UserPage, UpstreamError> {
            let all = match collection {
                Collection::ListMembers { .. } => &self.members,
                Collection::Following { user_id } => {
                    if let Some(e) = self.failures.get(user_id) {
                        return Err(e.clone());
                    }
                    &self.following[user_id]
                }
            };
            let offset: usize = pagination_token.map_or(0, |t| t.parse().unwrap());
            let end = (offset + page_size as usize).min(all.len());
            Ok(UserPage {
                data: all[offset..end].to_vec(),
                meta: PageMeta {
                    result_count: Some((end - offset) as u32),
                    next_token: (end < all.len()).then(|| end.to_string()),
                },
                errors: Vec::new(),
            })
        }

        async fn following_count(&self, user_id: &str) -> Result<u64, UpstreamError> {
            Ok(self.following.get(user_id).map_or(0, |f| f.len() as u64))
        }
    }

    fn settings() -> PipelineSettings {
        PipelineSettings {
            list_id: "1".to_string(),
            page_size: 2,
            window_days: 1,
            min_originators: 2,
        }
    }

    fn governor() -> RateGovernor {
        RateGovernor::new(100, 2, Duration::ZERO)
    }

    fn day(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_collect_saves_snapshots_and_counts_calls() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let source = FakeSource::default()
            .member("10", "alice", &["1", "2", "3"])
            .member("20", "bob", &[]);
        let mut pipeline = Pipeline::new(&source, &store, governor(), settings());

        let outcome = pipeline
            .run(RunMode::CollectOnly, day("2024-05-01"))
            .await
            .unwrap();

        assert!(outcome.findings.is_none());
        assert_eq!(outcome.summary.members, 2);
        assert_eq!(outcome.summary.snapshots_saved, 2);
        // alice: ceil(3/2) = 2 estimated and fetched; bob: 0 estimated, 1 fetched
        assert_eq!(outcome.summary.estimated_calls, 2);
        assert_eq!(outcome.summary.actual_calls, 3);

        let alice = store.load(day("2024-05-01"), "alice").unwrap();
        let ids: Vec<&str> = alice.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert!(store.load(day("2024-05-01"), "bob").unwrap().records.is_empty());
    }

    #[tokio::test]
    async fn test_member_failure_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let source = FakeSource::default()
            .member("10", "alice", &["1"])
            .member("20", "bob", &["1"])
            .member("30", "carol", &["1"])
            .failing("20", UpstreamError::RequestFailed("HTTP 503".to_string()));
        let mut pipeline = Pipeline::new(&source, &store, governor(), settings());

        let outcome = pipeline
            .run(RunMode::CollectOnly, day("2024-05-01"))
            .await
            .unwrap();

        assert_eq!(outcome.summary.snapshots_saved, 2);
        assert_eq!(outcome.summary.collection_failures.len(), 1);
        assert_eq!(outcome.summary.collection_failures[0].username, "bob");
        assert!(store.load(day("2024-05-01"), "carol").is_ok());
    }

    #[tokio::test]
    async fn test_authentication_failure_aborts_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let source = FakeSource::default()
            .member("10", "alice", &["1"])
            .member("20", "bob", &["1"])
            .failing(
                "10",
                UpstreamError::AuthenticationFailed("HTTP 401".to_string()),
            );
        let mut pipeline = Pipeline::new(&source, &store, governor(), settings());

        let err = pipeline
            .run(RunMode::Full, day("2024-05-01"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FollowwatchError::Upstream(UpstreamError::AuthenticationFailed(_))
        ));
        assert!(store.load(day("2024-05-01"), "bob").is_err());
    }

    #[tokio::test]
    async fn test_compare_only_uses_stored_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        for (date, handle, ids) in [
            ("2024-04-30", "alice", vec!["1", "2"]),
            ("2024-05-01", "alice", vec!["1", "2", "99", "7"]),
            ("2024-04-30", "bob", vec!["1"]),
            ("2024-05-01", "bob", vec!["99", "1"]),
            ("2024-05-01", "carol", vec!["99"]),
        ] {
            store
                .save(&Snapshot {
                    date: day(date),
                    handle: handle.to_string(),
                    records: ids.iter().map(|id| record(id)).collect(),
                })
                .unwrap();
        }

        // Following lists here would disagree with the files; compare must not fetch them
        let source = FakeSource::default()
            .member("10", "alice", &[])
            .member("20", "bob", &[])
            .member("30", "carol", &[]);
        let mut pipeline = Pipeline::new(&source, &store, governor(), settings());

        let outcome = pipeline
            .run(RunMode::CompareOnly, day("2024-05-01"))
            .await
            .unwrap();

        let findings = outcome.findings.unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].target.id, "99");
        assert_eq!(findings[0].originators, vec!["alice", "bob"]);
        assert_eq!(outcome.summary.no_baseline, vec!["carol"]);
        assert_eq!(outcome.summary.with_new_follows, 2);
        assert_eq!(outcome.summary.new_follows, 3);
        assert_eq!(outcome.summary.snapshots_saved, 0);
    }

    #[tokio::test]
    async fn test_compare_reports_missing_and_corrupt_snapshots_separately() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        store
            .save(&Snapshot {
                date: day("2024-05-01"),
                handle: "erin".to_string(),
                records: vec![record("1")],
            })
            .unwrap();
        std::fs::write(store.snapshot_path(day("2024-04-30"), "erin"), "[{").unwrap();

        let source = FakeSource::default()
            .member("40", "dave", &[])
            .member("50", "erin", &[]);
        let pipeline = Pipeline::new(&source, &store, governor(), settings());
        let members = pipeline.list_members().await.unwrap();

        let mut summary = RunSummary::default();
        let new_follows = pipeline.compare(&members, day("2024-05-01"), &mut summary);

        assert!(new_follows.is_empty());
        assert_eq!(summary.missing_current, vec!["dave"]);
        assert_eq!(summary.corrupt_snapshots, vec!["erin"]);
        assert!(summary.no_baseline.is_empty());
        assert!(summary.is_partial());
    }

    #[tokio::test]
    async fn test_estimate_matches_calls_for_oversized_page_size() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let ids: Vec<String> = (0..5000).map(|i| i.to_string()).collect();
        let follows: Vec<&str> = ids.iter().map(String::as_str).collect();
        let source = FakeSource::default().member("10", "alice", &follows);

        let mut oversized = settings();
        oversized.page_size = 5000;
        let mut pipeline = Pipeline::new(
            &source,
            &store,
            RateGovernor::new(15, 5000, Duration::ZERO),
            oversized,
        );

        let outcome = pipeline
            .run(RunMode::CollectOnly, day("2024-05-01"))
            .await
            .unwrap();
        assert_eq!(outcome.summary.actual_calls, 5);
        assert_eq!(outcome.summary.estimated_calls, 5);
    }

    #[tokio::test]
    async fn test_governor_cooldowns_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let source = FakeSource::default()
            .member("10", "alice", &["1", "2", "3", "4"])
            .member("20", "bob", &["1", "2", "3", "4"]);
        let mut pipeline = Pipeline::new(
            &source,
            &store,
            RateGovernor::new(3, 2, Duration::ZERO),
            settings(),
        );

        let outcome = pipeline
            .run(RunMode::CollectOnly, day("2024-05-01"))
            .await
            .unwrap();
        assert_eq!(outcome.summary.cooldowns, 1);
        assert_eq!(outcome.summary.estimated_calls, 4);
    }
}
