use serde::Serialize;

/// A member whose following list could not be collected
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberFailure {
    pub username: String,
    pub reason: String,
}

/// Counters for one run, reported after the findings
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub members: usize,
    pub snapshots_saved: usize,
    pub estimated_calls: u64,
    pub actual_calls: u64,
    pub cooldowns: u32,
    pub collection_failures: Vec<MemberFailure>,
    /// Members with no snapshot at the start of the comparison window
    pub no_baseline: Vec<String>,
    /// Members with no snapshot for the run date itself
    pub missing_current: Vec<String>,
    pub corrupt_snapshots: Vec<String>,
    pub unchanged: usize,
    pub with_new_follows: usize,
    pub new_follows: usize,
    pub anomalies: usize,
}

impl RunSummary {
    pub fn record_failure(&mut self, username: &str, reason: impl Into<String>) {
        self.collection_failures.push(MemberFailure {
            username: username.to_string(),
            reason: reason.into(),
        });
    }

    /// True when some member was skipped for any reason other than a missing baseline
    pub fn is_partial(&self) -> bool {
        !self.collection_failures.is_empty()
            || !self.missing_current.is_empty()
            || !self.corrupt_snapshots.is_empty()
    }
}
