use crate::error::SnapshotError;
use crate::store::SnapshotStore;
use crate::twitter::UserRecord;
use chrono::{Days, NaiveDate};
use std::collections::HashSet;

/// Difference between two snapshots of one account's following list
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Delta {
    /// In the current snapshot only, in current order
    pub added: Vec<UserRecord>,
    /// In the previous snapshot only, in previous order
    pub removed: Vec<UserRecord>,
    /// In both, as they appear in the current snapshot
    pub unchanged: Vec<UserRecord>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Result of comparing today's snapshot with the one a window earlier
#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    /// No snapshot exists for the baseline date
    NoBaseline { baseline_date: NaiveDate },
    NoChange,
    Changes(Delta),
}

impl Comparison {
    /// Newly followed accounts, empty unless there are changes
    pub fn added(&self) -> &[UserRecord] {
        match self {
            Comparison::Changes(delta) => &delta.added,
            _ => &[],
        }
    }
}

/// Set difference keyed by the followed account's id.
///
/// Ordering and mutable fields (display name, handle) are ignored; a repeated
/// id within one snapshot is counted once.
pub fn diff(previous: &[UserRecord], current: &[UserRecord]) -> Delta {
    let previous_ids: HashSet<&str> = previous.iter().map(|r| r.id.as_str()).collect();
    let current_ids: HashSet<&str> = current.iter().map(|r| r.id.as_str()).collect();
    let mut delta = Delta::default();

    let mut seen = HashSet::new();
    for record in current {
        if !seen.insert(record.id.as_str()) {
            continue;
        }
        if previous_ids.contains(record.id.as_str()) {
            delta.unchanged.push(record.clone());
        } else {
            delta.added.push(record.clone());
        }
    }

    let mut seen = HashSet::new();
    for record in previous {
        if seen.insert(record.id.as_str()) && !current_ids.contains(record.id.as_str()) {
            delta.removed.push(record.clone());
        }
    }

    delta
}

/// Compare the snapshot for `date` against the one `window_days` earlier.
///
/// A missing baseline is `NoBaseline`; a missing current snapshot or an
/// unreadable file is an error.
pub fn compare<S: SnapshotStore>(
    store: &S,
    date: NaiveDate,
    handle: &str,
    window_days: u32,
) -> Result<Comparison, SnapshotError> {
    let current = store.load(date, handle)?;

    let previous = match store.load_shifted(date, handle, window_days) {
        Ok(previous) => previous,
        Err(SnapshotError::NotFound { .. }) => {
            let baseline_date = date
                .checked_sub_days(Days::new(u64::from(window_days)))
                .unwrap_or(NaiveDate::MIN);
            return Ok(Comparison::NoBaseline { baseline_date });
        }
        Err(e) => return Err(e),
    };

    let delta = diff(&previous.records, &current.records);
    if delta.is_empty() {
        Ok(Comparison::NoChange)
    } else {
        Ok(Comparison::Changes(delta))
    }
}
