use crate::error::AggregationError;
use crate::twitter::{Account, UserRecord};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// A target newly followed by one tracked account
#[derive(Debug, Clone, PartialEq)]
pub struct NewFollow {
    pub target: UserRecord,
    pub originator: String,
}

/// A target newly followed by enough distinct originators to report
#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    pub target: Account,
    /// Originators in encounter order, as collected
    pub originators: Vec<String>,
    pub distinct_originators: usize,
}

/// Ranked findings plus the records that had to be skipped
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregation {
    pub findings: Vec<Finding>,
    pub anomalies: Vec<AggregationError>,
}

/// Flatten per-originator added sets into (target, originator) pairs
pub fn collect_new_follows<'a, I>(added_by_originator: I) -> Vec<NewFollow>
where
    I: IntoIterator<Item = (&'a str, &'a [UserRecord])>,
{
    added_by_originator
        .into_iter()
        .flat_map(|(originator, added)| {
            added.iter().map(move |target| NewFollow {
                target: target.clone(),
                originator: originator.to_string(),
            })
        })
        .collect()
}

fn check(new_follow: &NewFollow) -> Result<(), AggregationError> {
    let reason = if new_follow.originator.trim().is_empty() {
        Some("originator is empty")
    } else if new_follow.target.id.trim().is_empty() {
        Some("target id is empty")
    } else if new_follow.target.username.trim().is_empty() {
        Some("target username is missing")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(AggregationError::Anomaly {
            originator: new_follow.originator.clone(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// Group new follows by target id and keep targets with at least
/// `min_originators` distinct originators, most-followed first.
///
/// Ties keep the order in which targets were first encountered.
pub fn rank(new_follows: &[NewFollow], min_originators: usize) -> Aggregation {
    struct Group<'a> {
        target: &'a UserRecord,
        originators: Vec<&'a str>,
    }

    let mut anomalies = Vec::new();
    let mut groups: Vec<Group<'_>> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for new_follow in new_follows {
        if let Err(anomaly) = check(new_follow) {
            warn!("Skipping new-follow record: {}", anomaly);
            anomalies.push(anomaly);
            continue;
        }

        let slot = *index
            .entry(new_follow.target.id.as_str())
            .or_insert_with(|| {
                groups.push(Group {
                    target: &new_follow.target,
                    originators: Vec::new(),
                });
                groups.len() - 1
            });
        groups[slot].originators.push(new_follow.originator.as_str());
    }

    let mut findings: Vec<Finding> = groups
        .into_iter()
        .filter_map(|group| {
            let distinct = group.originators.iter().collect::<HashSet<_>>().len();
            (distinct >= min_originators).then(|| Finding {
                target: group.target.account(),
                originators: group.originators.iter().map(|o| o.to_string()).collect(),
                distinct_originators: distinct,
            })
        })
        .collect();

    // sort_by is stable, so equal counts stay in encounter order
    findings.sort_by(|a, b| b.distinct_originators.cmp(&a.distinct_originators));

    Aggregation {
        findings,
        anomalies,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(id: &str, username: &str) -> UserRecord {
        UserRecord {
            created_at: None,
            id: id.to_string(),
            name: None,
            username: username.to_string(),
        }
    }

    fn follow(id: &str, username: &str, originator: &str) -> NewFollow {
        NewFollow {
            target: target(id, username),
            originator: originator.to_string(),
        }
    }

    #[test]
    fn test_collect_new_follows_tags_originators() {
        let alice_added = vec![target("99", "x"), target("7", "y")];
        let bob_added = vec![target("99", "x")];

        let follows = collect_new_follows([
            ("alice", alice_added.as_slice()),
            ("bob", bob_added.as_slice()),
        ]);

        assert_eq!(
            follows,
            vec![
                follow("99", "x", "alice"),
                follow("7", "y", "alice"),
                follow("99", "x", "bob"),
            ]
        );
    }

    #[test]
    fn test_two_originators_trend_single_does_not() {
        let follows = vec![
            follow("99", "x", "alice"),
            follow("7", "y", "alice"),
            follow("99", "x", "bob"),
        ];

        let aggregation = rank(&follows, 2);
        assert!(aggregation.anomalies.is_empty());
        assert_eq!(aggregation.findings.len(), 1);

        let finding = &aggregation.findings[0];
        assert_eq!(finding.target.id, "99");
        assert_eq!(finding.target.username, "x");
        assert_eq!(finding.originators, vec!["alice", "bob"]);
        assert_eq!(finding.distinct_originators, 2);
    }

    #[test]
    fn test_ranked_by_descending_count_with_stable_ties() {
        let follows = vec![
            follow("1", "first", "a"),
            follow("2", "second", "a"),
            follow("3", "third", "a"),
            follow("1", "first", "b"),
            follow("2", "second", "b"),
            follow("3", "third", "b"),
            follow("3", "third", "c"),
        ];

        let findings = rank(&follows, 2).findings;
        let order: Vec<&str> = findings.iter().map(|f| f.target.id.as_str()).collect();
        assert_eq!(order, vec!["3", "1", "2"]);
        assert_eq!(findings[0].distinct_originators, 3);
    }

    #[test]
    fn test_count_is_distinct_but_originators_are_verbatim() {
        let follows = vec![
            follow("5", "t", "alice"),
            follow("5", "t", "alice"),
            follow("6", "u", "alice"),
            follow("6", "u", "bob"),
        ];

        let findings = rank(&follows, 2).findings;
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].target.id, "6");

        let repeated = rank(&follows, 1).findings;
        let five = repeated.iter().find(|f| f.target.id == "5").unwrap();
        assert_eq!(five.distinct_originators, 1);
        assert_eq!(five.originators, vec!["alice", "alice"]);
    }

    #[test]
    fn test_grouped_by_id_not_handle() {
        // Same account renamed between two originators' snapshots
        let follows = vec![follow("42", "old_name", "alice"), follow("42", "new_name", "bob")];

        let findings = rank(&follows, 2).findings;
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].target.username, "old_name");
    }

    #[test]
    fn test_anomalies_are_excluded_and_reported() {
        let follows = vec![
            follow("99", "x", "alice"),
            follow("", "ghost", "bob"),
            follow("99", "", "carol"),
            follow("99", "x", ""),
            follow("99", "x", "dave"),
        ];

        let aggregation = rank(&follows, 2);
        assert_eq!(aggregation.anomalies.len(), 3);
        assert_eq!(aggregation.findings.len(), 1);
        assert_eq!(aggregation.findings[0].originators, vec!["alice", "dave"]);
    }

    #[test]
    fn test_threshold_property() {
        for originators in 1..=5usize {
            let follows: Vec<NewFollow> = (0..originators)
                .map(|i| follow("99", "x", &format!("member{i}")))
                .collect();
            let findings = rank(&follows, 2).findings;

            if originators == 1 {
                assert!(findings.is_empty());
            } else {
                assert_eq!(findings.len(), 1);
                assert_eq!(findings[0].distinct_originators, originators);
            }
        }
    }

    #[test]
    fn test_empty_input() {
        let aggregation = rank(&[], 2);
        assert_eq!(aggregation, Aggregation::default());
    }
}
