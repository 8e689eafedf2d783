use crate::aggregator::Finding;
use crate::summary::RunSummary;
use chrono::NaiveDate;
use clap::ValueEnum;
use serde::Serialize;
use std::fmt::{self, Write};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

/// Everything a run produced
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub date: NaiveDate,
    pub window_days: u32,
    /// `None` when the run did not compare snapshots
    pub findings: Option<Vec<Finding>>,
    pub summary: RunSummary,
}

#[derive(Serialize)]
struct JsonFinding<'a> {
    id: &'a str,
    username: &'a str,
    count: usize,
    originators: &'a [String],
}

#[derive(Serialize)]
struct JsonReport<'a> {
    date: String,
    window_days: u32,
    findings: Option<Vec<JsonFinding<'a>>>,
    summary: &'a RunSummary,
}

pub fn render(outcome: &RunOutcome, format: ReportFormat) -> Result<String, serde_json::Error> {
    match format {
        ReportFormat::Text => Ok(render_text(outcome)),
        ReportFormat::Json => render_json(outcome),
    }
}

pub fn render_json(outcome: &RunOutcome) -> Result<String, serde_json::Error> {
    let findings = outcome.findings.as_ref().map(|findings| {
        findings
            .iter()
            .map(|finding| JsonFinding {
                id: &finding.target.id,
                username: &finding.target.username,
                count: finding.distinct_originators,
                originators: &finding.originators,
            })
            .collect()
    });

    serde_json::to_string_pretty(&JsonReport {
        date: outcome.date.format("%Y-%m-%d").to_string(),
        window_days: outcome.window_days,
        findings,
        summary: &outcome.summary,
    })
}

pub fn render_text(outcome: &RunOutcome) -> String {
    let mut out = String::new();
    // Writing to a String cannot fail
    let _ = write_text(&mut out, outcome);
    out
}

fn write_text(out: &mut String, outcome: &RunOutcome) -> fmt::Result {
    let rule = "#".repeat(60);

    if let Some(findings) = &outcome.findings {
        writeln!(out, "{rule}")?;
        writeln!(
            out,
            "Trending follows for {} (window: {} day(s))\n",
            outcome.date.format("%Y-%m-%d"),
            outcome.window_days
        )?;

        if findings.is_empty() {
            writeln!(out, "No account was newly followed by more than one member.\n")?;
        }

        for finding in findings {
            writeln!(
                out,
                "{} x {}:",
                finding.target.username, finding.distinct_originators
            )?;
            writeln!(out, "{}\n", finding.originators.join(", "))?;
        }
    }

    write_summary(out, &outcome.summary, &rule)
}

fn write_summary(out: &mut String, summary: &RunSummary, rule: &str) -> fmt::Result {
    writeln!(out, "{rule}")?;
    writeln!(out, "Members on list:       {}", summary.members)?;
    writeln!(out, "Snapshots saved:       {}", summary.snapshots_saved)?;
    writeln!(
        out,
        "Upstream calls:        {} (estimated {})",
        summary.actual_calls, summary.estimated_calls
    )?;
    writeln!(out, "Cooldowns:             {}", summary.cooldowns)?;
    writeln!(out, "With new follows:      {}", summary.with_new_follows)?;
    writeln!(out, "Without new follows:   {}", summary.unchanged)?;

    let handle_lines = [
        ("No baseline:          ", &summary.no_baseline),
        ("No current snapshot:  ", &summary.missing_current),
        ("Unreadable snapshots: ", &summary.corrupt_snapshots),
    ];
    for (label, handles) in handle_lines {
        if !handles.is_empty() {
            writeln!(out, "{label} {}", handles.join(", "))?;
        }
    }

    if summary.anomalies > 0 {
        writeln!(out, "Skipped records:       {}", summary.anomalies)?;
    }
    for failure in &summary.collection_failures {
        writeln!(out, "FAILED {}: {}", failure.username, failure.reason)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::twitter::Account;

    fn outcome(findings: Option<Vec<Finding>>) -> RunOutcome {
        RunOutcome {
            date: "2024-05-01".parse().unwrap(),
            window_days: 1,
            findings,
            summary: RunSummary {
                members: 3,
                snapshots_saved: 3,
                ..RunSummary::default()
            },
        }
    }

    fn finding() -> Finding {
        Finding {
            target: Account {
                id: "99".to_string(),
                username: "x".to_string(),
            },
            originators: vec!["alice".to_string(), "bob".to_string()],
            distinct_originators: 2,
        }
    }

    #[test]
    fn test_text_report_lists_findings() {
        let text = render_text(&outcome(Some(vec![finding()])));
        assert!(text.starts_with(&"#".repeat(60)));
        assert!(text.contains("Trending follows for 2024-05-01"));
        assert!(text.contains("x x 2:\nalice, bob\n"));
        assert!(text.contains("Members on list:       3"));
    }

    #[test]
    fn test_text_report_without_findings() {
        let text = render_text(&outcome(Some(Vec::new())));
        assert!(text.contains("No account was newly followed"));
    }

    #[test]
    fn test_collect_only_report_has_no_findings_section() {
        let mut collected = outcome(None);
        collected.summary.record_failure("dave", "HTTP 503");
        let text = render_text(&collected);
        assert!(!text.contains("Trending follows"));
        assert!(text.contains("FAILED dave: HTTP 503"));
    }

    #[test]
    fn test_text_report_lists_skipped_members() {
        let mut partial = outcome(Some(Vec::new()));
        partial.summary.no_baseline = vec!["carol".to_string()];
        partial.summary.missing_current = vec!["dave".to_string(), "erin".to_string()];
        partial.summary.anomalies = 2;

        let text = render_text(&partial);
        assert!(text.contains("No baseline:           carol\n"));
        assert!(text.contains("No current snapshot:   dave, erin\n"));
        assert!(!text.contains("Unreadable snapshots"));
        assert!(text.contains("Skipped records:       2\n"));
    }

    #[test]
    fn test_json_report() {
        let json = render(&outcome(Some(vec![finding()])), ReportFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["date"], "2024-05-01");
        assert_eq!(value["findings"][0]["id"], "99");
        assert_eq!(value["findings"][0]["count"], 2);
        assert_eq!(value["findings"][0]["originators"][1], "bob");
        assert_eq!(value["summary"]["members"], 3);
    }
}
