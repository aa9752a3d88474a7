//! Core types for Specdeck

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::normalize_base_domain;
use crate::Result;

/// Child id used when a spec declares no named subtests.
pub const SELF_CHILD_ID: &str = "__self";

/// Status of a single test or subtest row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Canceled,
}

impl TestStatus {
    /// Map a status reported by the test runner.
    ///
    /// `passed` stays passed, `skipped` becomes canceled, anything else
    /// (including a missing status) counts as a failure.
    pub fn from_reported(status: Option<&str>) -> Self {
        match status {
            Some("passed") => TestStatus::Passed,
            Some("skipped") => TestStatus::Canceled,
            _ => TestStatus::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TestStatus::Passed | TestStatus::Failed | TestStatus::Canceled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TestStatus::Pending => "pending",
            TestStatus::Running => "running",
            TestStatus::Passed => "passed",
            TestStatus::Failed => "failed",
            TestStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the results table, keyed by `spec::child`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub key: String,
    pub test: String,
    pub status: TestStatus,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
    /// Row is a named child of a spec (rendered indented by the dashboard)
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub parent: bool,
}

/// Partial update applied to a result row by key.
///
/// `None` fields keep whatever the row already holds.
#[derive(Debug, Clone, Default)]
pub struct ResultUpdate {
    pub key: String,
    pub status: Option<TestStatus>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
    pub test: Option<String>,
}

impl ResultUpdate {
    pub fn new(key: impl Into<String>, status: TestStatus) -> Self {
        Self {
            key: key.into(),
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn duration(mut self, duration_ms: Option<u64>) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn error(mut self, error: Option<String>) -> Self {
        self.error = error;
        self
    }

    pub fn test(mut self, test: impl Into<String>) -> Self {
        self.test = Some(test.into());
        self
    }
}

/// Origin of a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
    System,
}

impl LogStream {
    pub fn as_str(self) -> &'static str {
        match self {
            LogStream::Stdout => "stdout",
            LogStream::Stderr => "stderr",
            LogStream::System => "system",
        }
    }
}

impl fmt::Display for LogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub ts: DateTime<Utc>,
    pub stream: LogStream,
    pub line: String,
}

/// A selectable child task declared by a spec file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestChild {
    pub id: String,
    pub label: String,
    pub required: bool,
}

/// A spec file found under the tests directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredTest {
    /// Spec path relative to the project root, forward slashes
    pub id: String,
    pub display_name: String,
    pub children: Vec<TestChild>,
}

/// A row the caller expects to see, shown as pending before any event arrives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedResult {
    pub key: String,
    pub test: String,
    #[serde(default)]
    pub parent: bool,
}

/// What the caller asked to run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSelection {
    #[serde(default)]
    pub specs: Vec<String>,
    #[serde(default)]
    pub tasks: Vec<String>,
    #[serde(default)]
    pub planned_results: Vec<PlannedResult>,
    #[serde(default)]
    pub base_domain: Option<String>,
}

/// A validated, normalized selection ready to be started
#[derive(Debug, Clone, PartialEq)]
pub struct RunPlan {
    pub specs: Vec<String>,
    /// Child ids extracted from `spec::child` task keys
    pub task_ids: Vec<String>,
    pub planned_results: Vec<PlannedResult>,
    pub base_domain: String,
}

impl RunPlan {
    /// Normalize a selection: trims identifiers, drops blanks, reduces task
    /// keys to their child id, and validates the base domain.
    pub fn from_selection(selection: RunSelection, default_base_domain: &str) -> Result<Self> {
        let specs = trimmed(selection.specs);
        let task_ids = trimmed(selection.tasks)
            .into_iter()
            .map(|key| match key.split("::").nth(1) {
                Some(child) if !child.is_empty() => child.to_string(),
                _ => key,
            })
            .collect();
        let base_domain =
            normalize_base_domain(selection.base_domain.as_deref(), default_base_domain)?;

        Ok(Self {
            specs,
            task_ids,
            planned_results: selection.planned_results,
            base_domain,
        })
    }

    /// `currentSpec` label: the joined spec list, or `ALL`
    pub fn spec_label(&self) -> String {
        if self.specs.is_empty() {
            "ALL".to_string()
        } else {
            self.specs.join(", ")
        }
    }
}

fn trimmed(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reported_status_mapping() {
        assert_eq!(TestStatus::from_reported(Some("passed")), TestStatus::Passed);
        assert_eq!(TestStatus::from_reported(Some("skipped")), TestStatus::Canceled);
        assert_eq!(TestStatus::from_reported(Some("timedOut")), TestStatus::Failed);
        assert_eq!(TestStatus::from_reported(None), TestStatus::Failed);
    }

    #[test]
    fn test_plan_reduces_task_keys_to_child_ids() {
        let selection = RunSelection {
            specs: vec!["  tests/a.spec.js ".to_string(), "".to_string()],
            tasks: vec![
                "tests/a.spec.js::login".to_string(),
                "plain".to_string(),
                "tests/b.spec.js::".to_string(),
            ],
            planned_results: vec![],
            base_domain: Some("https://example.com/".to_string()),
        };

        let plan = RunPlan::from_selection(selection, "default.test").unwrap();
        assert_eq!(plan.specs, vec!["tests/a.spec.js"]);
        assert_eq!(plan.task_ids, vec!["login", "plain", "tests/b.spec.js::"]);
        assert_eq!(plan.base_domain, "example.com");
        assert_eq!(plan.spec_label(), "tests/a.spec.js");
    }

    #[test]
    fn test_plan_rejects_bad_domain() {
        let selection = RunSelection {
            base_domain: Some("example.com/path".to_string()),
            ..Default::default()
        };
        assert!(RunPlan::from_selection(selection, "default.test").is_err());
    }

    #[test]
    fn test_empty_plan_targets_all() {
        let plan = RunPlan::from_selection(RunSelection::default(), "default.test").unwrap();
        assert_eq!(plan.spec_label(), "ALL");
        assert_eq!(plan.base_domain, "default.test");
    }
}
