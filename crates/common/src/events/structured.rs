//! `[E2E_EVENT] {json}` lifecycle events

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;

use super::spec_prefix;
use crate::state::RunState;
use crate::types::{ResultUpdate, TestStatus, SELF_CHILD_ID};

static MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[E2E_EVENT\]\s+(.+)$").expect("valid event marker regex"));

/// A decoded lifecycle event
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    TestStart {
        test: String,
    },
    Step {
        test: String,
        detail: Option<String>,
    },
    SubtestStart {
        test: String,
        subtest_id: String,
        subtest_name: Option<String>,
    },
    SubtestEnd {
        test: String,
        subtest_id: String,
        status: Option<String>,
        duration_ms: Option<u64>,
        error: Option<String>,
    },
    TestEnd {
        test: String,
        status: Option<String>,
        duration_ms: Option<u64>,
        error: Option<String>,
    },
}

impl Event {
    /// Decode a JSON payload.
    ///
    /// Returns `None` for malformed JSON, a missing or unknown `type`, or a
    /// missing required field. Optional fields of the wrong JSON type are
    /// treated as absent.
    pub fn parse(payload: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(payload).ok()?;
        let kind = value.get("type").and_then(Value::as_str)?;
        let test = text(&value, "test");

        let event = match kind {
            "test_start" => Event::TestStart { test: test? },
            "step" => Event::Step {
                test: test?,
                detail: text(&value, "detail"),
            },
            "subtest_start" => Event::SubtestStart {
                test: test?,
                subtest_id: text(&value, "subtestId")?,
                subtest_name: text(&value, "subtestName"),
            },
            "subtest_end" => Event::SubtestEnd {
                test: test?,
                subtest_id: text(&value, "subtestId")?,
                status: text(&value, "status"),
                duration_ms: millis(&value),
                error: text(&value, "error"),
            },
            "test_end" => Event::TestEnd {
                test: test?,
                status: text(&value, "status"),
                duration_ms: millis(&value),
                error: text(&value, "error"),
            },
            _ => return None,
        };
        Some(event)
    }
}

/// Non-empty string field
fn text(value: &Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn millis(value: &Value) -> Option<u64> {
    value
        .get("durationMs")
        .and_then(Value::as_f64)
        .filter(|ms| ms.is_finite() && *ms >= 0.0)
        .map(|ms| ms.round() as u64)
}

/// Applies structured events, timing subtests between start and end.
#[derive(Debug, Default)]
pub struct StructuredParser {
    timers: HashMap<String, Instant>,
}

impl StructuredParser {
    /// The JSON text after the marker, if the line carries one
    pub fn payload(line: &str) -> Option<&str> {
        MARKER_RE
            .captures(line)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }

    pub fn reset(&mut self) {
        self.timers.clear();
    }

    pub fn apply(&mut self, event: Event, state: &mut RunState) {
        match event {
            Event::TestStart { test } => {
                let prefix = spec_prefix(&test);
                state.current_test = Some(test.clone());
                state.current_detail = Some("Starting test".to_string());
                if !state.has_planned_subtests(&prefix) {
                    state.upsert_result(
                        ResultUpdate::new(self_key(&prefix), TestStatus::Running).test(test),
                    );
                }
            }

            Event::Step { test, detail } => {
                if state.current_test.is_none() {
                    state.current_test = Some(test);
                }
                state.current_detail = detail;
            }

            Event::SubtestStart {
                test,
                subtest_id,
                subtest_name,
            } => {
                let key = format!("{}::{}", spec_prefix(&test), subtest_id);
                let label = subtest_name.unwrap_or(subtest_id);
                state.current_detail = Some(format!("Running {label}"));
                state.current_test = Some(label);
                self.timers.insert(key.clone(), Instant::now());
                state.upsert_result(ResultUpdate::new(key, TestStatus::Running));
            }

            Event::SubtestEnd {
                test,
                subtest_id,
                status,
                duration_ms,
                error,
            } => {
                let key = format!("{}::{}", spec_prefix(&test), subtest_id);
                let elapsed = self
                    .timers
                    .remove(&key)
                    .map(|started| started.elapsed().as_millis() as u64);
                state.upsert_result(
                    ResultUpdate::new(key, TestStatus::from_reported(status.as_deref()))
                        .duration(duration_ms.or(elapsed))
                        .error(error),
                );
            }

            Event::TestEnd {
                test,
                status,
                duration_ms,
                error,
            } => {
                let outcome = TestStatus::from_reported(status.as_deref());
                let prefix = spec_prefix(&test);
                if state.has_planned_subtests(&prefix) {
                    state.settle_subtests(&prefix, outcome, error.as_deref());
                } else {
                    state.upsert_result(
                        ResultUpdate::new(self_key(&prefix), outcome)
                            .duration(duration_ms)
                            .error(error)
                            .test(test.clone()),
                    );
                }
                if state.current_test.as_deref() == Some(test.as_str()) {
                    state.clear_current();
                }
            }
        }
    }
}

fn self_key(prefix: &str) -> String {
    format!("{prefix}::{SELF_CHILD_ID}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PlannedResult;

    const TEST: &str = "tests/a.spec.js :: flow";

    fn apply(parser: &mut StructuredParser, state: &mut RunState, json: &str) {
        if let Some(event) = Event::parse(json) {
            parser.apply(event, state);
        }
    }

    fn seeded(keys: &[&str]) -> RunState {
        let mut state = RunState::idle("example.com");
        for key in keys {
            state.upsert_result(ResultUpdate::new(*key, TestStatus::Pending));
        }
        state
    }

    #[test]
    fn test_payload_extraction() {
        assert_eq!(
            StructuredParser::payload("noise [E2E_EVENT]   {\"type\":\"step\"}"),
            Some("{\"type\":\"step\"}")
        );
        assert_eq!(StructuredParser::payload("[E2E_EVENT]"), None);
        assert_eq!(StructuredParser::payload("plain output"), None);
    }

    #[test]
    fn test_parse_rejects_incomplete_events() {
        assert_eq!(Event::parse("{broken"), None);
        assert_eq!(Event::parse(r#"{"test":"x"}"#), None);
        assert_eq!(Event::parse(r#"{"type":"mystery","test":"x"}"#), None);
        assert_eq!(Event::parse(r#"{"type":"subtest_start","test":"x"}"#), None);
        assert_eq!(Event::parse(r#"{"type":"test_start","test":""}"#), None);
    }

    #[test]
    fn test_parse_tolerates_wrong_optional_types() {
        let event = Event::parse(
            r#"{"type":"test_end","test":"x","status":"passed","durationMs":"12","error":42}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            Event::TestEnd {
                test: "x".to_string(),
                status: Some("passed".to_string()),
                duration_ms: None,
                error: None,
            }
        );
    }

    #[test]
    fn test_test_start_and_step() {
        let mut parser = StructuredParser::default();
        let mut state = RunState::idle("example.com");

        apply(&mut parser, &mut state, r#"{"type":"step","test":"x","detail":"warming up"}"#);
        assert_eq!(state.current_test.as_deref(), Some("x"));
        assert_eq!(state.current_detail.as_deref(), Some("warming up"));

        apply(&mut parser, &mut state, &format!(r#"{{"type":"test_start","test":"{TEST}"}}"#));
        assert_eq!(state.current_test.as_deref(), Some(TEST));
        assert_eq!(state.current_detail.as_deref(), Some("Starting test"));
        let row = state.result("tests/a.spec.js::__self").unwrap();
        assert_eq!(row.status, TestStatus::Running);
        assert_eq!(row.test, TEST);

        apply(&mut parser, &mut state, &format!(r#"{{"type":"step","test":"{TEST}"}}"#));
        assert_eq!(state.current_test.as_deref(), Some(TEST));
        assert_eq!(state.current_detail, None);
    }

    #[test]
    fn test_test_start_skips_self_row_when_subtests_planned() {
        let mut parser = StructuredParser::default();
        let mut state = seeded(&["tests/a.spec.js::login"]);

        apply(&mut parser, &mut state, &format!(r#"{{"type":"test_start","test":"{TEST}"}}"#));
        assert!(state.result("tests/a.spec.js::__self").is_none());
        assert_eq!(state.test_results.len(), 1);
    }

    #[test]
    fn test_subtest_timer_supplies_duration() {
        let mut parser = StructuredParser::default();
        let mut state = RunState::idle("example.com");

        apply(
            &mut parser,
            &mut state,
            &format!(r#"{{"type":"subtest_start","test":"{TEST}","subtestId":"login","subtestName":"Log in"}}"#),
        );
        assert_eq!(state.current_test.as_deref(), Some("Log in"));
        assert_eq!(state.current_detail.as_deref(), Some("Running Log in"));
        assert_eq!(
            state.result("tests/a.spec.js::login").unwrap().status,
            TestStatus::Running
        );

        apply(
            &mut parser,
            &mut state,
            &format!(r#"{{"type":"subtest_end","test":"{TEST}","subtestId":"login","status":"passed"}}"#),
        );
        let row = state.result("tests/a.spec.js::login").unwrap();
        assert_eq!(row.status, TestStatus::Passed);
        assert!(row.duration_ms.is_some());
        assert!(parser.timers.is_empty());
    }

    #[test]
    fn test_subtest_end_without_start_has_no_duration() {
        let mut parser = StructuredParser::default();
        let mut state = RunState::idle("example.com");

        apply(
            &mut parser,
            &mut state,
            &format!(r#"{{"type":"subtest_end","test":"{TEST}","subtestId":"x","status":"skipped"}}"#),
        );
        let row = state.result("tests/a.spec.js::x").unwrap();
        assert_eq!(row.status, TestStatus::Canceled);
        assert_eq!(row.duration_ms, None);

        apply(
            &mut parser,
            &mut state,
            &format!(r#"{{"type":"subtest_end","test":"{TEST}","subtestId":"x","status":"timedOut","durationMs":40.4,"error":"late"}}"#),
        );
        let row = state.result("tests/a.spec.js::x").unwrap();
        assert_eq!(row.status, TestStatus::Failed);
        assert_eq!(row.duration_ms, Some(40));
        assert_eq!(row.error.as_deref(), Some("late"));
    }

    #[test]
    fn test_failed_test_end_settles_subtests() {
        let mut parser = StructuredParser::default();
        let mut state = seeded(&[
            "tests/a.spec.js::one",
            "tests/a.spec.js::two",
            "tests/a.spec.js::three",
        ]);
        state.upsert_result(ResultUpdate::new("tests/a.spec.js::one", TestStatus::Passed));
        state.upsert_result(ResultUpdate::new("tests/a.spec.js::two", TestStatus::Running));
        state.current_test = Some(TEST.to_string());

        let end = format!(r#"{{"type":"test_end","test":"{TEST}","status":"failed","error":"boom"}}"#);
        apply(&mut parser, &mut state, &end);

        let status = |key: &str| state.result(key).unwrap().status;
        assert_eq!(status("tests/a.spec.js::one"), TestStatus::Passed);
        assert_eq!(status("tests/a.spec.js::two"), TestStatus::Failed);
        assert_eq!(status("tests/a.spec.js::three"), TestStatus::Canceled);
        assert_eq!(
            state.result("tests/a.spec.js::two").unwrap().error.as_deref(),
            Some("boom")
        );
        assert!(state.result("tests/a.spec.js::__self").is_none());
        assert!(state.current_test.is_none());

        let before: Vec<_> = state
            .test_results
            .iter()
            .map(|r| (r.key.clone(), r.status, r.error.clone()))
            .collect();
        apply(&mut parser, &mut state, &end);
        let after: Vec<_> = state
            .test_results
            .iter()
            .map(|r| (r.key.clone(), r.status, r.error.clone()))
            .collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_passed_test_end_promotes_unfinished_subtests() {
        let mut parser = StructuredParser::default();
        let mut state = RunState::started(&crate::types::RunPlan {
            specs: vec![],
            task_ids: vec![],
            planned_results: vec![
                PlannedResult {
                    key: "tests/a.spec.js::one".to_string(),
                    test: "A > one".to_string(),
                    parent: true,
                },
                PlannedResult {
                    key: "tests/a.spec.js::two".to_string(),
                    test: "A > two".to_string(),
                    parent: true,
                },
            ],
            base_domain: "example.com".to_string(),
        });
        state.upsert_result(ResultUpdate::new("tests/a.spec.js::two", TestStatus::Failed));

        apply(
            &mut parser,
            &mut state,
            &format!(r#"{{"type":"test_end","test":"{TEST}","status":"passed"}}"#),
        );
        assert_eq!(
            state.result("tests/a.spec.js::one").unwrap().status,
            TestStatus::Passed
        );
        assert_eq!(
            state.result("tests/a.spec.js::two").unwrap().status,
            TestStatus::Failed
        );
        assert_eq!(state.result("tests/a.spec.js::one").unwrap().test, "A > one");
    }

    #[test]
    fn test_test_end_without_spec_path_uses_raw_key() {
        let mut parser = StructuredParser::default();
        let mut state = RunState::idle("example.com");

        apply(
            &mut parser,
            &mut state,
            r#"{"type":"test_end","test":"smoke","status":"passed","durationMs":5}"#,
        );
        let row = state.result("smoke::__self").unwrap();
        assert_eq!(row.status, TestStatus::Passed);
        assert_eq!(row.duration_ms, Some(5));
    }
}
