//! Fallback scraping of plain line-reporter output

use once_cell::sync::Lazy;
use regex::Regex;

use crate::state::RunState;
use crate::types::{ResultUpdate, TestStatus};

/// `[project] › path/to/x.spec.ts:12:3 › title`, with the project and
/// position parts optional
const SPEC_AND_TITLE: &str =
    r"(?:\[[^\]]+\]\s+›\s+)?(.+?\.spec\.[cm]?[jt]s)(?::\d+(?::\d+)?)?\s+›\s+(.+?)";

static PROGRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)^\[(\d+)/(\d+)\]\s+{SPEC_AND_TITLE}$"))
        .expect("valid progress regex")
});

static GLYPH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)^\s*([✓✔✘✗×])\s+(?:\d+\s+)?{SPEC_AND_TITLE}\s+\((\d+(?:\.\d+)?)(ms|s|m)\)\s*$"
    ))
    .expect("valid result glyph regex")
});

static OK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)^\s*(ok|x)\s+\d+\s+{SPEC_AND_TITLE}\s+\((\d+(?:\.\d+)?)(ms|s|m)\)\s*$"
    ))
    .expect("valid ok-line regex")
});

static FAILURE_LIST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)^\s*\d+\)\s+{SPEC_AND_TITLE}\s*─*\s*$"))
        .expect("valid failure list regex")
});

/// Pattern matcher for runs that never emit structured events.
///
/// Rows are keyed `<spec>::<title>` and named `<spec> › <title>`.
#[derive(Debug, Default)]
pub struct LegacyParser;

impl LegacyParser {
    /// Apply a cleaned line. Returns whether any pattern matched.
    pub fn apply(&self, line: &str, state: &mut RunState) -> bool {
        if let Some(caps) = PROGRESS_RE.captures(line) {
            let row = Row::new(&caps[3], &caps[4]);
            state.current_detail = Some(format!("Test {} of {}", &caps[1], &caps[2]));
            state.current_test = Some(row.name.clone());
            state.upsert_result(ResultUpdate::new(row.key, TestStatus::Running).test(row.name));
            return true;
        }

        if let Some(caps) = GLYPH_RE.captures(line) {
            let status = match &caps[1] {
                "✓" | "✔" => TestStatus::Passed,
                _ => TestStatus::Failed,
            };
            let row = Row::new(&caps[2], &caps[3]);
            let duration = parse_duration(&caps[4], &caps[5]);
            finish_row(state, row, status, duration);
            return true;
        }

        if let Some(caps) = OK_RE.captures(line) {
            let status = if caps[1].eq_ignore_ascii_case("ok") {
                TestStatus::Passed
            } else {
                TestStatus::Failed
            };
            let row = Row::new(&caps[2], &caps[3]);
            let duration = parse_duration(&caps[4], &caps[5]);
            finish_row(state, row, status, duration);
            return true;
        }

        if let Some(caps) = FAILURE_LIST_RE.captures(line) {
            let row = Row::new(&caps[1], &caps[2]);
            state.upsert_result(ResultUpdate::new(row.key, TestStatus::Failed).test(row.name));
            return true;
        }

        false
    }
}

struct Row {
    key: String,
    name: String,
}

impl Row {
    fn new(spec: &str, title: &str) -> Self {
        let spec = spec.trim().replace('\\', "/");
        let title = title.trim();
        Self {
            key: format!("{spec}::{title}"),
            name: format!("{spec} › {title}"),
        }
    }
}

fn finish_row(state: &mut RunState, row: Row, status: TestStatus, duration_ms: Option<u64>) {
    if state.current_test.as_deref() == Some(row.name.as_str()) {
        state.clear_current();
    }
    state.upsert_result(
        ResultUpdate::new(row.key, status)
            .duration(duration_ms)
            .test(row.name),
    );
}

fn parse_duration(amount: &str, unit: &str) -> Option<u64> {
    let amount: f64 = amount.parse().ok()?;
    let ms = match unit.to_ascii_lowercase().as_str() {
        "ms" => amount,
        "s" => amount * 1_000.0,
        "m" => amount * 60_000.0,
        _ => return None,
    };
    Some(ms.round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "tests/login.spec.ts::signs in";

    #[test]
    fn test_progress_line_marks_running() {
        let mut state = RunState::idle("example.com");
        assert!(LegacyParser.apply(
            "[3/7] [chromium] › tests/login.spec.ts:14:5 › signs in",
            &mut state
        ));

        let row = state.result(KEY).unwrap();
        assert_eq!(row.status, TestStatus::Running);
        assert_eq!(row.test, "tests/login.spec.ts › signs in");
        assert_eq!(state.current_test.as_deref(), Some("tests/login.spec.ts › signs in"));
        assert_eq!(state.current_detail.as_deref(), Some("Test 3 of 7"));
    }

    #[test]
    fn test_glyph_lines() {
        let mut state = RunState::idle("example.com");
        LegacyParser.apply("[1/1] tests/login.spec.ts:14:5 › signs in", &mut state);
        assert!(LegacyParser.apply(
            "  ✓  1 [chromium] › tests/login.spec.ts:14:5 › signs in (1.5s)",
            &mut state
        ));

        let row = state.result(KEY).unwrap();
        assert_eq!(row.status, TestStatus::Passed);
        assert_eq!(row.duration_ms, Some(1500));
        assert!(state.current_test.is_none());

        LegacyParser.apply("  ✘  2 tests/cart.spec.js › adds item (250ms)", &mut state);
        let row = state.result("tests/cart.spec.js::adds item").unwrap();
        assert_eq!(row.status, TestStatus::Failed);
        assert_eq!(row.duration_ms, Some(250));
    }

    #[test]
    fn test_ok_lines() {
        let mut state = RunState::idle("example.com");
        LegacyParser.apply("ok 1 tests/login.spec.ts:14:5 › signs in (2m)", &mut state);
        let row = state.result(KEY).unwrap();
        assert_eq!(row.status, TestStatus::Passed);
        assert_eq!(row.duration_ms, Some(120_000));

        LegacyParser.apply("x 2 [firefox] › tests/login.spec.ts › signs in (3ms)", &mut state);
        let row = state.result(KEY).unwrap();
        assert_eq!(row.status, TestStatus::Failed);
        assert_eq!(row.duration_ms, Some(3));
    }

    #[test]
    fn test_failure_list_line() {
        let mut state = RunState::idle("example.com");
        assert!(LegacyParser.apply(
            "  1) [chromium] › tests/login.spec.ts:14:5 › signs in ──────────────",
            &mut state
        ));
        assert_eq!(state.result(KEY).unwrap().status, TestStatus::Failed);
    }

    #[test]
    fn test_unrelated_lines_do_nothing() {
        let mut state = RunState::idle("example.com");
        for line in [
            "Running 7 tests using 1 worker",
            "  7 passed (12.3s)",
            "[runner] Base URL: https://example.com/",
        ] {
            assert!(!LegacyParser.apply(line, &mut state), "{line}");
        }
        assert!(state.test_results.is_empty());
    }
}
