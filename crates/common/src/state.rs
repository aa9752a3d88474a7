//! Run state machine
//!
//! [`RunState`] is the serializable snapshot served by `/status`.
//! [`RunController`] owns it together with the per-run output parser and
//! enforces the phase transitions:
//!
//! ```text
//! Idle ──begin──▶ Running ──finish──▶ Finished(exit code)
//!   ▲                │ ├──stop────▶ Stopped
//!   │                │ └──spawn_failed──▶ Errored
//!   └────clear───────┴── (any terminal phase; begin also restarts)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use tracing::{debug, info};

use crate::events::OutputParser;
use crate::types::{
    LogEntry, LogStream, ResultUpdate, RunPlan, TestResult, TestStatus, SELF_CHILD_ID,
};
use crate::{Error, Result};

/// Maximum number of log lines retained per run
pub const MAX_LOG_LINES: usize = 2000;

/// Exit code recorded when the user stops a run
pub const STOPPED_EXIT_CODE: i32 = 130;

/// Exit code recorded when the child could not be spawned
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 1;

pub const STOPPED_BY_USER: &str = "Run stopped by user";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    Idle,
    Running,
    Finished,
    Stopped,
    Errored,
}

/// Snapshot of the current or most recent run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub running: bool,
    pub phase: RunPhase,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub last_error: Option<String>,
    pub current_spec: Option<String>,
    pub selected_specs: Vec<String>,
    pub selected_tasks: Vec<String>,
    pub current_test: Option<String>,
    pub current_detail: Option<String>,
    pub base_domain: String,
    pub test_results: Vec<TestResult>,
    pub logs: VecDeque<LogEntry>,
}

impl RunState {
    /// Fresh state with nothing run yet
    pub fn idle(base_domain: impl Into<String>) -> Self {
        Self {
            running: false,
            phase: RunPhase::Idle,
            started_at: None,
            finished_at: None,
            exit_code: None,
            last_error: None,
            current_spec: None,
            selected_specs: Vec::new(),
            selected_tasks: Vec::new(),
            current_test: None,
            current_detail: None,
            base_domain: base_domain.into(),
            test_results: Vec::new(),
            logs: VecDeque::new(),
        }
    }

    /// Fresh running state, seeded with the plan's rows as `pending`.
    ///
    /// A key planned more than once keeps its first row.
    pub fn started(plan: &RunPlan) -> Self {
        let now = Utc::now();
        let mut seen = HashSet::new();
        let test_results = plan
            .planned_results
            .iter()
            .filter(|row| seen.insert(row.key.as_str()))
            .map(|row| TestResult {
                key: row.key.clone(),
                test: row.test.clone(),
                status: TestStatus::Pending,
                duration_ms: None,
                error: None,
                updated_at: now,
                parent: row.parent,
            })
            .collect();

        Self {
            running: true,
            phase: RunPhase::Running,
            started_at: Some(now),
            current_spec: Some(plan.spec_label()),
            selected_specs: plan.specs.clone(),
            selected_tasks: plan.task_ids.clone(),
            test_results,
            ..Self::idle(plan.base_domain.clone())
        }
    }

    pub fn result(&self, key: &str) -> Option<&TestResult> {
        self.test_results.iter().find(|r| r.key == key)
    }

    /// Insert or merge a result row by key.
    ///
    /// New keys append in encounter order. Existing rows keep their
    /// duration, error, and name unless the update supplies new ones; blank
    /// error strings count as absent.
    pub fn upsert_result(&mut self, update: ResultUpdate) {
        let now = Utc::now();
        let error = update.error.filter(|e| !e.trim().is_empty());

        match self.test_results.iter_mut().find(|r| r.key == update.key) {
            Some(row) => {
                if let Some(status) = update.status {
                    row.status = status;
                }
                if let Some(test) = update.test {
                    row.test = test;
                }
                if update.duration_ms.is_some() {
                    row.duration_ms = update.duration_ms;
                }
                if error.is_some() {
                    row.error = error;
                }
                row.updated_at = now;
            }
            None => {
                self.test_results.push(TestResult {
                    test: update.test.unwrap_or_else(|| update.key.clone()),
                    key: update.key,
                    status: update.status.unwrap_or(TestStatus::Pending),
                    duration_ms: update.duration_ms,
                    error,
                    updated_at: now,
                    parent: false,
                });
            }
        }
    }

    /// Whether any named (non-`__self`) child rows exist under `spec_prefix`
    pub fn has_planned_subtests(&self, spec_prefix: &str) -> bool {
        let prefix = format!("{spec_prefix}::");
        let self_key = format!("{spec_prefix}::{SELF_CHILD_ID}");
        self.test_results
            .iter()
            .any(|r| r.key.starts_with(&prefix) && r.key != self_key)
    }

    /// Resolve unfinished child rows of a spec once its test has ended.
    ///
    /// Rows already in a terminal status are left alone. On failure, rows
    /// that never started become canceled and the in-flight ones fail with
    /// the propagated error; otherwise they adopt the overall status.
    pub fn settle_subtests(&mut self, spec_prefix: &str, outcome: TestStatus, error: Option<&str>) {
        let prefix = format!("{spec_prefix}::");
        let self_key = format!("{spec_prefix}::{SELF_CHILD_ID}");
        let error = error.filter(|e| !e.trim().is_empty());
        let now = Utc::now();

        for row in self
            .test_results
            .iter_mut()
            .filter(|r| r.key.starts_with(&prefix) && r.key != self_key)
        {
            match (row.status, outcome) {
                (TestStatus::Pending, TestStatus::Failed) => {
                    row.status = TestStatus::Canceled;
                }
                (TestStatus::Running, TestStatus::Failed) => {
                    row.status = TestStatus::Failed;
                    if let Some(error) = error {
                        row.error = Some(error.to_string());
                    }
                }
                (TestStatus::Pending | TestStatus::Running, outcome) => {
                    row.status = outcome;
                }
                _ => continue,
            }
            row.updated_at = now;
        }
    }

    /// Force every unfinished row to a terminal status.
    ///
    /// Running rows take `status`; rows that never started are canceled.
    pub fn finalize_unfinished(&mut self, status: TestStatus) {
        let now = Utc::now();
        for row in self.test_results.iter_mut() {
            let next = match row.status {
                TestStatus::Running => status,
                TestStatus::Pending => TestStatus::Canceled,
                _ => continue,
            };
            row.status = next;
            row.updated_at = now;
        }
    }

    /// Append a line, evicting the oldest entries past [`MAX_LOG_LINES`].
    pub fn append_log(&mut self, stream: LogStream, line: impl Into<String>) {
        self.logs.push_back(LogEntry {
            ts: Utc::now(),
            stream,
            line: line.into(),
        });
        while self.logs.len() > MAX_LOG_LINES {
            self.logs.pop_front();
        }
    }

    pub fn clear_current(&mut self) {
        self.current_test = None;
        self.current_detail = None;
    }
}

/// Owns the run state and serializes every transition on it.
///
/// `begin` and `clear` bump a generation number; output and exit notifications
/// tagged with an older generation are dropped.
#[derive(Debug)]
pub struct RunController {
    state: RunState,
    parser: OutputParser,
    generation: u64,
    default_base_domain: String,
}

impl RunController {
    pub fn new(default_base_domain: impl Into<String>) -> Self {
        let default_base_domain = default_base_domain.into();
        Self {
            state: RunState::idle(default_base_domain.clone()),
            parser: OutputParser::new(),
            generation: 0,
            default_base_domain,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.running
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn phase(&self) -> RunPhase {
        self.state.phase
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn snapshot(&self) -> RunState {
        self.state.clone()
    }

    /// Replace the state with a fresh running run.
    pub fn begin(&mut self, plan: &RunPlan) -> Result<u64> {
        if self.state.running {
            return Err(Error::Conflict("A run is already in progress.".to_string()));
        }

        self.generation += 1;
        self.state = RunState::started(plan);
        self.parser.reset();
        debug!(generation = self.generation, "run state reset for new run");
        Ok(self.generation)
    }

    /// Record one line of child output and feed it to the parser.
    ///
    /// Lines after the run was finalized are logged but not interpreted.
    pub fn ingest(&mut self, generation: u64, stream: LogStream, raw_line: &str) {
        if generation != self.generation {
            return;
        }

        let logged = crate::lines::strip_ansi(raw_line);
        let logged = logged.strip_suffix('\r').unwrap_or(&logged).to_string();
        self.state.append_log(stream, logged);

        if self.state.running {
            self.parser.handle_line(raw_line, &mut self.state);
        }
    }

    /// Append a runner-originated log line.
    pub fn system_log(&mut self, generation: u64, line: impl Into<String>) {
        if generation == self.generation {
            self.state.append_log(LogStream::System, line);
        }
    }

    /// The child exited. `exit_code` is `None` when it was killed by a signal.
    pub fn finish(&mut self, generation: u64, exit_code: Option<i32>) {
        if generation != self.generation {
            return;
        }

        let code_label = exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());

        match self.state.phase {
            RunPhase::Running => {}
            RunPhase::Stopped => {
                // Stop already finalized the run; keep its outcome.
                self.state.append_log(
                    LogStream::System,
                    format!("[runner] Process exited after stop (exit code: {code_label})"),
                );
                return;
            }
            _ => return,
        }

        self.state.running = false;
        self.state.phase = RunPhase::Finished;
        self.state.finished_at = Some(Utc::now());
        self.state.exit_code = exit_code;
        self.state.clear_current();
        self.parser.reset();

        let outcome = if exit_code == Some(0) {
            TestStatus::Passed
        } else {
            TestStatus::Failed
        };
        self.state.finalize_unfinished(outcome);
        self.state.append_log(
            LogStream::System,
            format!("[runner] Run finished with exit code: {code_label}"),
        );
        info!(generation, exit_code = ?exit_code, "run finished");
    }

    /// The child could not be started.
    pub fn spawn_failed(&mut self, generation: u64, error: &Error) {
        if generation != self.generation || self.state.phase != RunPhase::Running {
            return;
        }

        self.state.running = false;
        self.state.phase = RunPhase::Errored;
        self.state.finished_at = Some(Utc::now());
        self.state.exit_code = Some(SPAWN_FAILURE_EXIT_CODE);
        let message = error.to_string();
        self.state.last_error = Some(message.clone());
        self.state.clear_current();
        self.parser.reset();
        self.state.finalize_unfinished(TestStatus::Failed);
        self.state.append_log(
            LogStream::System,
            format!("[runner] {message}"),
        );
    }

    /// Finalize the active run as stopped by the user.
    ///
    /// Returns the generation that was stopped so the caller can signal the
    /// matching child.
    pub fn stop(&mut self) -> Result<u64> {
        if !self.state.running {
            return Err(Error::Conflict("No run is currently active.".to_string()));
        }

        self.state.running = false;
        self.state.phase = RunPhase::Stopped;
        self.state.finished_at = Some(Utc::now());
        self.state.exit_code = Some(STOPPED_EXIT_CODE);
        self.state.last_error = Some(STOPPED_BY_USER.to_string());
        self.state.clear_current();
        self.parser.reset();
        self.state.finalize_unfinished(TestStatus::Canceled);
        self.state
            .append_log(LogStream::System, format!("[runner] {STOPPED_BY_USER}"));
        Ok(self.generation)
    }

    /// Return to a fresh idle state. Rejected while a run is active.
    pub fn clear(&mut self) -> Result<()> {
        if self.state.running {
            return Err(Error::Conflict(
                "Cannot clear while a run is active. Stop it first.".to_string(),
            ));
        }

        // Late output from a stopped child must not land in the fresh state.
        self.generation += 1;
        self.state = RunState::idle(self.default_base_domain.clone());
        self.parser.reset();
        Ok(())
    }
}
