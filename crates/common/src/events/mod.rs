//! Child output interpretation
//!
//! Two strategies are composed in order: [`StructuredParser`] handles
//! `[E2E_EVENT] {json}` lines; [`LegacyParser`] scrapes plain reporter text.
//! Once a structured marker has been seen the legacy strategy is latched off
//! for the rest of the run.

mod legacy;
mod structured;

pub use legacy::LegacyParser;
pub use structured::{Event, StructuredParser};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::lines::clean_line;
use crate::state::RunState;

static SPEC_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)tests[\\/].+?\.spec\.[jt]s").expect("valid spec id regex"));

/// Extract `tests/.../*.spec.{js,ts}` from a free-form test identifier,
/// normalizing backslashes to forward slashes.
pub fn extract_spec_id(raw_test: &str) -> Option<String> {
    SPEC_ID_RE
        .find(raw_test)
        .map(|m| m.as_str().replace('\\', "/"))
}

/// Key prefix for rows belonging to a test: its spec id, or the raw string
pub(crate) fn spec_prefix(raw_test: &str) -> String {
    extract_spec_id(raw_test).unwrap_or_else(|| raw_test.to_string())
}

/// Per-run output parser
#[derive(Debug, Default)]
pub struct OutputParser {
    structured: StructuredParser,
    legacy: LegacyParser,
    structured_seen: bool,
}

impl OutputParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget timers and the structured latch before a new run.
    pub fn reset(&mut self) {
        self.structured.reset();
        self.structured_seen = false;
    }

    pub fn structured_seen(&self) -> bool {
        self.structured_seen
    }

    /// Apply one raw output line to `state`. Lines that match nothing are
    /// ignored.
    pub fn handle_line(&mut self, raw: &str, state: &mut RunState) {
        let line = clean_line(raw);
        if line.is_empty() {
            return;
        }

        if let Some(payload) = StructuredParser::payload(&line) {
            self.structured_seen = true;
            if let Some(event) = Event::parse(payload) {
                self.structured.apply(event, state);
            }
            return;
        }

        if !self.structured_seen {
            self.legacy.apply(&line, state);
        }
    }
}
