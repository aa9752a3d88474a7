//! Run status display

use anyhow::Result;
use serde::Serialize;

use specdeck_common::{RunState, TestResult};

use crate::client::RunnerClient;
use crate::output::{dash, print_fields, print_json, print_list, OutputFormat, TableDisplay};

#[derive(Serialize)]
pub struct ResultDisplay {
    pub test: String,
    pub status: String,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
}

impl From<&TestResult> for ResultDisplay {
    fn from(result: &TestResult) -> Self {
        Self {
            test: if result.parent {
                format!("  ↳ {}", result.test)
            } else {
                result.test.clone()
            },
            status: result.status.to_string(),
            duration_ms: result.duration_ms,
            error: result.error.as_ref().map(|e| first_line(e)),
        }
    }
}

impl TableDisplay for ResultDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Test", "Status", "Duration (ms)", "Error"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.test.clone(),
            self.status.to_uppercase(),
            dash(self.duration_ms),
            self.error.clone().unwrap_or_default(),
        ]
    }
}

fn first_line(text: &str) -> String {
    text.lines().next().unwrap_or_default().to_string()
}

/// Summary fields shown above the results table
pub fn summary(state: &RunState) -> Vec<(&'static str, String)> {
    vec![
        ("Phase", format!("{:?}", state.phase).to_lowercase()),
        ("Spec", dash(state.current_spec.as_ref())),
        ("Base domain", state.base_domain.clone()),
        ("Current test", dash(state.current_test.as_ref())),
        ("Detail", dash(state.current_detail.as_ref())),
        ("Started", dash(state.started_at.map(|t| t.to_rfc3339()))),
        ("Finished", dash(state.finished_at.map(|t| t.to_rfc3339()))),
        ("Exit code", dash(state.exit_code)),
        ("Error", dash(state.last_error.as_ref())),
    ]
}

pub fn print_state(state: &RunState, logs: usize, format: OutputFormat) {
    if let OutputFormat::Json = format {
        print_json(state);
        return;
    }

    print_fields(&summary(state));
    let rows: Vec<ResultDisplay> = state.test_results.iter().map(ResultDisplay::from).collect();
    print_list(&rows, format);

    if logs > 0 {
        let skip = state.logs.len().saturating_sub(logs);
        for entry in state.logs.iter().skip(skip) {
            println!("[{}][{}] {}", entry.ts.format("%H:%M:%S"), entry.stream, entry.line);
        }
    }
}

pub async fn execute(client: &RunnerClient, logs: usize, format: OutputFormat) -> Result<()> {
    let status = client.status().await?;
    print_state(&status.state, logs, format);
    Ok(())
}
