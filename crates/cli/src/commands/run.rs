//! Run control: trigger, stop, clear, wait

use anyhow::{anyhow, bail, Result};
use clap::Args;
use std::time::{Duration, Instant};
use tracing::debug;

use specdeck_common::{PlannedResult, RunPhase, RunState, TestStatus, SELF_CHILD_ID};

use crate::client::{RunnerClient, TriggerRequest};
use crate::commands::status::print_state;
use crate::output::{print_json, print_message, print_success, OutputFormat};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Args)]
pub struct TriggerArgs {
    /// Spec to run (repeatable); all specs when omitted
    #[arg(short, long = "spec")]
    pub specs: Vec<String>,

    /// Task to select, as `spec::child` (repeatable)
    #[arg(short, long = "task")]
    pub tasks: Vec<String>,

    /// Target host, e.g. staging.example.com
    #[arg(short, long)]
    pub base_domain: Option<String>,

    /// Wait for the run to finish
    #[arg(short, long)]
    pub wait: bool,

    /// Give up waiting after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

#[derive(Args)]
pub struct WaitArgs {
    /// Give up after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Trailing log lines to print when the run ends
    #[arg(long, default_value = "0")]
    pub logs: usize,
}

impl TriggerArgs {
    fn request(&self) -> TriggerRequest {
        let mut specs = self.specs.clone();
        for task in &self.tasks {
            if let Some((spec, _)) = task.split_once("::") {
                if !specs.iter().any(|s| s == spec) {
                    specs.push(spec.to_string());
                }
            }
        }

        let planned_results = self
            .tasks
            .iter()
            .map(|task| PlannedResult {
                key: task.clone(),
                test: task.clone(),
                parent: !task.ends_with(&format!("::{SELF_CHILD_ID}")),
            })
            .collect();

        TriggerRequest {
            specs,
            tasks: self.tasks.clone(),
            planned_results,
            base_domain: self.base_domain.clone(),
        }
    }
}

pub async fn trigger(args: TriggerArgs, client: &RunnerClient, format: OutputFormat) -> Result<()> {
    let reply = client.trigger(&args.request()).await?;
    match format {
        OutputFormat::Json => print_json(&reply),
        OutputFormat::Table => print_success(&format!(
            "Run started: {} against {}",
            reply.specs.join(", "),
            reply.base_domain
        )),
    }

    if args.wait {
        wait(
            WaitArgs {
                timeout: args.timeout,
                logs: 0,
            },
            client,
            format,
        )
        .await?;
    }
    Ok(())
}

pub async fn stop(client: &RunnerClient, format: OutputFormat) -> Result<()> {
    let message = client.stop().await?;
    print_message(&message, format);
    Ok(())
}

pub async fn clear(client: &RunnerClient, format: OutputFormat) -> Result<()> {
    let message = client.clear().await?;
    print_message(&message, format);
    Ok(())
}

/// Poll until the run ends; fails unless the run passed.
pub async fn wait(args: WaitArgs, client: &RunnerClient, format: OutputFormat) -> Result<()> {
    let deadline = args.timeout.map(|s| Instant::now() + Duration::from_secs(s));

    let state = loop {
        let status = client.status().await?;
        if !status.state.running {
            break status.state;
        }
        debug!(
            test = ?status.state.current_test,
            detail = ?status.state.current_detail,
            "run in progress"
        );
        if deadline.is_some_and(|d| Instant::now() >= d) {
            bail!("timed out waiting for the run to finish");
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    };

    print_state(&state, args.logs, format);
    outcome(&state)
}

fn outcome(state: &RunState) -> Result<()> {
    match state.phase {
        RunPhase::Idle => bail!("no run has been started"),
        RunPhase::Stopped => bail!("run was stopped"),
        RunPhase::Errored => Err(anyhow!(
            "run failed to start: {}",
            state.last_error.as_deref().unwrap_or("unknown error")
        )),
        RunPhase::Running | RunPhase::Finished => {
            let failed = state
                .test_results
                .iter()
                .filter(|r| r.status == TestStatus::Failed)
                .count();
            if state.exit_code != Some(0) || failed > 0 {
                bail!(
                    "run failed (exit code {}, {} failed)",
                    state
                        .exit_code
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "none".to_string()),
                    failed
                );
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use specdeck_common::ResultUpdate;

    #[test]
    fn test_tasks_imply_specs_and_planned_rows() {
        let args = TriggerArgs {
            specs: vec!["tests/a.spec.js".to_string()],
            tasks: vec![
                "tests/a.spec.js::login".to_string(),
                "tests/b.spec.js::__self".to_string(),
            ],
            base_domain: None,
            wait: false,
            timeout: None,
        };
        let request = args.request();
        assert_eq!(request.specs, vec!["tests/a.spec.js", "tests/b.spec.js"]);
        assert!(request.planned_results[0].parent);
        assert!(!request.planned_results[1].parent);
    }

    #[test]
    fn test_outcome() {
        let mut state = RunState::idle("example.com");
        assert!(outcome(&state).is_err());

        state.phase = RunPhase::Finished;
        state.exit_code = Some(0);
        assert!(outcome(&state).is_ok());

        state.upsert_result(ResultUpdate::new("a::x", TestStatus::Failed));
        assert!(outcome(&state).is_err());

        state.phase = RunPhase::Stopped;
        assert!(outcome(&state).is_err());
    }
}
