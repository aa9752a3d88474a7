//! Credential relay commands

use anyhow::Result;
use clap::Subcommand;

use crate::client::RunnerClient;
use crate::output::{print_message, print_success, OutputFormat};

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Show whether a running test is waiting for a credential
    Show,

    /// Supply the credential a running test asked for
    Fulfill {
        /// Value to hand to the test (never logged by the runner)
        value: String,
    },
}

pub async fn execute(cmd: AuthCommands, client: &RunnerClient, format: OutputFormat) -> Result<()> {
    match cmd {
        AuthCommands::Show => {
            let status = client.status().await?;
            match (status.auth, format) {
                (Some(auth), OutputFormat::Json) => crate::output::print_json(&auth),
                (Some(auth), OutputFormat::Table) => match auth.kind {
                    Some(kind) => println!("{:?}: {}", auth.phase, kind),
                    None => println!("No credential requested."),
                },
                (None, _) => print_message("Runner does not expose a credential relay.", format),
            }
        }
        AuthCommands::Fulfill { value } => {
            client.fulfill_auth(&value).await?;
            print_success("Credential sent.");
        }
    }
    Ok(())
}
