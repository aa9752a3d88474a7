//! Specdeck CLI - Main Entry Point
//!
//! Talks to a running `specdeck-web` server: list specs, trigger and watch
//! runs, and answer credential requests.

use clap::{Parser, Subcommand};

use specdeck_cli::client::RunnerClient;
use specdeck_cli::commands::{auth, run, specs, status};
use specdeck_cli::output::{print_error, OutputFormat};

/// Specdeck CLI - browser test runs over HTTP
#[derive(Parser)]
#[command(name = "specdeck")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Runner address
    #[arg(long, env = "SPECDECK_SERVER", default_value = "http://127.0.0.1:5050", global = true)]
    server: String,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List discovered specs and their tasks
    Tests,

    /// Start a run
    Trigger(run::TriggerArgs),

    /// Show the current or most recent run
    Status {
        /// Trailing log lines to print
        #[arg(long, default_value = "0")]
        logs: usize,
    },

    /// Stop the active run
    Stop,

    /// Reset the runner to idle
    Clear,

    /// Wait for the active run to finish; exits non-zero unless it passed
    Wait(run::WaitArgs),

    /// Credential relay
    #[command(subcommand)]
    Auth(auth::AuthCommands),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(e) = run_command(cli).await {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let client = RunnerClient::new(&cli.server)?;
    let format = cli.format;

    match cli.command {
        Commands::Tests => specs::execute(&client, format).await,
        Commands::Trigger(args) => run::trigger(args, &client, format).await,
        Commands::Status { logs } => status::execute(&client, logs, format).await,
        Commands::Stop => run::stop(&client, format).await,
        Commands::Clear => run::clear(&client, format).await,
        Commands::Wait(args) => run::wait(args, &client, format).await,
        Commands::Auth(cmd) => auth::execute(cmd, &client, format).await,
    }
}
