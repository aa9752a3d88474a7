use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use specdeck_web::{RunnerConfig, WebServer};

#[derive(Parser)]
#[command(name = "specdeck-web")]
#[command(about = "Specdeck runner - trigger and watch browser test runs over HTTP")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "SPECDECK_CONFIG", default_value = "specdeck.toml")]
    config: PathBuf,

    /// HTTP listen address
    #[arg(short, long, env = "SPECDECK_LISTEN")]
    listen: Option<String>,

    /// Project directory the test runner is started in
    #[arg(short, long, env = "SPECDECK_PROJECT_ROOT")]
    project_root: Option<PathBuf>,

    /// Spec directory, relative to the project root
    #[arg(long, env = "SPECDECK_TESTS_DIR")]
    tests_dir: Option<PathBuf>,

    /// Default target host for runs
    #[arg(long, env = "SPECDECK_BASE_DOMAIN")]
    base_domain: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("Specdeck runner v{}", specdeck_common::VERSION);

    let mut config = RunnerConfig::load(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(root) = cli.project_root {
        config.project_root = root;
    }
    if let Some(dir) = cli.tests_dir {
        config.tests_dir = dir;
    }
    if let Some(domain) = cli.base_domain {
        config.default_base_domain = domain;
    }
    config.validate()?;

    let addr: SocketAddr = config.listen.parse()?;
    info!(
        project_root = %config.project_root.display(),
        tests = %config.tests_root().display(),
        base_domain = %config.default_base_domain,
        "configuration loaded"
    );

    WebServer::new(config).serve(addr).await
}
