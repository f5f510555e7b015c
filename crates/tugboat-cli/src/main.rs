//! Tugboat CLI: watch git repositories and dispatch jobs to a cluster.

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod pipeline;

#[derive(Parser)]
#[command(name = "tugboat")]
#[command(about = "Poll git repositories and dispatch a job per new commit", long_about = None)]
struct Cli {
    /// Repositories to watch, as <url>[^<branch>]. Branch defaults to "master".
    #[arg(required = true)]
    repos: Vec<String>,

    /// Path to the job manifest template
    #[arg(long, env = "TUGBOAT_TEMPLATE")]
    template: PathBuf,

    /// Polling interval in seconds
    #[arg(long, env = "TUGBOAT_POLL_INTERVAL", default_value = "60")]
    interval: u64,

    /// State directory; a scratch directory is allocated (and removed on
    /// shutdown) when omitted
    #[arg(long, env = "TUGBOAT_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Access token for https remotes, applied to every watched repository
    #[arg(long, env = "TUGBOAT_ACCESS_TOKEN")]
    token: Option<String>,

    /// Tolerate pre-existing task namespaces instead of failing the task
    #[arg(long)]
    overwrite_namespaces: bool,

    /// Storage request for per-task workspace volumes
    #[arg(long, default_value = "1Gi")]
    volume_size: String,

    /// Shutdown grace period in seconds
    #[arg(long, default_value = "10")]
    grace: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let exit_code = pipeline::run(pipeline::Config {
        repos: cli.repos,
        template: cli.template,
        interval: std::time::Duration::from_secs(cli.interval),
        state_dir: cli.state_dir,
        token: cli.token,
        overwrite_namespaces: cli.overwrite_namespaces,
        volume_size: cli.volume_size,
        grace: std::time::Duration::from_secs(cli.grace),
    })
    .await?;

    std::process::exit(exit_code);
}
