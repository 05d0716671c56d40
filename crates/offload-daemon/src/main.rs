//! Offload daemon.
//!
//! Runs the bookkeeping side of the job service: the outbox relay and one
//! supervisor loop per job kind. Worker pools embed `WorkerExecutor` from
//! `offload-scheduler` together with their feature runners and run as
//! separate processes.

use anyhow::Context;
use clap::{Parser, Subcommand};
use offload_config::Config;
use offload_core::JobKind;
use offload_db::{JobRepo, PgJobRepo, create_pool, run_migrations};
use offload_scheduler::{OutboxRelay, PgQueue, Supervisor};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "offloadd")]
#[command(about = "Offload background job daemon", long_about = None)]
struct Cli {
    /// Path to the KDL configuration file
    #[arg(long, default_value = "offload.kdl")]
    config: PathBuf,

    /// Postgres connection string (overrides the config file)
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations and exit
    Migrate,
    /// Run the outbox relay and per-kind supervisors
    Run,
    /// Sweep one kind once and report the reaped count
    Sweep {
        /// Job kind to sweep (export, preview, bulk_op, report_gen)
        kind: String,
    },
}

fn load_config(path: &PathBuf) -> anyhow::Result<Config> {
    if !path.exists() {
        info!(path = %path.display(), "no config file, using defaults");
        return Ok(Config {
            daemon: Default::default(),
            policies: Default::default(),
        });
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    offload_config::parse_config(&text).with_context(|| format!("parsing {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    let database_url = cli
        .database_url
        .or_else(|| config.daemon.database_url.clone())
        .context("no database URL: pass --database-url, set DATABASE_URL, or configure daemon.database-url")?;

    info!("connecting to database");
    let pool = create_pool(&database_url).await?;

    match cli.command {
        Commands::Migrate => {
            run_migrations(&pool).await?;
            info!("migrations applied");
        }
        Commands::Sweep { kind } => {
            let kind = JobKind::parse(&kind)
                .with_context(|| format!("unknown job kind: {kind}"))?;
            let repo: Arc<dyn JobRepo> = Arc::new(PgJobRepo::new(pool));
            let supervisor = Supervisor::new(repo, config.policies);
            let reaped = supervisor.sweep(kind).await?;
            info!(kind = %kind, reaped, "one-shot sweep done");
        }
        Commands::Run => {
            run_migrations(&pool).await?;

            let repo: Arc<dyn JobRepo> = Arc::new(PgJobRepo::new(pool.clone()));
            let transport = Arc::new(PgQueue::new(pool));

            let relay = OutboxRelay::new(repo.clone(), transport);
            let relay_interval = config
                .daemon
                .relay_interval
                .to_std()
                .unwrap_or(Duration::from_secs(1));
            tokio::spawn(async move { relay.run(relay_interval).await });

            let supervisor = Arc::new(Supervisor::new(repo, config.policies.clone()));
            for kind in JobKind::ALL {
                let interval = config
                    .policies
                    .policy(kind)
                    .sweep_interval
                    .to_std()
                    .unwrap_or(Duration::from_secs(60));
                let supervisor = supervisor.clone();
                tokio::spawn(async move { supervisor.run(kind, interval).await });
            }

            info!("offloadd running, ctrl-c to stop");
            tokio::signal::ctrl_c().await?;
            info!("shutting down");
        }
    }

    Ok(())
}
