use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use leetnote_sync::{maybe_build_scheduler, Reconciler, SyncConfig};
use leetnote_web::WebConfig;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "leetnote")]
#[command(about = "Sync recent LeetCode solves into a Notion review tracker")]
#[command(version)]
struct Cli {
    /// Dotenv file to load before reading configuration
    #[arg(long, env = "LEETNOTE_ENV_FILE")]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve the authenticated trigger endpoint (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, env = "LEETNOTE_PORT")]
        port: Option<u16>,
    },
    /// Run one reconciliation and exit
    Sync,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.env_file {
        Some(path) => {
            dotenvy::from_path(path).with_context(|| format!("loading {}", path.display()))?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "leetnote=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let sync_config = SyncConfig::from_env();
    for name in sync_config.missing_required() {
        warn!(setting = name, "required setting is empty");
    }

    match cli.command.unwrap_or(Commands::Serve { port: None }) {
        Commands::Serve { port } => {
            let mut web_config = WebConfig::from_env();
            if let Some(port) = port {
                web_config.port = port;
            }

            let reconciler = Arc::new(Reconciler::from_config(&sync_config)?);
            let scheduler = maybe_build_scheduler(&sync_config, Arc::clone(&reconciler)).await?;
            if let Some(sched) = &scheduler {
                sched.start().await.context("starting scheduler")?;
            }

            leetnote_web::serve(&web_config, reconciler).await?;

            if let Some(mut sched) = scheduler {
                sched.shutdown().await.context("stopping scheduler")?;
            }
        }
        Commands::Sync => {
            let summary = leetnote_sync::run_sync_once(&sync_config).await?;
            info!(run_id = %summary.run_id, "sync finished");
            println!(
                "sync complete: run_id={} submissions={} patched={} unchanged={} created={}",
                summary.run_id, summary.submissions, summary.patched, summary.unchanged, summary.created
            );
        }
    }

    Ok(())
}
