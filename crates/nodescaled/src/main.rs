//! nodescaled — the NodeScale daemon.
//!
//! Loads a TOML config and a JSON cluster fixture, then runs the scale
//! decision loop: scale-up estimation for pending pods and scale-down
//! simulation for underutilized nodes. Decisions are recorded against the
//! in-memory cloud provider; nothing is evicted or deleted.
//!
//! # Usage
//!
//! ```text
//! nodescaled run --config config/nodescale.toml --cluster config/cluster.json --interval 10
//! nodescaled run --cluster config/cluster.json --once
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use nodescale_core::AutoscalerConfig;
use tokio::sync::watch;
use tracing::info;

mod autoscaler;
mod fixture;

use autoscaler::Autoscaler;
use fixture::ClusterFixture;

#[derive(Parser)]
#[command(name = "nodescaled", about = "NodeScale daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the decision loop against a cluster fixture.
    Run {
        /// Path to nodescale.toml. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Path to the JSON cluster fixture.
        #[arg(long)]
        cluster: PathBuf,

        /// Seconds between decision cycles.
        #[arg(long, default_value = "10")]
        interval: u64,

        /// Run a single cycle and exit.
        #[arg(long)]
        once: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,nodescale=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            cluster,
            interval,
            once,
        } => run(config, cluster, interval, once).await,
    }
}

async fn run(config: Option<PathBuf>, cluster: PathBuf, interval: u64, once: bool) -> anyhow::Result<()> {
    let config = match config {
        Some(path) => {
            let config = AutoscalerConfig::from_file(&path)?;
            info!(path = %path.display(), "config loaded");
            config
        }
        None => AutoscalerConfig::default(),
    };
    let fixture = ClusterFixture::from_file(&cluster)?;
    info!(
        path = %cluster.display(),
        nodes = fixture.nodes.len(),
        pods = fixture.pods.len(),
        node_groups = fixture.node_groups.len(),
        "cluster fixture loaded"
    );

    let refresh_interval = config.instance_refresh_interval();
    let mut autoscaler = Autoscaler::new(config, fixture);
    let cache = autoscaler.cache();
    cache.refresh().await;

    if once {
        let summary = autoscaler.run_once(nodescale_core::epoch_secs()).await?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let cache_handle = tokio::spawn(Arc::clone(&cache).run(refresh_interval, shutdown_rx.clone()));

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
        }
        let _ = shutdown_tx.send(true);
    });

    autoscaler
        .run(Duration::from_secs(interval), shutdown_rx)
        .await;

    let _ = cache_handle.await;
    info!("NodeScale daemon stopped");
    Ok(())
}
