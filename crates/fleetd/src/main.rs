//! fleetd — the fleetscale daemon.
//!
//! Loads `fleet.toml`, wires the container backend, the file metrics feed
//! and the HAProxy writer into a `FleetController`, and runs the control
//! loop until Ctrl-C.
//!
//! # Usage
//!
//! ```text
//! fleetd run --config /etc/fleetscale/fleet.toml
//! fleetd check-config --config fleet.toml
//! fleetd render --config fleet.toml
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fleet_core::FleetConfig;
use fleetscale_autoscale::{FleetController, initial_pool};
use fleetscale_backend::ContainerCliBackend;
use fleetscale_metrics::FileMetricsSource;
use fleetscale_proxy::{HaproxyWriter, RouteSync};

const DEFAULT_FILTER: &str = "info,fleetd=debug,fleetscale_autoscale=debug,fleetscale_proxy=debug";

#[derive(Parser)]
#[command(name = "fleetd", about = "fleetscale autoscaling daemon", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Bootstrap the pool and run the control loop.
    Run {
        /// Path to fleet.toml.
        #[arg(short, long)]
        config: PathBuf,

        /// Log output format: text or json
        #[arg(long, default_value = "text")]
        log_format: String,
    },
    /// Validate a config file and print the effective settings as JSON.
    CheckConfig {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Print the route table the bootstrap would publish, touching nothing.
    Render {
        #[arg(short, long)]
        config: PathBuf,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { config, log_format } => {
            init_tracing(&log_format)?;
            run(&config).await
        }
        Command::CheckConfig { config } => {
            init_tracing("text")?;
            check_config(&config)
        }
        Command::Render { config, format } => {
            init_tracing("text")?;
            render(&config, &format)
        }
    }
}

fn init_tracing(format: &str) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        "text" => builder.init(),
        "json" => builder.json().init(),
        other => bail!("unknown log format '{other}', expected text or json"),
    }
    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<FleetConfig> {
    FleetConfig::from_file(path)
        .with_context(|| format!("failed to load config from {}", path.display()))
}

async fn run(path: &Path) -> anyhow::Result<()> {
    let config = load_config(path)?;
    info!(
        config = %path.display(),
        runtime = %config.pool.runtime,
        metrics_dir = ?config.metrics.dir,
        route_table = ?config.route_table.config_path,
        "fleetd starting"
    );

    let writer = HaproxyWriter::from_config(&config.route_table);
    let routes = RouteSync::from_config(writer, &config).context("failed to prepare route table")?;
    let source = FileMetricsSource::new(&config.metrics.dir);
    let backend = ContainerCliBackend::new(&config.pool.runtime);

    let mut controller = FleetController::new(&config, source, backend, routes);
    let workers = controller.bootstrap().await;
    info!(?workers, "initial pool ready");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown signal received"),
            Err(e) => warn!(error = %e, "cannot listen for Ctrl-C, stopping"),
        }
        let _ = shutdown_tx.send(true);
    });

    controller.run(shutdown_rx).await;

    info!(workers = controller.workers().len(), "fleetd stopped, instances left running");
    Ok(())
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let config = load_config(path)?;
    let json = serde_json::to_string_pretty(&config).context("failed to serialize config")?;
    println!("{json}");
    Ok(())
}

fn render(path: &Path, format: &str) -> anyhow::Result<()> {
    let config = load_config(path)?;
    let writer = HaproxyWriter::from_config(&config.route_table);
    let routes = RouteSync::from_config(writer, &config).context("failed to prepare route table")?;
    let (table, text) = routes.render(&initial_pool(&config.pool));

    match format {
        "text" => print!("{text}"),
        "json" => println!(
            "{}",
            serde_json::to_string_pretty(&table).context("failed to serialize route table")?
        ),
        other => bail!("unknown format '{other}', expected text or json"),
    }
    Ok(())
}
