//! fedclusterd: the federation cluster health daemon.
//!
//! Single binary that assembles:
//! - Cluster registry (redb)
//! - Cluster reconciler (per-cluster probe workers)
//! - Operator REST API
//!
//! # Usage
//!
//! ```text
//! fedclusterd run --config /etc/fedcluster/fedclusterd.toml --port 8443
//! fedclusterd config --config /etc/fedcluster/fedclusterd.toml
//! ```

mod config;
mod controller;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use config::DaemonConfig;

const DEFAULT_LOG_FILTER: &str = "info,fedclusterd=debug,fedcluster=debug";

#[derive(Parser)]
#[command(name = "fedclusterd", about = "Federation cluster health daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the reconciler and the REST API.
    Run(RunArgs),
    /// Print the effective configuration (file plus flags) as TOML.
    Config(RunArgs),
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory for the cluster registry.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Port the REST API listens on.
    #[arg(long)]
    port: Option<u16>,

    /// Upper bound for a single call against a member cluster (e.g. "10s").
    #[arg(long, value_parser = parse_duration_arg)]
    single_call_timeout: Option<Duration>,

    /// Time between two probes of the same cluster (e.g. "10s").
    #[arg(long, value_parser = parse_duration_arg)]
    probe_interval: Option<Duration>,

    /// Only reconcile the named cluster. Repeatable.
    #[arg(long = "cluster")]
    clusters: Vec<String>,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

fn parse_duration_arg(s: &str) -> Result<Duration, String> {
    fedcluster_health::parse_duration(s).ok_or_else(|| format!("invalid duration {s:?}"))
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Load the config file (if any) and apply CLI overrides on top.
fn resolve_config(args: &RunArgs) -> anyhow::Result<DaemonConfig> {
    let mut config = match &args.config {
        Some(path) => DaemonConfig::from_file(path)?,
        None => DaemonConfig::default(),
    };
    if let Some(dir) = &args.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(port) = args.port {
        config.api.port = port;
    }
    if let Some(timeout) = args.single_call_timeout {
        config.controller.single_call_timeout = timeout;
    }
    if let Some(interval) = args.probe_interval {
        config.controller.probe_interval = interval;
    }
    if !args.clusters.is_empty() {
        config.controller.clusters = args.clusters.clone();
    }
    config.controller.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => {
            init_tracing(args.log_format);
            let config = resolve_config(&args)?;
            tracing::debug!(config = ?config, "configuration resolved");
            controller::run_controller(config).await
        }
        Command::Config(args) => {
            let config = resolve_config(&args)?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}
