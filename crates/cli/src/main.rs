//! ferry - migrate legacy uploads into an object store.

mod app;

use anyhow::{Context, Result};
use app::App;
use clap::{Parser, Subcommand};
use ferry_core::config::AppConfig;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "ferry")]
#[command(version, about = "Migrate legacy uploads into an object store", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "FERRY_CONFIG", default_value = "config/ferry.toml")]
    config: String,

    /// Write Prometheus metrics to this file when the command finishes
    #[arg(long, global = true)]
    metrics_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Copy pending source uploads into the object store
    Upload,
    /// Find bookkeeping rows whose stored object has disappeared
    Fix,
    /// Generate derivative images for referenced uploads
    Optimize,
    /// Print bookkeeping totals without running a pass
    Status,
}

fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if Path::new(path).exists() {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}, using defaults", path);
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("FERRY_").ignore(&["CONFIG"]).split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("ferry v{}", env!("CARGO_PKG_VERSION"));
    let config = load_config(&args.config)?;

    match args.command {
        Command::Upload => App::open(config).await?.upload().await?,
        Command::Fix => App::open(config).await?.fix().await?,
        Command::Optimize => App::open(config).await?.optimize().await?,
        Command::Status => app::print_status(&config).await?,
    }

    if let Some(path) = &args.metrics_file {
        let text = ferry_pipeline::metrics::render_metrics().context("failed to render metrics")?;
        std::fs::write(path, text)
            .with_context(|| format!("failed to write metrics to {}", path.display()))?;
    }
    Ok(())
}
