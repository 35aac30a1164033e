//! fleetscaled: the fleetscale daemon.
//!
//! Runs the scaling engine against a local redb state file: external
//! pipelines write metric samples and observed instance counts into it, the
//! engine writes desired counts back, and a reconciler applies them.
//!
//! # Usage
//!
//! ```text
//! fleetscaled run --config /etc/fleetscale/fleetscaled.toml
//! fleetscaled put-policy --data-dir /var/lib/fleetscale --app-id web policy.json
//! fleetscaled check-policy policy.json
//! ```

mod config;
mod export;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;

use fleetscale_engine::{DecisionObserver, PolicyCache, ScalingEngine};
use fleetscale_metrics::DecisionMetrics;
use fleetscale_state::{ScalingPolicy, StateStore, lint, parse_policy};

use crate::config::{DB_FILE, DaemonConfig};
use crate::export::TextfileExporter;

#[derive(Parser)]
#[command(name = "fleetscaled", about = "fleetscale autoscaling daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scaling engine until Ctrl-C.
    Run {
        /// Path to fleetscaled.toml.
        #[arg(long, default_value = "/etc/fleetscale/fleetscaled.toml")]
        config: PathBuf,
    },

    /// Validate a policy document and store it for an application.
    PutPolicy {
        /// Data directory holding the state file.
        #[arg(long, default_value = "/var/lib/fleetscale")]
        data_dir: PathBuf,

        /// Application the policy belongs to.
        #[arg(long)]
        app_id: String,

        /// Policy JSON file.
        file: PathBuf,
    },

    /// Validate a policy document and print any warnings.
    CheckPolicy {
        /// Policy JSON file.
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,fleetscaled=debug,fleetscale=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run { config } => run(&config).await,
        Command::PutPolicy {
            data_dir,
            app_id,
            file,
        } => put_policy(&data_dir, &app_id, &file),
        Command::CheckPolicy { file } => check_policy(&file),
    }
}

async fn run(config_path: &Path) -> anyhow::Result<()> {
    let settings = DaemonConfig::from_file(config_path)?.resolve()?;
    info!(config = %config_path.display(), "fleetscale daemon starting");

    // ── Initialize subsystems ──────────────────────────────────

    std::fs::create_dir_all(&settings.data_dir)
        .with_context(|| format!("creating {}", settings.data_dir.display()))?;
    let db_path = settings.db_path();
    let store = Arc::new(StateStore::open(&db_path)?);
    info!(path = ?db_path, "state store opened");

    let cache = Arc::new(PolicyCache::new(store.clone()).with_timeout(settings.store_timeout));

    let metrics = Arc::new(DecisionMetrics::new());
    let observer: Arc<dyn DecisionObserver> = match &settings.metrics_file {
        Some(path) => {
            info!(path = %path.display(), "writing decision metrics after each round");
            Arc::new(TextfileExporter::new(metrics.clone(), path.clone()))
        }
        None => metrics.clone(),
    };

    let engine = ScalingEngine::new(cache.clone(), store.clone(), store.clone(), settings.engine.clone())
        .with_observer(observer);

    // ── Run until Ctrl-C ───────────────────────────────────────

    let handle = engine.start(settings.engine.tick_interval).await;

    tokio::signal::ctrl_c()
        .await
        .context("failed to install Ctrl-C handler")?;
    info!("shutdown signal received");

    handle.stop().await;
    cache.close().await?;
    info!(rounds = metrics.rounds(), health = %engine.health(), "fleetscale daemon stopped");
    Ok(())
}

fn put_policy(data_dir: &Path, app_id: &str, file: &Path) -> anyhow::Result<()> {
    let json = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let policy = parse_policy(&json).with_context(|| format!("invalid policy in {}", file.display()))?;
    print_warnings(&policy);

    std::fs::create_dir_all(data_dir).with_context(|| format!("creating {}", data_dir.display()))?;
    let store = StateStore::open(&data_dir.join(DB_FILE))?;
    let outcome = store.put_policy(app_id, &json)?;
    store.close();

    println!("{outcome}");
    Ok(())
}

fn check_policy(file: &Path) -> anyhow::Result<()> {
    let json = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let policy = parse_policy(&json).with_context(|| format!("invalid policy in {}", file.display()))?;
    print_warnings(&policy);
    println!("ok: {} rule(s), bounds {}", policy.scaling_rules.len(), policy.default_bounds());
    Ok(())
}

fn print_warnings(policy: &ScalingPolicy) {
    for warning in lint(policy, Utc::now()) {
        eprintln!("warning: {warning}");
    }
}

