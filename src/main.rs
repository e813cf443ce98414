use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use content_purge::{
    config::{self, AppConfig},
    db::DbPool,
    lock::{self, ClusterGate},
    observability,
    purge::{self, PurgeSchedule, Purger},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

const DEFAULT_CONFIG_PATH: &str = "content-purge.toml";

/// CLI arguments for the content purge job
#[derive(Parser, Debug)]
#[command(version, about = "Cluster-safe purge of old, orphaned content", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (defaults to ./content-purge.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run the purge scheduler until a shutdown signal (default)
    Run,
    /// Run a single purge pass now, if this node can take the lease
    Once {
        /// Count candidates without deleting, regardless of config
        #[arg(long, conflicts_with = "live")]
        dry_run: bool,
        /// Delete candidates, regardless of config
        #[arg(long)]
        live: bool,
    },
    /// Initialize a new configuration file
    Init {
        /// Path to create the config file (defaults to ./content-purge.toml)
        #[arg(short, long)]
        output: Option<String>,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config_path = PathBuf::from(args.config.as_deref().unwrap_or(DEFAULT_CONFIG_PATH));

    match args.command {
        Some(Command::Init { output, force }) => {
            run_init(output, force);
        }
        Some(Command::Once { dry_run, live }) => {
            let dry_run_override = if dry_run {
                Some(true)
            } else if live {
                Some(false)
            } else {
                None
            };
            run_once(&config_path, dry_run_override).await;
        }
        Some(Command::Run) | None => {
            run_scheduler(&config_path).await;
        }
    }
}

/// Write the default config file.
fn run_init(output: Option<String>, force: bool) {
    let output_path = PathBuf::from(output.as_deref().unwrap_or(DEFAULT_CONFIG_PATH));

    if output_path.exists() && !force {
        eprintln!(
            "Config file already exists: {}\nUse --force to overwrite.",
            output_path.display()
        );
        std::process::exit(1);
    }

    if let Some(parent) = output_path.parent()
        && !parent.as_os_str().is_empty()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        eprintln!("Failed to create directory {}: {}", parent.display(), e);
        std::process::exit(1);
    }

    if let Err(e) = std::fs::write(&output_path, config::DEFAULT_CONFIG_TOML) {
        eprintln!("Failed to write config file: {}", e);
        std::process::exit(1);
    }

    println!("Created config file: {}", output_path.display());
    println!("Passes start in dry-run mode; set purge.dry_run = false to delete.");
}

fn load_config(config_path: &std::path::Path) -> AppConfig {
    match AppConfig::from_file(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!(
                "Failed to load config from {}: {}",
                config_path.display(),
                e
            );
            std::process::exit(1);
        }
    }
}

/// Everything a pass needs, built from configuration.
struct Components {
    db: DbPool,
    purger: Arc<Purger>,
    gate: Arc<ClusterGate>,
}

async fn build_components(config: &AppConfig, dry_run_override: Option<bool>) -> Components {
    let db = match DbPool::from_config(&config.database).await {
        Ok(db) => db,
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to content store");
            eprintln!("Error: Failed to connect to content store: {}", e);
            std::process::exit(1);
        }
    };

    let store = match lock::create_lease_store(&config.lock).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %e, "Failed to create lease store");
            eprintln!("Error: Failed to create lease store: {}", e);
            db.close().await;
            std::process::exit(1);
        }
    };

    let mut purger = Purger::from_config(db.contentlets(), &config.purge);
    if let Some(dry_run) = dry_run_override {
        purger = purger.with_dry_run(dry_run);
    }

    Components {
        purger: Arc::new(purger),
        gate: Arc::new(ClusterGate::from_config(store, &config.lock)),
        db,
    }
}

/// Run the trigger loop until a shutdown signal, or until nothing is left
/// to schedule.
async fn run_scheduler(config_path: &std::path::Path) {
    let config = load_config(config_path);

    observability::init_tracing(&config.observability.logging)
        .expect("Failed to initialize tracing");

    if let Err(e) = observability::metrics::init_metrics(&config.observability.metrics) {
        tracing::warn!(error = %e, "Failed to initialize metrics");
    }

    tracing::info!(
        config_file = %config_path.display(),
        version = env!("CARGO_PKG_VERSION"),
        "Starting content purge scheduler"
    );

    let schedule = match PurgeSchedule::from_config(&config.purge) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let components = build_components(&config, None).await;
    let shutdown = CancellationToken::new();
    let task_tracker = TaskTracker::new();

    task_tracker.spawn(purge::start_purge_worker(
        Arc::clone(&components.purger),
        Arc::clone(&components.gate),
        schedule,
        shutdown.clone(),
    ));
    task_tracker.close();

    tokio::select! {
        _ = wait_for_signal() => {
            shutdown_gracefully(&task_tracker, &shutdown).await;
        }
        _ = task_tracker.wait() => {
            tracing::info!("No further purge passes scheduled");
        }
    }

    components.db.close().await;
    tracing::info!("Shutdown complete");
}

/// Run one gated pass and exit non-zero if it failed.
async fn run_once(config_path: &std::path::Path, dry_run_override: Option<bool>) {
    let config = load_config(config_path);

    observability::init_tracing(&config.observability.logging)
        .expect("Failed to initialize tracing");

    let components = build_components(&config, dry_run_override).await;
    let cancel = CancellationToken::new();

    let signal_token = cancel.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("Shutdown signal received, stopping pass at next checkpoint");
        signal_token.cancel();
    });

    let result = purge::run_gated_pass(&components.purger, &components.gate, &cancel).await;
    components.db.close().await;

    match result {
        Ok(Some(summary)) => {
            println!(
                "{} {} record(s) in {} batch(es); pass {}",
                if summary.dry_run { "Would delete" } else { "Deleted" },
                summary.deleted,
                summary.batches,
                summary.outcome
            );
        }
        Ok(None) => {
            println!(
                "Lease '{}' is held by another node; no pass was run",
                components.gate.name()
            );
        }
        Err(e) => {
            tracing::error!(error = %e, "Purge pass failed");
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn shutdown_gracefully(task_tracker: &TaskTracker, shutdown: &CancellationToken) {
    tracing::info!("Shutdown signal received, waiting for purge worker to stop...");

    // Pending triggers are abandoned; an in-flight pass stops at its next checkpoint
    shutdown.cancel();

    let wait_result = tokio::time::timeout(Duration::from_secs(30), task_tracker.wait()).await;

    match wait_result {
        Ok(()) => tracing::info!("Purge worker stopped"),
        Err(_) => {
            tracing::warn!("Timeout waiting for purge worker, a pass may have been cut short")
        }
    }
}
