// Camwarden daemon binary

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use clap::Parser;

use camwarden::cleanup;
use camwarden::db::open_db_with_retry;
use camwarden::licensing;
use camwarden::orchestrator::Orchestrator;
use camwarden::reconcile::AdmissionPolicy;
use camwarden::schedule::Schedule;
use camwarden::storage::{StorageTable, SysDiskUsage};
use camwarden::workers::pipeline::{NullOpener, PipelineFactory};

#[derive(Parser)]
#[command(name = "camwardend")]
#[command(about = "Camwarden multi-camera recording daemon", long_about = None)]
#[command(version)]
struct Cli {
    /// Stay in the foreground and log to stderr
    #[arg(short = 's', long)]
    foreground: bool,

    /// Cap the number of concurrent camera workers
    #[arg(short = 'm', long)]
    max_workers: Option<usize>,

    /// Only record this device id (single-camera debugging)
    #[arg(short = 'r', long)]
    record_id: Option<i64>,

    /// Path to the configuration database
    #[arg(long, default_value = "/var/lib/camwarden/camwarden.db")]
    db: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if !cli.foreground {
        // Daemonization is handled by the service manager; -s only changes
        // what a future syslog backend would do with the log stream.
        log::info!("Running under service management, logging to stderr");
    }

    if let Err(e) = licensing::check_expiry() {
        log::error!("{}", e);
        return ExitCode::FAILURE;
    }

    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());
    log::info!(
        "Camwarden {} starting up on {}",
        env!("CARGO_PKG_VERSION"),
        host
    );

    let conn = match open_db_with_retry(&cli.db) {
        Ok(conn) => conn,
        Err(e) => {
            log::error!("Could not open database {}: {}", cli.db.display(), e);
            return ExitCode::FAILURE;
        }
    };
    log::info!("Database connection opened");

    if let Err(e) = cleanup::check_in_progress(&conn) {
        log::warn!("In-progress recording check failed: {}", e);
    }

    let storage = Arc::new(StorageTable::new());
    let schedule = Arc::new(Mutex::new(Schedule::default()));
    let usage: Arc<SysDiskUsage> = Arc::new(SysDiskUsage);
    let factory = PipelineFactory::new(
        Arc::clone(&storage),
        usage.clone(),
        Arc::clone(&schedule),
        Arc::new(NullOpener),
    );

    let policy = AdmissionPolicy {
        record_id: cli.record_id,
        max_workers: cli.max_workers,
    };

    let mut orchestrator = Orchestrator::new(
        conn,
        storage,
        schedule,
        usage,
        Box::new(factory),
        policy,
    );
    orchestrator.refresh_globals();

    let shutdown = orchestrator.shutdown_flag();
    if let Err(e) = ctrlc::set_handler(move || {
        shutdown.store(true, Ordering::Release);
    }) {
        log::error!("Could not install signal handler: {}", e);
        return ExitCode::FAILURE;
    }

    orchestrator.run();
    log::info!("Camwarden shut down cleanly");
    ExitCode::SUCCESS
}
