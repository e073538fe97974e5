use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

mod config;
mod db;
mod providers;
mod sync;

use config::{Command, Config};
use db::Database;
use providers::ProviderClient;
use sync::{
    FullSyncOptions, JobLocks, QueueScoringHook, ReconciliationWriter, SyncOutcome,
    UpdateScheduler,
};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    let db = Database::open(&config.database_path)?;
    info!("Database opened: {}", config.database_path);

    let scheduler = build_scheduler(&config, db)?;

    let outcome = match config.command {
        Command::FullSync {
            teams_only,
            gameweeks_only,
            force,
        } => {
            let options = FullSyncOptions {
                teams_only,
                gameweeks_only,
                force,
            };
            scheduler.full_sync(options, Utc::now()).await
        }
        Command::SmartSync { force } => scheduler.smart_sync(force, Utc::now()).await,
        Command::Cleanup => scheduler.cleanup(Utc::now()).await,
        Command::Schedule => {
            let analysis = scheduler.analyze(Utc::now())?;
            println!("{}", analysis);
            return Ok(ExitCode::SUCCESS);
        }
        Command::Serve => {
            sync::daemon::run(&scheduler, config.full_sync_hour).await?;
            return Ok(ExitCode::SUCCESS);
        }
    };

    match &outcome {
        SyncOutcome::Failed(msg) => {
            error!("Job failed: {}", msg);
            Ok(ExitCode::FAILURE)
        }
        SyncOutcome::Skipped(reason) => {
            info!("Job skipped: {}", reason);
            Ok(ExitCode::SUCCESS)
        }
        SyncOutcome::Done(report) => {
            info!("Job done: {}", report);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn build_scheduler(config: &Config, db: Database) -> Result<UpdateScheduler> {
    let timeout = Duration::from_secs(config.request_timeout_secs);
    let fixtures_keys = config.football_data_keys();
    if fixtures_keys.pool().is_empty() {
        warn!("No FOOTBALL_DATA_API_KEY configured: provider calls will fail");
    }

    let fixtures = ProviderClient::football_data(&config.football_data_api_url, timeout)?;
    let writer = ReconciliationWriter::new(db.clone(), Arc::new(QueueScoringHook::new(db.clone())));
    let locks = JobLocks::new(&config.lock_dir)?;

    let mut scheduler = UpdateScheduler::new(
        db,
        Arc::new(fixtures),
        fixtures_keys,
        config.sync_settings(),
        writer,
        locks,
    );

    let squads_keys = config.squads_keys();
    if !squads_keys.pool().is_empty() {
        let squads = ProviderClient::squads(&config.squads_api_url, timeout)?;
        scheduler = scheduler.with_squads(Arc::new(squads), squads_keys);
    } else {
        info!("No SQUADS_API_KEY configured: squad/injury sync disabled");
    }

    Ok(scheduler)
}
