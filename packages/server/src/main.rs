#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Crowd monitor process.
//!
//! Loads the camera list, opens the aggregate store, runs the processing
//! scheduler in the background, and serves the query API until the HTTP
//! server stops. The scheduler is then signalled and awaited so every
//! capture handle is released and queued records are flushed.

use std::path::PathBuf;
use std::sync::Arc;

use actix_web::web;
use clap::Parser;
use crowd_monitor_config::{MonitorSettings, load_cameras};
use crowd_monitor_detector::{FrameProcessor, default_detector};
use crowd_monitor_scheduler::{Scheduler, SchedulerConfig, activate_cameras};
use crowd_monitor_server::{AppState, run_server};
use crowd_monitor_stream::{ReconnectPolicy, default_backend};
use switchy_database::Database;

/// Monitor crowd density from CCTV feeds and serve aggregates over HTTP.
#[derive(Parser)]
#[command(name = "crowd_monitor_server")]
#[command(about = "Monitor crowd density from CCTV feeds and serve aggregates over HTTP")]
struct Cli {
    /// Cameras TOML file (overrides `CONFIG_PATH`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Aggregate `SQLite` database (overrides `DB_PATH`).
    #[arg(long)]
    db: Option<PathBuf>,

    /// Directory that relative file sources resolve against (overrides
    /// `SAMPLES_DIR`).
    #[arg(long)]
    samples: Option<PathBuf>,

    /// HTTP bind address (overrides `BIND_ADDR`).
    #[arg(long)]
    bind: Option<String>,

    /// HTTP port (overrides `PORT`).
    #[arg(long)]
    port: Option<u16>,

    /// Cameras processed concurrently within a pass (overrides
    /// `SCHEDULER_WORKERS`).
    #[arg(long)]
    workers: Option<usize>,
}

impl Cli {
    fn apply(self, mut settings: MonitorSettings) -> MonitorSettings {
        if let Some(config) = self.config {
            settings.config_path = config;
        }
        if let Some(db) = self.db {
            settings.db_path = db;
        }
        if let Some(samples) = self.samples {
            settings.samples_dir = samples;
        }
        if let Some(bind) = self.bind {
            settings.bind_addr = bind;
        }
        if let Some(port) = self.port {
            settings.port = port;
        }
        if let Some(workers) = self.workers {
            settings.workers = workers.max(1);
        }
        settings
    }
}

#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    let settings = Cli::parse().apply(MonitorSettings::from_env());
    log::debug!("Settings: {settings:?}");

    log::info!("Opening aggregate store at {}...", settings.db_path.display());
    let writer_db: Arc<dyn Database> =
        Arc::from(crowd_monitor_database::open_db(&settings.db_path).await?);
    let reader_db: Arc<dyn Database> =
        Arc::from(crowd_monitor_database::open_db(&settings.db_path).await?);
    let stored = crowd_monitor_database::count_records(reader_db.as_ref(), None).await?;
    log::info!("Aggregate store holds {stored} record(s)");

    let cameras = load_cameras(&settings.config_path, &settings.samples_dir)?;
    log::info!(
        "Loaded {} camera(s) from {}",
        cameras.len(),
        settings.config_path.display()
    );

    let processor = FrameProcessor::new(default_detector()?);
    let backend = default_backend();
    let policy =
        ReconnectPolicy::exponential(settings.reconnect_backoff, settings.reconnect_backoff_max);

    // Opening network streams can block for a while.
    let sources =
        tokio::task::spawn_blocking(move || activate_cameras(cameras, &backend, policy)).await?;

    let scheduler = Scheduler::new(
        sources,
        processor,
        writer_db,
        SchedulerConfig::from(&settings),
    );
    let (stop, shutdown) = tokio::sync::watch::channel(false);
    let scheduler_task = tokio::spawn(scheduler.run(shutdown));

    let state = web::Data::new(AppState { db: reader_db });
    let served = run_server(state, &settings.bind_addr, settings.port).await;

    log::info!("HTTP server stopped; shutting down scheduler...");
    if stop.send(true).is_err() {
        log::warn!("Scheduler already exited");
    }

    match scheduler_task.await {
        Ok(Ok(summary)) => log::info!("Scheduler finished: {summary:?}"),
        Ok(Err(e)) => log::error!("Scheduler failed: {e}"),
        Err(e) => log::error!("Scheduler task panicked: {e}"),
    }

    served?;
    Ok(())
}
