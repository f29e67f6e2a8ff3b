//! `ocrjobs-worker [config.json]`
//!
//! Recovers unfinished jobs, then keeps the queue moving until Ctrl-C.
//! Engine calls already running when Ctrl-C arrives are allowed to finish.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use ocrjobs::config::load_or_default;
use ocrjobs::logging::init_logging;
use ocrjobs::{Database, HttpEngineClient, JobScheduler, OcrJobsError, QueueSweeper};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ocrjobs-worker: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), OcrJobsError> {
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = load_or_default(config_path.as_deref())?;

    init_logging(&config.logging)?;

    let db = Database::open(&config.database.path)?;
    let engine = HttpEngineClient::from_config(&config.engine)?;

    match engine.health_check().await {
        Ok(()) => log::info!("OCR engine at {} is healthy", engine.base_url()),
        Err(e) => log::warn!(
            "OCR engine at {} is not reachable yet, jobs will retry: {}",
            engine.base_url(),
            e
        ),
    }

    let scheduler = JobScheduler::with_config(db, Arc::new(engine), &config.scheduler);
    scheduler.recover()?;

    let sweeper = QueueSweeper::new(
        scheduler.clone(),
        config.scheduler.sweep_interval(),
        config.scheduler.sweep_batch_size,
    )
    .start();

    log::info!("Worker running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    scheduler.shutdown();
    if let Err(e) = sweeper.await {
        log::error!("Queue sweeper panicked: {}", e);
    }
    scheduler.drain().await;

    log::info!("Worker stopped");
    Ok(())
}
