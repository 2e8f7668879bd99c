//! GridWarden -- telemetry anomaly detection and firmware patch rollout
//! for simulated grid-edge fleets.
//!
//! This crate provides the core library for baseline-driven anomaly
//! detection, alert cooldown, patch lifecycle management, and the
//! periodic scheduler that drives telemetry ingestion.

pub mod config;
pub mod detect;
pub mod ingest;
pub mod patch;
pub mod scheduler;
pub mod storage;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::GridConfig;
use crate::detect::engine::AnomalyEngine;
use crate::scheduler::{JobAction, Scheduler, SchedulerJob};
use crate::storage::{SqliteStore, Store};

/// Start the daemon: storage, anomaly engine, and the scheduler-driven
/// telemetry ingestion loop. Runs until ctrl-c.
pub async fn serve(config: GridConfig) -> Result<()> {
    tracing::info!(db_path = %config.db_path, "initializing database");
    let pool = storage::open_pool(&config.db_path)?;
    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool));

    let engine = Arc::new(Mutex::new(AnomalyEngine::new(
        config.detect.clone(),
        store.clone(),
    )));

    let fleet = match &config.fleet_path {
        Some(path) => ingest::load_fleet(path)?,
        None => ingest::default_fleet(),
    };
    tracing::info!(nodes = fleet.len(), "fleet loaded");

    let (mut sched, stop) = Scheduler::new(Duration::from_secs(
        config.scheduler.poll_interval_seconds,
    ));
    sched.register(SchedulerJob::new(
        "ingest_telemetry",
        Duration::from_secs(config.scheduler.ingestion_interval_seconds),
        ingestion_action(engine.clone(), fleet),
    ));

    let loop_task = tokio::spawn(sched.run());

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    stop.stop();
    loop_task.await?;

    Ok(())
}

/// Build the scheduler action for one ingestion cycle. Each cycle runs
/// on the blocking pool so database writes stay off the scheduler task.
fn ingestion_action(engine: Arc<Mutex<AnomalyEngine>>, fleet: Vec<ingest::FleetNode>) -> JobAction {
    let mut rng = StdRng::from_entropy();
    Box::new(move || {
        let engine = engine.clone();
        let fleet = fleet.clone();
        let cycle_seed: u64 = rng.gen();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                let mut rng = StdRng::seed_from_u64(cycle_seed);
                ingest::run_cycle(&engine, &fleet, &mut rng);
            })
            .await?;
            Ok(())
        })
    })
}
