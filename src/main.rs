//! RideKeeper - headless session replay
//!
//! Replays a JSON-lines file of readings through a full recording session
//! against a loopback trainer, stores the result and reports training load.
//!
//! Usage: `ridekeeper <readings.jsonl> [plan.json]`

use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context};
use chrono::Utc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use ridekeeper::metrics::analytics::TrainingLoadEngine;
use ridekeeper::recording::{Environment, ManualClock, Session, SessionCategory, SessionRuntime};
use ridekeeper::sensors::Reading;
use ridekeeper::storage::config::load_config;
use ridekeeper::storage::Database;
use ridekeeper::trainer::{LoopbackChannel, MachineClass};
use ridekeeper::workouts::WorkoutPlan;

/// Profile used for replayed sessions.
const LOCAL_PROFILE: Uuid = Uuid::nil();

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting RideKeeper v{}", env!("CARGO_PKG_VERSION"));

    let mut args = std::env::args().skip(1);
    let Some(readings_path) = args.next() else {
        bail!("usage: ridekeeper <readings.jsonl> [plan.json]");
    };
    let plan_path = args.next();

    let config = load_config().context("failed to load configuration")?;
    let db_path = config.data_dir.join("ridekeeper.db");
    let db = Database::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    let db = Arc::new(Mutex::new(db));

    let readings = read_readings(Path::new(&readings_path))?;
    let (Some(first), Some(last)) = (readings.first(), readings.last()) else {
        bail!("{} contains no readings", readings_path);
    };
    let (started_at, ended_at) = (first.captured_at, last.captured_at);

    let plan = match plan_path {
        Some(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read plan {}", path))?;
            Some(WorkoutPlan::from_json(&json).with_context(|| format!("invalid plan {}", path))?)
        }
        None => None,
    };

    let channel = Arc::new(LoopbackChannel::new());
    let runtime = SessionRuntime::new(config.clone(), Arc::clone(&db), Arc::clone(&channel))
        .with_clock(ManualClock::new(started_at))
        .with_tick_interval(None);

    let unfinished = runtime.unfinished_sessions().await?;
    if !unfinished.is_empty() {
        tracing::warn!("{} unfinished sessions left from earlier runs", unfinished.len());
    }

    let session = Session::new(LOCAL_PROFILE, SessionCategory::Ride, Environment::Indoor);
    let handle = runtime.spawn(session).await?;
    handle.trainer_connected(MachineClass::Ftms).await?;
    handle.start_at(started_at).await?;
    if let Some(plan) = plan {
        tracing::info!("Attaching plan '{}' ({} steps)", plan.name, plan.len());
        handle.attach_plan_at(plan, started_at).await?;
    }

    let count = readings.len();
    let submitter = handle.submitter();
    for reading in readings {
        submitter.submit(reading).await?;
    }
    drop(submitter);

    let summary = handle.finish_at(ended_at).await?;
    tracing::info!(
        "Replayed {} readings: {} s moving, {:.0} m, avg power {:?}, NP {:?}, score {:?}",
        count,
        summary.moving_secs,
        summary.distance_m,
        summary.avg_power.map(|p| p.round()),
        summary.normalized_power.map(|p| p.round()),
        summary.stress_score.map(|s| s.round())
    );
    tracing::info!("Trainer received {} commands", channel.sent().len());

    let guard = db
        .lock()
        .map_err(|e| anyhow::anyhow!("Database lock failed: {}", e))?;
    let engine = TrainingLoadEngine::new(&*guard, config.training_load.clone(), config.defaults.clone());
    let load = engine.training_load(&LOCAL_PROFILE, Utc::now())?;
    tracing::info!(
        "Training load on {}: CTL {:.1}, ATL {:.1}, TSB {:.1} ({:?})",
        load.as_of,
        load.ctl,
        load.atl,
        load.tsb,
        load.trend
    );

    Ok(())
}

fn read_readings(path: &Path) -> anyhow::Result<Vec<Reading>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut readings = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let reading: Reading = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid reading", path.display(), number + 1))?;
        readings.push(reading);
    }
    readings.sort_by_key(|r| r.captured_at);
    Ok(readings)
}
