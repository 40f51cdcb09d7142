//! In-process scheduler for the `run` command.
//!
//! Each component gets its own periodic task. A tick runs the component's
//! pass on the blocking pool and waits for it, so a component never
//! overlaps itself in this process; different components do overlap,
//! which every pass tolerates. Ctrl-C stops the schedule; a pass already
//! in flight may be cut short, which the next start recovers from.

use super::{notifier, supervisor};
use camrec_core::{PipelineConfig, Reclaimer, Stager, Watchdog};
use camrec_sync::{Replicator, RsyncTransfer};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

type Pass = fn(&PipelineConfig) -> Result<(), String>;

/// Runs every component on its schedule until interrupted.
pub fn run(config: PipelineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(schedule(Arc::new(config)))
}

async fn schedule(config: Arc<PipelineConfig>) -> Result<(), Box<dyn std::error::Error>> {
    let pipeline_period = config.closure_threshold();
    let watchdog_period = config.watchdog.evaluation_period();
    info!(
        pipeline_secs = pipeline_period.as_secs(),
        watchdog_secs = watchdog_period.as_secs(),
        "scheduler started"
    );

    let tasks: Vec<JoinHandle<()>> = vec![
        periodic("stage", pipeline_period, Arc::clone(&config), stage_pass),
        periodic("replicate", pipeline_period, Arc::clone(&config), replicate_pass),
        periodic("reclaim", pipeline_period, Arc::clone(&config), reclaim_pass),
        periodic("watchdog", watchdog_period, Arc::clone(&config), watchdog_pass),
    ];

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, stopping scheduler");
    for task in &tasks {
        task.abort();
    }
    Ok(())
}

fn periodic(
    name: &'static str,
    period: Duration,
    config: Arc<PipelineConfig>,
    pass: Pass,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let config = Arc::clone(&config);
            match tokio::task::spawn_blocking(move || pass(&config)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(component = name, error = %e, "pass failed"),
                Err(e) => error!(component = name, error = %e, "pass panicked"),
            }
        }
    })
}

fn stage_pass(config: &PipelineConfig) -> Result<(), String> {
    Stager::new(config).run().map(|_| ()).map_err(|e| e.to_string())
}

fn replicate_pass(config: &PipelineConfig) -> Result<(), String> {
    let transfer = RsyncTransfer::new(&config.replication);
    Replicator::new(config, transfer)
        .and_then(|replicator| replicator.run())
        .map(|_| ())
        .map_err(|e| e.to_string())
}

fn reclaim_pass(config: &PipelineConfig) -> Result<(), String> {
    Reclaimer::new(config)
        .and_then(|reclaimer| reclaimer.run())
        .map(|_| ())
        .map_err(|e| e.to_string())
}

fn watchdog_pass(config: &PipelineConfig) -> Result<(), String> {
    let notifier = notifier(config).map_err(|e| e.to_string())?;
    Watchdog::new(config, supervisor(config), notifier)
        .evaluate()
        .map(|_| ())
        .map_err(|e| e.to_string())
}
