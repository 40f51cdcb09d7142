//! Watchdog command implementation.

use super::{notifier, supervisor};
use camrec_core::{PipelineConfig, Watchdog, WatchdogAction};

/// Runs one watchdog evaluation.
pub fn run(config: &PipelineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let watchdog = Watchdog::new(config, supervisor(config), notifier(config)?);
    let report = watchdog.evaluate()?;
    if report.skipped {
        println!("watchdog already running elsewhere, skipped");
        return Ok(());
    }

    for station in &report.stations {
        let idle = station
            .idle
            .map(|d| format!("{}s", d.as_secs()))
            .unwrap_or_else(|| "no segments".into());
        let action = match &station.action {
            WatchdogAction::None => String::new(),
            WatchdogAction::Recovered => " (recovered)".into(),
            WatchdogAction::RestartIssued => format!(" (restarted {})", station.unit),
            WatchdogAction::RestartFailed(e) => format!(" (restart failed: {e})"),
            WatchdogAction::AwaitingRestart => " (awaiting restart)".into(),
        };
        println!(
            "{:<12} {:<15} idle {}{}",
            station.station,
            station.health.name(),
            idle,
            action
        );
    }
    for failure in &report.failures {
        eprintln!("  {} [{}]: {}", failure.subject, failure.class, failure.message);
    }
    Ok(())
}
