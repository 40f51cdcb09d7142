//! CLI command implementations.

pub mod ledger;
pub mod reclaim;
pub mod replicate;
pub mod run;
pub mod stage;
pub mod status;
pub mod units;
pub mod watchdog;

use camrec_core::{CommandNotifier, LogNotifier, Notifier, PipelineConfig, SystemctlSupervisor};
use std::path::Path;

/// Loads and validates the pipeline configuration.
pub fn load_config(path: &Path) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    Ok(PipelineConfig::load(path)?)
}

/// The notifier the configuration asks for.
pub fn notifier(config: &PipelineConfig) -> Result<Box<dyn Notifier>, Box<dyn std::error::Error>> {
    Ok(match &config.notify.command {
        Some(argv) => Box::new(CommandNotifier::new(
            argv.clone(),
            config.watchdog.action_timeout(),
        )?),
        None => Box::new(LogNotifier),
    })
}

/// Supervision through systemctl, bounded by the watchdog action timeout.
pub fn supervisor(config: &PipelineConfig) -> SystemctlSupervisor {
    SystemctlSupervisor::new(config.watchdog.action_timeout())
}
