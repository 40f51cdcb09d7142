//! Replicate command implementation.

use camrec_core::PipelineConfig;
use camrec_sync::{Replicator, RsyncTransfer};

/// Runs one replication pass with rsync.
pub fn run(config: &PipelineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let transfer = RsyncTransfer::new(&config.replication);
    let report = Replicator::new(config, transfer)?.run()?;

    if report.skipped {
        println!("replication already running elsewhere, skipped");
        return Ok(());
    }
    if report.reclaimed_stale_lock {
        println!("reclaimed replication lock from a dead holder");
    }
    println!(
        "{} pending, {} transferred, {} not confirmed",
        report.pending, report.transferred, report.failed
    );
    Ok(())
}
