//! Reclaim command implementation.

use camrec_core::{PipelineConfig, Reclaimer};

/// Runs one reclaim pass.
pub fn run(config: &PipelineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let report = Reclaimer::new(config)?.run()?;
    if report.skipped {
        println!("reclaim already running elsewhere, skipped");
        return Ok(());
    }
    println!(
        "examined {}, deleted {}, retained {}, pruned {} director{}",
        report.examined,
        report.deleted,
        report.retained,
        report.pruned_dirs,
        if report.pruned_dirs == 1 { "y" } else { "ies" }
    );
    if !report.failures.is_empty() {
        for failure in &report.failures {
            eprintln!("  {} [{}]: {}", failure.subject, failure.class, failure.message);
        }
        return Err(format!("{} reclaim failure(s)", report.failures.len()).into());
    }
    Ok(())
}
