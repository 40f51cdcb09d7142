//! Stage command implementation.

use camrec_core::{PipelineConfig, Stager};

/// Runs one stager pass.
pub fn run(config: &PipelineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let report = Stager::new(config).run()?;
    println!(
        "staged {} segment(s) from {} station(s), {} already staged",
        report.staged, report.stations, report.already_staged
    );
    if !report.is_clean() {
        for failure in &report.failures {
            eprintln!("  {} [{}]: {}", failure.subject, failure.class, failure.message);
        }
        return Err(format!("{} staging failure(s)", report.failures.len()).into());
    }
    Ok(())
}
