//! Ledger command implementation.

use camrec_core::{PipelineConfig, SyncLedger};
use chrono::NaiveDate;
use serde::Serialize;

/// Summary of one ledger partition.
#[derive(Debug, Serialize)]
pub struct PartitionSummary {
    /// Replication date.
    pub date: String,
    /// Number of recorded files.
    pub entries: usize,
}

/// Entries of one ledger partition.
#[derive(Debug, Serialize)]
pub struct PartitionEntries {
    /// Replication date.
    pub date: String,
    /// Recorded relative paths, in append order.
    pub entries: Vec<String>,
}

/// Lists partitions, or one partition's entries when `date` is given.
pub fn run(
    config: &PipelineConfig,
    date: Option<&str>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let ledger = SyncLedger::open(&config.ledger_dir)?;

    match date {
        Some(date) => {
            let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
                .map_err(|e| format!("invalid date {date:?}: {e}"))?;
            let result = PartitionEntries {
                date: date.to_string(),
                entries: ledger.entries(date)?,
            };
            match format {
                "json" => println!("{}", serde_json::to_string_pretty(&result)?),
                _ => {
                    for entry in &result.entries {
                        println!("{entry}");
                    }
                }
            }
        }
        None => {
            let mut partitions = Vec::new();
            for date in ledger.partitions()? {
                partitions.push(PartitionSummary {
                    date: date.to_string(),
                    entries: ledger.entries(date)?.len(),
                });
            }
            match format {
                "json" => println!("{}", serde_json::to_string_pretty(&partitions)?),
                _ => print_partitions(&partitions, config),
            }
        }
    }
    Ok(())
}

fn print_partitions(partitions: &[PartitionSummary], config: &PipelineConfig) {
    println!("camrec Sync Ledger");
    println!("==================");
    println!();
    println!("Directory: {}", config.ledger_dir.display());
    if let Some(days) = config.replication.ledger_scan_days {
        println!("Scan window: newest {days} partition(s)");
    }
    println!();
    if partitions.is_empty() {
        println!("No partitions.");
        return;
    }
    let total: usize = partitions.iter().map(|p| p.entries).sum();
    for partition in partitions {
        println!("  {}  {:>6} file(s)", partition.date, partition.entries);
    }
    println!();
    println!("Total: {total} file(s) in {} partition(s)", partitions.len());
}
