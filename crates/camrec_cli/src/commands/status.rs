//! Status command implementation.

use super::supervisor;
use camrec_core::{PipelineConfig, StateFile, Supervisor, SyncLedger};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::SystemTime;

/// Pipeline status of one station.
#[derive(Debug, Default, Serialize)]
pub struct StationStatus {
    /// Station id.
    pub station: String,
    /// Producer unit.
    pub unit: String,
    /// Whether the unit is running, if systemd could be asked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    /// Watchdog health as of its last evaluation.
    pub health: String,
    /// Age of the newest live segment in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest_age_secs: Option<u64>,
    /// Segments in the live tree.
    pub live: usize,
    /// Live segments old enough to stage.
    pub closed: usize,
    /// Segments in the staging tree.
    pub staged: usize,
    /// Staged segments not yet in the ledger.
    pub pending: usize,
}

/// Prints per-station status.
pub fn run(config: &PipelineConfig, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = config.segment_store();
    let ledger = SyncLedger::open(&config.ledger_dir)?
        .with_scan_window(config.replication.ledger_scan_days);
    let health = StateFile::new(config.state_dir()).load()?;
    let supervisor = supervisor(config);
    let now = SystemTime::now();

    let mut stations: BTreeSet<String> = store.list_stations()?.into_iter().collect();
    stations.extend(config.stations.iter().map(|s| s.id.clone()));

    let recorded = ledger.recorded_set()?;
    let mut staged: BTreeMap<String, (usize, usize)> = BTreeMap::new();
    for file in store.staged_segments()? {
        let counts = staged.entry(file.name.station.clone()).or_default();
        counts.0 += 1;
        if !recorded.contains(&file.relative) {
            counts.1 += 1;
        }
    }
    stations.extend(staged.keys().cloned());

    let mut result = Vec::new();
    for station in &stations {
        let segments = store.list_segments(station)?;
        let unit = config.unit_for(station);
        let (staged, pending) = staged.get(station).copied().unwrap_or_default();
        result.push(StationStatus {
            station: station.clone(),
            active: supervisor.is_active(&unit).ok(),
            unit,
            health: health.get(station).name().to_string(),
            newest_age_secs: segments
                .iter()
                .map(|s| s.age(now).as_secs())
                .min(),
            live: segments.len(),
            closed: segments
                .iter()
                .filter(|s| s.age(now) >= config.closure_threshold())
                .count(),
            staged,
            pending,
        });
    }

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &[StationStatus]) {
    println!(
        "{:<12} {:<15} {:>9} {:>5} {:>6} {:>6} {:>7}  unit",
        "STATION", "HEALTH", "NEWEST", "LIVE", "CLOSED", "STAGED", "PENDING"
    );
    for s in result {
        let newest = s
            .newest_age_secs
            .map(|secs| format!("{secs}s"))
            .unwrap_or_else(|| "-".into());
        let active = match s.active {
            Some(true) => "active",
            Some(false) => "inactive",
            None => "unknown",
        };
        println!(
            "{:<12} {:<15} {:>9} {:>5} {:>6} {:>6} {:>7}  {} ({})",
            s.station, s.health, newest, s.live, s.closed, s.staged, s.pending, s.unit, active
        );
    }
}
