//! Units command implementation: systemd service and timer generation.

use camrec_core::{PipelineConfig, StationConfig};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Periodic camrec passes that get a oneshot service and a timer.
const STAGES: [&str; 4] = ["stage", "replicate", "reclaim", "watchdog"];

/// A generated unit file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFile {
    /// File name, e.g. `camrec-stage.timer`.
    pub name: String,
    /// File contents.
    pub contents: String,
}

/// Writes all unit files into `out`.
pub fn run(
    config: &PipelineConfig,
    config_path: &Path,
    exe: &Path,
    out: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    fs::create_dir_all(out)?;
    let units = render(config, config_path, exe);
    for unit in &units {
        fs::write(out.join(&unit.name), &unit.contents)?;
        println!("wrote {}", out.join(&unit.name).display());
    }
    println!();
    println!("Install with:");
    println!("  sudo cp {}/* /etc/systemd/system/", out.display());
    println!("  sudo systemctl daemon-reload");
    for stage in STAGES {
        println!("  sudo systemctl enable --now camrec-{stage}.timer");
    }
    Ok(())
}

/// Renders producer services and camrec services and timers.
pub fn render(config: &PipelineConfig, config_path: &Path, exe: &Path) -> Vec<UnitFile> {
    let mut units = Vec::new();

    for station in &config.stations {
        match &station.command {
            Some(command) => units.push(producer_service(station, command)),
            None => warn!(
                station = %station.id,
                "no producer command configured, skipping service"
            ),
        }
    }

    for stage in STAGES {
        let period = match stage {
            "watchdog" => config.watchdog.evaluation_period(),
            _ => config.closure_threshold(),
        };
        units.push(oneshot_service(stage, exe, config_path));
        units.push(timer(stage, period));
    }
    units
}

fn unit_file_name(unit: &str) -> String {
    if unit.contains('.') {
        unit.to_string()
    } else {
        format!("{unit}.service")
    }
}

fn producer_service(station: &StationConfig, command: &str) -> UnitFile {
    UnitFile {
        name: unit_file_name(&station.unit_name()),
        contents: format!(
            "[Unit]\n\
             Description=Camera recorder for station {id}\n\
             After=network-online.target\n\
             Wants=network-online.target\n\
             \n\
             [Service]\n\
             Type=simple\n\
             ExecStart={command}\n\
             Restart=always\n\
             RestartSec=10\n\
             \n\
             [Install]\n\
             WantedBy=multi-user.target\n",
            id = station.id,
        ),
    }
}

fn oneshot_service(stage: &str, exe: &Path, config_path: &Path) -> UnitFile {
    UnitFile {
        name: format!("camrec-{stage}.service"),
        contents: format!(
            "[Unit]\n\
             Description=camrec {stage} pass\n\
             \n\
             [Service]\n\
             Type=oneshot\n\
             ExecStart={exe} --config {config} {stage}\n",
            exe = exe.display(),
            config = config_path.display(),
        ),
    }
}

fn timer(stage: &str, period: Duration) -> UnitFile {
    UnitFile {
        name: format!("camrec-{stage}.timer"),
        contents: format!(
            "[Unit]\n\
             Description=Run camrec {stage} every {secs}s\n\
             \n\
             [Timer]\n\
             OnBootSec=2min\n\
             OnUnitActiveSec={secs}s\n\
             Unit=camrec-{stage}.service\n\
             \n\
             [Install]\n\
             WantedBy=timers.target\n",
            secs = period.as_secs(),
        ),
    }
}
