//! rsync-backed transfer.
//!
//! One invocation per run covers the whole pending batch:
//!
//! ```text
//! rsync -a --partial --inplace --files-from=- --out-format=%n <staging>/ <target>
//! ```
//!
//! rsync handles resume and per-file retry itself. Its output lists each
//! file it transferred, which is how a partial run (exit 23/24) confirms
//! individual files.

use crate::error::{SyncError, SyncResult};
use crate::transfer::{Transfer, TransferOutcome};
use camrec_core::process::run_command;
use camrec_core::{CoreError, ReplicationConfig};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Partial transfer due to error.
const EXIT_PARTIAL: i32 = 23;
/// Partial transfer because source files vanished.
const EXIT_VANISHED: i32 = 24;
/// Exit codes worth re-invoking for: socket I/O, protocol stream,
/// data-send timeout, connection timeout.
const RETRYABLE_EXITS: [i32; 4] = [10, 12, 30, 35];

/// Transfer through an `rsync` subprocess.
#[derive(Debug, Clone)]
pub struct RsyncTransfer {
    program: PathBuf,
    options: Vec<String>,
    timeout: Duration,
}

impl RsyncTransfer {
    /// Creates an rsync transfer from the replication settings.
    pub fn new(config: &ReplicationConfig) -> Self {
        Self {
            program: config.rsync_path.clone(),
            options: config.rsync_options.clone(),
            timeout: config.timeout(),
        }
    }

    /// Replaces the rsync binary.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Replaces the option list.
    #[must_use]
    pub fn with_options(mut self, options: Vec<String>) -> Self {
        self.options = options;
        self
    }

    /// Sets the invocation timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self, source_root: &Path, target: &str) -> Command {
        let mut source = source_root.as_os_str().to_os_string();
        source.push("/");

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.options)
            .arg("--files-from=-")
            .arg("--out-format=%n")
            .arg(source)
            .arg(target);
        cmd
    }
}

impl Transfer for RsyncTransfer {
    fn transfer(
        &self,
        source_root: &Path,
        files: &[String],
        target: &str,
    ) -> SyncResult<TransferOutcome> {
        if files.is_empty() {
            return Ok(TransferOutcome::default());
        }

        let mut stdin = files.join("\n").into_bytes();
        stdin.push(b'\n');
        debug!(files = files.len(), target, "invoking rsync");

        let output = match run_command(self.command(source_root, target), Some(stdin), self.timeout) {
            Ok(output) => output,
            Err(CoreError::Timeout { after, .. }) => return Err(SyncError::Timeout { after }),
            Err(CoreError::Io(e)) => {
                return Err(SyncError::transfer_fatal(format!(
                    "cannot run {}: {e}",
                    self.program.display()
                )))
            }
            Err(e) => return Err(e.into()),
        };

        let outcome = classify_exit(
            output.code(),
            &output.stdout_text(),
            &output.stderr_summary(),
            files,
        )?;
        if outcome.is_partial() {
            warn!(
                transferred = outcome.transferred.len(),
                failed = outcome.failed.len(),
                code = output.code(),
                "rsync reported a partial transfer"
            );
        } else {
            info!(transferred = outcome.transferred.len(), "rsync completed");
        }
        Ok(outcome)
    }
}

/// Decides which requested files an rsync run confirmed.
///
/// Exit 0 confirms everything requested, including files rsync skipped as
/// already up to date. After a partial run only files named in the output
/// are confirmed; an up-to-date file that was not listed is confirmed by a
/// later clean run instead.
pub fn classify_exit(
    code: Option<i32>,
    stdout: &str,
    stderr: &str,
    files: &[String],
) -> SyncResult<TransferOutcome> {
    match code {
        Some(0) => Ok(TransferOutcome::complete(files)),
        Some(EXIT_PARTIAL | EXIT_VANISHED) => {
            let listed: HashSet<&str> = stdout
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .collect();
            let (transferred, failed): (Vec<String>, Vec<String>) = files
                .iter()
                .cloned()
                .partition(|file| listed.contains(file.as_str()));
            Ok(TransferOutcome {
                transferred,
                failed,
            })
        }
        Some(code) => Err(SyncError::Transfer {
            message: format!("rsync exited with {code}: {stderr}"),
            retryable: RETRYABLE_EXITS.contains(&code),
        }),
        None => Err(SyncError::transfer_retryable(format!(
            "rsync killed by signal: {stderr}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files() -> Vec<String> {
        vec![
            "ROST1/2025-05-28/ROST1_20250528T120000.mkv".into(),
            "ROST1/2025-05-28/ROST1_20250528T121000.mkv".into(),
        ]
    }

    #[test]
    fn clean_exit_confirms_everything() {
        let outcome = classify_exit(Some(0), "", "", &files()).unwrap();
        assert_eq!(outcome.transferred, files());
        assert!(!outcome.is_partial());
    }

    #[test]
    fn partial_exit_confirms_listed_files_only() {
        let stdout = "ROST1/\nROST1/2025-05-28/\nROST1/2025-05-28/ROST1_20250528T120000.mkv\n";
        let outcome = classify_exit(Some(23), stdout, "some files failed", &files()).unwrap();
        assert_eq!(outcome.transferred, vec![files()[0].clone()]);
        assert_eq!(outcome.failed, vec![files()[1].clone()]);

        let outcome = classify_exit(Some(24), "", "", &files()).unwrap();
        assert!(outcome.transferred.is_empty());
    }

    #[test]
    fn other_exits_fail_the_batch() {
        let err = classify_exit(Some(12), "", "protocol stream error", &files()).unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("protocol stream error"));

        let err = classify_exit(Some(1), "", "syntax error", &files()).unwrap_err();
        assert!(!err.is_retryable());

        assert!(classify_exit(None, "", "", &files()).unwrap_err().is_retryable());
    }

    fn fake_rsync(script: &str) -> RsyncTransfer {
        RsyncTransfer::new(&ReplicationConfig::new("nas:/cameras"))
            .with_program("sh")
            .with_options(vec!["-c".into(), script.into(), "rsync".into()])
            .with_timeout(Duration::from_secs(10))
    }

    #[cfg(unix)]
    #[test]
    fn runs_subprocess_with_file_list() {
        // Echo back only the first requested file, then report a partial run.
        let rsync = fake_rsync("read first; echo \"$first\"; cat >/dev/null; exit 23");
        let outcome = rsync
            .transfer(Path::new("/srv/ready_for_backup"), &files(), "nas:/cameras")
            .unwrap();
        assert_eq!(outcome.transferred, vec![files()[0].clone()]);
        assert_eq!(outcome.failed, vec![files()[1].clone()]);
    }

    #[cfg(unix)]
    #[test]
    fn passes_source_with_trailing_slash_and_target() {
        let temp = tempfile::tempdir().unwrap();
        let args = temp.path().join("args");
        let script = format!("cat >/dev/null; printf '%s\\n' \"$@\" > {}", args.display());
        fake_rsync(&script)
            .transfer(Path::new("/srv/ready_for_backup"), &files(), "nas:/cameras")
            .unwrap();

        let recorded = std::fs::read_to_string(args).unwrap();
        let lines: Vec<&str> = recorded.lines().collect();
        assert_eq!(
            lines,
            vec!["--files-from=-", "--out-format=%n", "/srv/ready_for_backup/", "nas:/cameras"]
        );
    }

    #[test]
    fn missing_binary_is_not_retryable() {
        let rsync = RsyncTransfer::new(&ReplicationConfig::new("nas:/cameras"))
            .with_program("/nonexistent/rsync");
        let err = rsync
            .transfer(Path::new("/tmp"), &files(), "nas:/cameras")
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn empty_batch_skips_invocation() {
        let rsync = RsyncTransfer::new(&ReplicationConfig::new("nas:/cameras"))
            .with_program("/nonexistent/rsync");
        let outcome = rsync.transfer(Path::new("/tmp"), &[], "nas:/cameras").unwrap();
        assert_eq!(outcome, TransferOutcome::default());
    }
}
