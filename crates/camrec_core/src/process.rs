//! Bounded execution of external commands.

use crate::error::{CoreError, CoreResult};
use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit status.
    pub status: ExitStatus,
    /// Everything written to stdout.
    pub stdout: Vec<u8>,
    /// Everything written to stderr.
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    /// Exit code, or `None` if killed by a signal.
    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }

    /// Stdout as lossy UTF-8.
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Last non-empty stderr line, for error messages.
    pub fn stderr_summary(&self) -> String {
        String::from_utf8_lossy(&self.stderr)
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or("")
            .trim()
            .to_string()
    }
}

/// Runs `command`, feeding `stdin` and killing it after `timeout`.
///
/// Output is drained on helper threads so a chatty child never blocks
/// on a full pipe.
pub fn run_command(
    mut command: Command,
    stdin: Option<Vec<u8>>,
    timeout: Duration,
) -> CoreResult<CommandOutput> {
    let program = command.get_program().to_string_lossy().into_owned();
    command
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn()?;
    debug!(program = %program, pid = child.id(), "spawned");

    let writer = match (stdin, child.stdin.take()) {
        (Some(input), Some(mut pipe)) => Some(thread::spawn(move || {
            // A child that exits early closes the pipe; that is its business.
            let _ = pipe.write_all(&input);
        })),
        _ => None,
    };
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let started = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if started.elapsed() >= timeout {
            warn!(program = %program, secs = timeout.as_secs(), "killing timed-out command");
            let _ = child.kill();
            let _ = child.wait();
            return Err(CoreError::Timeout {
                program,
                after: timeout,
            });
        }
        thread::sleep(POLL_INTERVAL);
    };

    if let Some(writer) = writer {
        let _ = writer.join();
    }
    Ok(CommandOutput {
        status,
        stdout: collect(stdout),
        stderr: collect(stderr),
    })
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn collect(handle: Option<thread::JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn captures_output_and_stdin() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "cat; echo oops >&2; exit 3"]);
        let out = run_command(cmd, Some(b"hello\n".to_vec()), Duration::from_secs(10)).unwrap();
        assert_eq!(out.code(), Some(3));
        assert_eq!(out.stdout_text(), "hello\n");
        assert_eq!(out.stderr_summary(), "oops");
    }

    #[test]
    fn kills_on_timeout() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 30"]);
        let err = run_command(cmd, None, Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, CoreError::Timeout { .. }));
    }

    #[test]
    fn missing_program_is_io_error() {
        let cmd = Command::new("/nonexistent/camrec-test-binary");
        let err = run_command(cmd, None, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, CoreError::Io(_)));
    }
}
