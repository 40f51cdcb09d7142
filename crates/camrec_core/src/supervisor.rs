//! Producer supervision collaborator.

use crate::error::{CoreError, CoreResult};
use crate::process::run_command;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Restarts and checks producer units.
pub trait Supervisor: Send + Sync {
    /// Requests a restart of `unit`. Fire-and-forget: success means the
    /// request was accepted, not that the producer is healthy again.
    fn restart(&self, unit: &str) -> CoreResult<()>;

    /// Returns true if `unit` is currently running.
    fn is_active(&self, unit: &str) -> CoreResult<bool>;
}

impl<S: Supervisor + ?Sized> Supervisor for Arc<S> {
    fn restart(&self, unit: &str) -> CoreResult<()> {
        (**self).restart(unit)
    }

    fn is_active(&self, unit: &str) -> CoreResult<bool> {
        (**self).is_active(unit)
    }
}

impl<S: Supervisor + ?Sized> Supervisor for Box<S> {
    fn restart(&self, unit: &str) -> CoreResult<()> {
        (**self).restart(unit)
    }

    fn is_active(&self, unit: &str) -> CoreResult<bool> {
        (**self).is_active(unit)
    }
}

/// Supervision through `systemctl`.
#[derive(Debug, Clone)]
pub struct SystemctlSupervisor {
    program: PathBuf,
    timeout: Duration,
}

impl SystemctlSupervisor {
    /// Uses `systemctl` from `PATH`, bounding each call by `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            program: PathBuf::from("systemctl"),
            timeout,
        }
    }

    /// Uses a different systemctl binary.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }
}

impl Supervisor for SystemctlSupervisor {
    fn restart(&self, unit: &str) -> CoreResult<()> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["restart", "--no-block", unit]);
        let out = run_command(cmd, None, self.timeout)
            .map_err(|e| CoreError::supervisor(unit, e.to_string()))?;
        if !out.status.success() {
            return Err(CoreError::supervisor(
                unit,
                format!("systemctl exited with {}: {}", out.status, out.stderr_summary()),
            ));
        }
        info!(unit, "restart requested");
        Ok(())
    }

    fn is_active(&self, unit: &str) -> CoreResult<bool> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["is-active", "--quiet", unit]);
        let out = run_command(cmd, None, self.timeout)
            .map_err(|e| CoreError::supervisor(unit, e.to_string()))?;
        Ok(out.status.success())
    }
}

/// In-memory supervisor for tests.
#[derive(Debug, Default)]
pub struct MockSupervisor {
    restarts: Mutex<Vec<String>>,
    active: Mutex<HashSet<String>>,
    fail_restart: Mutex<bool>,
}

impl MockSupervisor {
    /// Creates a mock with every unit inactive.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent restarts fail (or succeed again).
    pub fn set_fail_restart(&self, fail: bool) {
        *self.fail_restart.lock() = fail;
    }

    /// Marks `unit` active or inactive.
    pub fn set_active(&self, unit: &str, active: bool) {
        let mut units = self.active.lock();
        if active {
            units.insert(unit.to_string());
        } else {
            units.remove(unit);
        }
    }

    /// Units restarted so far, in order.
    pub fn restarts(&self) -> Vec<String> {
        self.restarts.lock().clone()
    }

    /// Forgets recorded restarts.
    pub fn clear(&self) {
        self.restarts.lock().clear();
    }
}

impl Supervisor for MockSupervisor {
    fn restart(&self, unit: &str) -> CoreResult<()> {
        if *self.fail_restart.lock() {
            return Err(CoreError::supervisor(unit, "simulated restart failure"));
        }
        self.restarts.lock().push(unit.to_string());
        self.active.lock().insert(unit.to_string());
        Ok(())
    }

    fn is_active(&self, unit: &str) -> CoreResult<bool> {
        Ok(self.active.lock().contains(unit))
    }
}
