//! Best-effort operator notification.

use crate::error::{CoreError, CoreResult};
use crate::process::run_command;
use parking_lot::Mutex;
use std::process::Command;
use std::time::Duration;
use tracing::warn;

/// Placeholder in a notify command replaced by the subject.
pub const SUBJECT_PLACEHOLDER: &str = "{subject}";

/// Delivers a (subject, body) message.
pub trait Notifier: Send + Sync {
    /// Sends one message. Callers treat failure as non-fatal.
    fn notify(&self, subject: &str, body: &str) -> CoreResult<()>;
}

impl<N: Notifier + ?Sized> Notifier for Box<N> {
    fn notify(&self, subject: &str, body: &str) -> CoreResult<()> {
        (**self).notify(subject, body)
    }
}

impl<N: Notifier + ?Sized> Notifier for std::sync::Arc<N> {
    fn notify(&self, subject: &str, body: &str) -> CoreResult<()> {
        (**self).notify(subject, body)
    }
}

/// Writes notifications to the log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, subject: &str, body: &str) -> CoreResult<()> {
        warn!(subject, body, "notification");
        Ok(())
    }
}

/// Pipes the body into an external command such as `mail`.
///
/// Arguments equal to `{subject}` are replaced by the subject.
#[derive(Debug, Clone)]
pub struct CommandNotifier {
    argv: Vec<String>,
    timeout: Duration,
}

impl CommandNotifier {
    /// Creates a notifier running `argv`.
    pub fn new(argv: Vec<String>, timeout: Duration) -> CoreResult<Self> {
        if argv.is_empty() {
            return Err(CoreError::config("notify.command must not be empty"));
        }
        Ok(Self { argv, timeout })
    }

    fn command(&self, subject: &str) -> Command {
        let mut cmd = Command::new(&self.argv[0]);
        cmd.args(
            self.argv[1..]
                .iter()
                .map(|arg| arg.replace(SUBJECT_PLACEHOLDER, subject)),
        );
        cmd
    }
}

impl Notifier for CommandNotifier {
    fn notify(&self, subject: &str, body: &str) -> CoreResult<()> {
        let out = run_command(
            self.command(subject),
            Some(body.as_bytes().to_vec()),
            self.timeout,
        )
        .map_err(|e| CoreError::notify(e.to_string()))?;
        if !out.status.success() {
            return Err(CoreError::notify(format!(
                "{} exited with {}: {}",
                self.argv[0],
                out.status,
                out.stderr_summary()
            )));
        }
        Ok(())
    }
}

/// A message captured by [`MockNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// Subject line.
    pub subject: String,
    /// Message body.
    pub body: String,
}

/// Records notifications for tests.
#[derive(Debug, Default)]
pub struct MockNotifier {
    sent: Mutex<Vec<SentMessage>>,
    fail: Mutex<bool>,
}

impl MockNotifier {
    /// Creates an empty mock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent notifications fail (the message is still recorded).
    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock() = fail;
    }

    /// Messages sent so far.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    /// Forgets sent messages.
    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

impl Notifier for MockNotifier {
    fn notify(&self, subject: &str, body: &str) -> CoreResult<()> {
        self.sent.lock().push(SentMessage {
            subject: subject.to_string(),
            body: body.to_string(),
        });
        if *self.fail.lock() {
            return Err(CoreError::notify("simulated delivery failure"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_records_even_when_failing() {
        let mock = MockNotifier::new();
        mock.notify("a", "b").unwrap();
        mock.set_fail(true);
        assert!(mock.notify("c", "d").is_err());
        assert_eq!(mock.sent().len(), 2);
        assert_eq!(mock.sent()[0].subject, "a");
    }

    #[test]
    fn empty_command_rejected() {
        assert!(CommandNotifier::new(Vec::new(), Duration::from_secs(1)).is_err());
    }

    #[test]
    fn log_notifier_never_fails() {
        LogNotifier.notify("subject", "body").unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn command_receives_subject_and_body() {
        let temp = tempfile::tempdir().unwrap();
        let out = temp.path().join("mail.txt");
        let script = format!("echo \"$1\" > {0}; cat >> {0}", out.display());
        let notifier = CommandNotifier::new(
            vec!["sh".into(), "-c".into(), script, "sh".into(), "{subject}".into()],
            Duration::from_secs(10),
        )
        .unwrap();
        notifier.notify("[camrec] ROST1 stalled", "idle 1300s\n").unwrap();
        let written = std::fs::read_to_string(out).unwrap();
        assert_eq!(written, "[camrec] ROST1 stalled\nidle 1300s\n");
    }

    #[cfg(unix)]
    #[test]
    fn command_failure_is_notify_error() {
        let notifier = CommandNotifier::new(vec!["false".into()], Duration::from_secs(5)).unwrap();
        let err = notifier.notify("s", "b").unwrap_err();
        assert!(matches!(err, CoreError::Notify { .. }));
    }
}
