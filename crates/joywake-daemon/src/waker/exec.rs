//! Wake the screen by running an external command

use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;

use super::{FailFlag, Waker, WakerError};

/// Consecutive soft failures after which a command is given up on
pub const SOFT_FAILURE_LIMIT: u32 = 3;

/// How long a single run may take before it is killed
pub const EXEC_TIMEOUT: Duration = Duration::from_secs(10);

/// What to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecCommand {
    /// Program and arguments, no shell involved
    Args(Vec<String>),
    /// A line for `sh -c`
    Shell(String),
}

impl ExecCommand {
    fn to_command(&self) -> Command {
        let mut command = match self {
            Self::Args(args) => {
                let mut command = Command::new(&args[0]);
                command.args(&args[1..]);
                command
            }
            Self::Shell(line) => {
                let mut command = Command::new("sh");
                command.arg("-c").arg(line);
                command
            }
        };
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

impl fmt::Display for ExecCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Args(args) => write!(f, "{}", args.join(" ")),
            Self::Shell(line) => write!(f, "{}", line),
        }
    }
}

/// A run that completed but did not do its job
#[derive(Debug, thiserror::Error)]
enum ExecFailure {
    #[error("{0}")]
    Status(ExitStatus),
    #[error("reported failure: {0}")]
    Stderr(String),
    #[error("did not finish within {0:?}")]
    TimedOut(Duration),
}

/// Runs a command on every wake.
///
/// A nonzero exit, or a zero exit whose stderr matches the failure pattern,
/// is a soft failure; after [`SOFT_FAILURE_LIMIT`] of them in a row the
/// waker is failed for good. A run that outlives its timeout is killed and
/// counts as a soft failure. A command that cannot be started at all fails
/// it immediately.
#[derive(Debug)]
pub struct ExecWaker {
    name: String,
    command: ExecCommand,
    stderr_failure: Option<Regex>,
    timeout: Duration,
    soft_failures: AtomicU32,
    failed: FailFlag,
}

impl ExecWaker {
    /// Build from exactly one of an argument vector or a shell line
    pub fn new(
        name: impl Into<String>,
        args: Option<Vec<String>>,
        shell: Option<String>,
    ) -> Result<Self, WakerError> {
        let name = name.into();
        let command = match (args, shell) {
            (Some(args), None) if !args.is_empty() => ExecCommand::Args(args),
            (None, Some(line)) if !line.trim().is_empty() => ExecCommand::Shell(line),
            _ => return Err(WakerError::CommandSpec { name }),
        };

        Ok(Self {
            name,
            command,
            stderr_failure: None,
            timeout: EXEC_TIMEOUT,
            soft_failures: AtomicU32::new(0),
            failed: FailFlag::default(),
        })
    }

    pub fn args(name: impl Into<String>, args: &[&str]) -> Result<Self, WakerError> {
        Self::new(
            name,
            Some(args.iter().map(|arg| arg.to_string()).collect()),
            None,
        )
    }

    pub fn shell(name: impl Into<String>, line: impl Into<String>) -> Result<Self, WakerError> {
        Self::new(name, None, Some(line.into()))
    }

    /// Treat a successful exit as failure when stderr matches `pattern`
    pub fn with_stderr_failure(mut self, pattern: &str) -> Result<Self, WakerError> {
        let regex = Regex::new(pattern).map_err(|source| WakerError::Pattern {
            name: self.name.clone(),
            source,
        })?;
        self.stderr_failure = Some(regex);
        Ok(self)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn command(&self) -> &ExecCommand {
        &self.command
    }

    /// Consecutive soft failures so far
    pub fn soft_failures(&self) -> u32 {
        self.soft_failures.load(Ordering::Acquire)
    }

    /// Fail without running anything; logs only on the first call
    pub(crate) fn fail_permanently(&self, reason: fmt::Arguments<'_>) {
        if self.failed.set() {
            tracing::warn!(waker = %self.name, "{}; disabling", reason);
        }
    }

    fn classify(&self, status: ExitStatus, stderr: &[u8]) -> Result<(), ExecFailure> {
        if !status.success() {
            return Err(ExecFailure::Status(status));
        }
        if let Some(pattern) = &self.stderr_failure {
            let stderr = String::from_utf8_lossy(stderr);
            if pattern.is_match(&stderr) {
                return Err(ExecFailure::Stderr(stderr.trim().to_string()));
            }
        }
        Ok(())
    }

    fn record_failure(&self, failure: &ExecFailure) {
        let count = self.soft_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if count >= SOFT_FAILURE_LIMIT {
            self.fail_permanently(format_args!(
                "`{}` {} ({} failures in a row)",
                self.command, failure, count
            ));
        } else {
            tracing::info!(
                waker = %self.name,
                "`{}` {} (attempt {} of {})",
                self.command,
                failure,
                count,
                SOFT_FAILURE_LIMIT
            );
        }
    }
}

#[async_trait]
impl Waker for ExecWaker {
    fn name(&self) -> &str {
        &self.name
    }

    fn failed(&self) -> bool {
        self.failed.is_set()
    }

    async fn wake(&self) {
        if self.failed() {
            return;
        }

        // Dropping the output future on timeout kills the child
        let mut command = self.command.to_command();
        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                self.fail_permanently(format_args!("cannot run `{}`: {}", self.command, e));
                return;
            }
            Err(_) => {
                self.record_failure(&ExecFailure::TimedOut(self.timeout));
                return;
            }
        };

        match self.classify(output.status, &output.stderr) {
            Ok(()) => {
                let previous = self.soft_failures.swap(0, Ordering::AcqRel);
                if previous > 0 {
                    tracing::debug!(
                        waker = %self.name,
                        "Recovered after {} failed attempt(s)",
                        previous
                    );
                } else {
                    tracing::trace!(waker = %self.name, "Woke");
                }
            }
            Err(failure) => self.record_failure(&failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_requires_exactly_one_command_form() {
        assert!(matches!(
            ExecWaker::new("none", None, None),
            Err(WakerError::CommandSpec { .. })
        ));
        assert!(matches!(
            ExecWaker::new("both", Some(vec!["true".into()]), Some("true".into())),
            Err(WakerError::CommandSpec { .. })
        ));
        assert!(matches!(
            ExecWaker::new("empty", Some(Vec::new()), None),
            Err(WakerError::CommandSpec { .. })
        ));
        assert!(matches!(
            ExecWaker::shell("blank", "   "),
            Err(WakerError::CommandSpec { .. })
        ));

        let waker =
            ExecWaker::args("xscreensaver", &["xscreensaver-command", "-deactivate"]).unwrap();
        assert_eq!(waker.command().to_string(), "xscreensaver-command -deactivate");
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let result = ExecWaker::shell("custom", "true").unwrap().with_stderr_failure("(unclosed");
        assert!(matches!(result, Err(WakerError::Pattern { .. })));
    }

    #[tokio::test]
    async fn test_success_keeps_waker_alive() {
        let waker = ExecWaker::shell("custom", "exit 0").unwrap();
        waker.wake().await;
        waker.wake().await;
        assert!(!waker.failed());
        assert_eq!(waker.soft_failures(), 0);
    }

    #[tokio::test]
    async fn test_fails_on_third_consecutive_failure() {
        let waker = ExecWaker::shell("custom", "exit 1").unwrap();

        waker.wake().await;
        assert_eq!(waker.soft_failures(), 1);
        assert!(!waker.failed());

        waker.wake().await;
        assert_eq!(waker.soft_failures(), 2);
        assert!(!waker.failed());

        waker.wake().await;
        assert!(waker.failed());

        // Failed wakers do nothing further
        waker.wake().await;
        assert_eq!(waker.soft_failures(), 3);
    }

    #[tokio::test]
    async fn test_success_resets_soft_counter() {
        let mut status = tempfile::NamedTempFile::new().unwrap();
        write!(status, "1").unwrap();
        let line = format!("exit $(cat {})", status.path().display());
        let waker = ExecWaker::shell("custom", line).unwrap();

        waker.wake().await;
        waker.wake().await;
        assert_eq!(waker.soft_failures(), 2);

        std::fs::write(status.path(), "0").unwrap();
        waker.wake().await;
        assert_eq!(waker.soft_failures(), 0);

        std::fs::write(status.path(), "1").unwrap();
        waker.wake().await;
        waker.wake().await;
        assert!(!waker.failed());
    }

    #[tokio::test]
    async fn test_stderr_pattern_counts_as_failure() {
        let waker = ExecWaker::shell("xscreensaver", "echo 'no screensaver is running' >&2")
            .unwrap()
            .with_stderr_failure("no screensaver is running")
            .unwrap();

        waker.wake().await;
        assert_eq!(waker.soft_failures(), 1);

        let quiet = ExecWaker::shell("xscreensaver", "echo 'all good' >&2")
            .unwrap()
            .with_stderr_failure("no screensaver is running")
            .unwrap();
        quiet.wake().await;
        assert_eq!(quiet.soft_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_command_times_out_as_soft_failure() {
        let waker = ExecWaker::shell("custom", "sleep 1000").unwrap();
        let started = tokio::time::Instant::now();

        waker.wake().await;

        assert_eq!(waker.soft_failures(), 1);
        assert!(!waker.failed());
        assert!(started.elapsed() >= EXEC_TIMEOUT);
        assert!(started.elapsed() < Duration::from_secs(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_timeouts_fail_waker() {
        let waker = ExecWaker::shell("custom", "sleep 1000")
            .unwrap()
            .with_timeout(Duration::from_secs(1));

        for _ in 0..SOFT_FAILURE_LIMIT {
            waker.wake().await;
        }

        assert!(waker.failed());
    }

    #[tokio::test]
    async fn test_launch_failure_is_permanent() {
        let waker = ExecWaker::args("missing", &["/nonexistent/joywake-test-command"]).unwrap();
        waker.wake().await;
        assert!(waker.failed());
        assert_eq!(waker.soft_failures(), 0);
    }
}
