//! Single-command execution with captured output, timeouts and group kill.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace};
use zmirror_core::{Error, Result};

use crate::cancel::CancellationToken;
use crate::endpoint::{Elevation, Endpoint};

/// Poll interval for subprocess wait loops.
const WAIT_POLL: Duration = Duration::from_millis(25);

/// Grace period between SIGTERM and SIGKILL when terminating a group.
const TERM_GRACE: Duration = Duration::from_secs(2);

/// Default timeout for metadata probes (`zfs list`, `--version` checks).
///
/// Transfer stages deliberately get no timeout: a slow link must not kill a
/// correct transfer.
pub const METADATA_TIMEOUT: Duration = Duration::from_secs(60);

/// Captured output of a completed command.
#[derive(Clone, Debug, Default)]
pub struct CommandOutput {
    /// Everything the command wrote to stdout.
    pub stdout: String,
    /// Everything the command wrote to stderr.
    pub stderr: String,
}

/// Per-invocation options.
#[derive(Clone, Copy, Debug, Default)]
pub struct RunOptions {
    /// Wall-clock limit; `None` means unbounded.
    pub timeout: Option<Duration>,
}

impl RunOptions {
    /// Options for quick metadata commands.
    #[must_use]
    pub const fn metadata() -> Self {
        Self {
            timeout: Some(METADATA_TIMEOUT),
        }
    }

    /// Options for unbounded commands.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self { timeout: None }
    }
}

/// Executes commands against endpoints.
#[derive(Clone, Debug, Default)]
pub struct Runner {
    cancel: CancellationToken,
}

impl Runner {
    /// Creates a runner observing the given cancellation token.
    #[must_use]
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// The token this runner observes.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Runs `argv` on `endpoint`, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// - [`Error::CommandFailed`] on spawn failure, non-zero exit or timeout.
    /// - [`Error::Endpoint`] when a remote command fails with the SSH
    ///   client's connection-failure status (255).
    /// - [`Error::Cancelled`] when the token flips while waiting.
    pub fn run(
        &self,
        endpoint: &Endpoint,
        argv: &[String],
        elevation: Elevation,
        options: RunOptions,
    ) -> Result<CommandOutput> {
        let full_argv = endpoint.build_command(argv, elevation)?;
        trace!(argv = ?full_argv, "exec");

        let mut command = Command::new(&full_argv[0]);
        command
            .args(&full_argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        set_process_group(&mut command);

        let mut child = command.spawn().map_err(|err| {
            Error::command_failed(full_argv.clone(), format!("spawn failed: {err}"), "")
        })?;

        let stdout_reader = take_reader(child.stdout.take());
        let stderr_reader = take_reader(child.stderr.take());

        let status = self.wait(&mut child, options.timeout, &full_argv)?;

        let output = CommandOutput {
            stdout: join_reader(stdout_reader),
            stderr: join_reader(stderr_reader),
        };

        if status.success() {
            return Ok(output);
        }
        if !endpoint.is_local() && status.code() == Some(255) {
            // The OpenSSH client reserves 255 for its own failures.
            return Err(Error::Endpoint {
                endpoint: endpoint.describe(),
                message: output.stderr.trim_end().to_owned(),
            });
        }
        Err(Error::command_failed(
            full_argv,
            describe_status(status),
            &output.stderr,
        ))
    }

    /// Waits for `child`, honoring the timeout and the cancellation token.
    fn wait(
        &self,
        child: &mut Child,
        timeout: Option<Duration>,
        argv: &[String],
    ) -> Result<ExitStatus> {
        let deadline = timeout.map(|limit| Instant::now() + limit);
        loop {
            if let Some(status) = child.try_wait().map_err(|err| {
                Error::command_failed(argv.to_vec(), format!("wait failed: {err}"), "")
            })? {
                return Ok(status);
            }
            if self.cancel.is_cancelled() {
                terminate_group(child);
                return Err(Error::Cancelled);
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    terminate_group(child);
                    return Err(Error::command_failed(
                        argv.to_vec(),
                        "timed out".to_owned(),
                        "",
                    ));
                }
            }
            thread::sleep(WAIT_POLL);
        }
    }
}

/// Puts the child in its own process group so the whole group can be
/// terminated (`ssh` keeps running children of its own).
#[cfg(unix)]
pub(crate) fn set_process_group(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(not(unix))]
pub(crate) fn set_process_group(_command: &mut Command) {}

/// SIGTERM the child's process group, give it [`TERM_GRACE`], then SIGKILL.
pub(crate) fn terminate_group(child: &mut Child) {
    signal_group(child, false);
    let deadline = Instant::now() + TERM_GRACE;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return,
            Ok(None) if Instant::now() < deadline => thread::sleep(WAIT_POLL),
            _ => break,
        }
    }
    signal_group(child, true);
    let _ = child.wait();
}

#[cfg(unix)]
fn signal_group(child: &Child, kill: bool) {
    use rustix::process::{Pid, Signal, kill_process_group};
    let Ok(raw) = i32::try_from(child.id()) else {
        return;
    };
    let Some(pid) = Pid::from_raw(raw) else {
        return;
    };
    let signal = if kill { Signal::Kill } else { Signal::Term };
    if let Err(err) = kill_process_group(pid, signal) {
        debug!(pid = raw, ?signal, %err, "failed to signal process group");
    }
}

#[cfg(not(unix))]
fn signal_group(child: &Child, _kill: bool) {
    let _ = child;
}

/// Spawns a thread that slurps the pipe; `None` readers yield empty output.
pub(crate) fn take_reader<R>(pipe: Option<R>) -> Option<thread::JoinHandle<String>>
where
    R: Read + Send + 'static,
{
    pipe.map(|mut reader| {
        thread::spawn(move || {
            let mut buffer = String::new();
            let _ = read_lossy(&mut reader, &mut buffer);
            buffer
        })
    })
}

/// Joins a reader thread, tolerating a panicked reader.
pub(crate) fn join_reader(handle: Option<thread::JoinHandle<String>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

/// Reads the full stream, replacing invalid UTF-8 instead of failing.
fn read_lossy<R: Read>(reader: &mut R, buffer: &mut String) -> std::io::Result<()> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    buffer.push_str(&String::from_utf8_lossy(&bytes));
    Ok(())
}

/// Renders an exit status for error messages (`exit code 1`, `signal 13`).
#[must_use]
pub(crate) fn describe_status(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exit code {code}");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("signal {signal}");
        }
    }
    "unknown status".to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|part| (*part).to_owned()).collect()
    }

    #[test]
    fn run_captures_stdout() {
        let runner = Runner::default();
        let output = runner
            .run(
                &Endpoint::local(),
                &argv(&["echo", "hello"]),
                Elevation::ReadOnly,
                RunOptions::metadata(),
            )
            .expect("echo succeeds");
        assert_eq!(output.stdout.trim_end(), "hello");
    }

    #[test]
    fn non_zero_exit_reports_stderr_tail() {
        let runner = Runner::default();
        let err = runner
            .run(
                &Endpoint::local(),
                &argv(&["sh", "-c", "echo oops >&2; exit 3"]),
                Elevation::ReadOnly,
                RunOptions::metadata(),
            )
            .expect_err("must fail");
        match err {
            Error::CommandFailed {
                status, stderr_tail, ..
            } => {
                assert_eq!(status, "exit code 3");
                assert_eq!(stderr_tail, "oops");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn spawn_failure_is_a_command_failure() {
        let runner = Runner::default();
        let err = runner
            .run(
                &Endpoint::local(),
                &argv(&["/nonexistent/zmirror-test-binary"]),
                Elevation::ReadOnly,
                RunOptions::metadata(),
            )
            .expect_err("must fail");
        assert!(matches!(err, Error::CommandFailed { .. }));
    }

    #[test]
    fn timeout_terminates_the_child() {
        let runner = Runner::default();
        let started = Instant::now();
        let err = runner
            .run(
                &Endpoint::local(),
                &argv(&["sleep", "30"]),
                Elevation::ReadOnly,
                RunOptions {
                    timeout: Some(Duration::from_millis(200)),
                },
            )
            .expect_err("must time out");
        assert!(started.elapsed() < Duration::from_secs(10));
        match err {
            Error::CommandFailed { status, .. } => assert_eq!(status, "timed out"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn cancellation_interrupts_the_wait() {
        let token = CancellationToken::new();
        token.cancel();
        let runner = Runner::new(token);
        let err = runner
            .run(
                &Endpoint::local(),
                &argv(&["sleep", "30"]),
                Elevation::ReadOnly,
                RunOptions::unbounded(),
            )
            .expect_err("must cancel");
        assert!(matches!(err, Error::Cancelled));
    }
}
