//! OS-level pipe chains with deterministic teardown.
//!
//! A [`Pipeline`] is an ordered list of stages whose stdout feeds the next
//! stage's stdin. Stages carry fully built local argvs (SSH wrapping happens
//! before the stage is constructed), so the spawner is transport-agnostic.

use std::io::{BufRead, BufReader};
use std::process::{Child, ChildStderr, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};

use tracing::{debug, trace};
use zmirror_core::{Error, Result};

use crate::process::{Runner, describe_status, set_process_group, terminate_group};

/// Poll interval while waiting for pipeline stages.
const WAIT_POLL: std::time::Duration = std::time::Duration::from_millis(25);

/// One stage of a pipeline.
#[derive(Clone, Debug)]
pub struct Stage {
    label: String,
    argv: Vec<String>,
    inherit_stderr: bool,
}

impl Stage {
    /// Creates a stage from a label (used for log tagging) and a local argv.
    #[must_use]
    pub fn new(label: impl Into<String>, argv: Vec<String>) -> Self {
        Self {
            label: label.into(),
            argv,
            inherit_stderr: false,
        }
    }

    /// Routes this stage's stderr to the parent's terminal instead of the
    /// log. Used for `pv`, whose progress display is interactive.
    #[must_use]
    pub fn with_inherited_stderr(mut self) -> Self {
        self.inherit_stderr = true;
        self
    }

    /// The stage label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The argv this stage executes.
    #[must_use]
    pub fn argv(&self) -> &[String] {
        &self.argv
    }
}

/// An ordered chain of stages.
#[derive(Clone, Debug, Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Creates an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage.
    pub fn push(&mut self, stage: Stage) {
        self.stages.push(stage);
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// True when no stage was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// The stages, in execution order.
    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }
}

struct LiveStage {
    label: String,
    argv: Vec<String>,
    child: Child,
    stderr: Option<JoinHandle<String>>,
    stdout_drain: Option<JoinHandle<()>>,
    status: Option<ExitStatus>,
}

/// Owns the spawned children; kills still-running stages LIFO on drop so no
/// exit path leaks a zombie `ssh` or `zfs send`.
#[derive(Default)]
struct LivePipeline {
    stages: Vec<LiveStage>,
}

impl Drop for LivePipeline {
    fn drop(&mut self) {
        for stage in self.stages.iter_mut().rev() {
            if stage.status.is_none() {
                debug!(stage = %stage.label, "terminating live pipeline stage");
                terminate_group(&mut stage.child);
            }
        }
    }
}

impl Runner {
    /// Spawns and runs every stage of `pipeline`, gating success on the
    /// final stage.
    ///
    /// # Errors
    ///
    /// - [`Error::CommandFailed`] when the final stage exits non-zero, or
    ///   when an earlier stage fails for a reason other than the benign
    ///   SIGPIPE that follows a clean downstream exit.
    /// - [`Error::Cancelled`] when the cancellation token flips; all stages
    ///   are torn down first.
    pub fn run_pipeline(&self, pipeline: Pipeline) -> Result<()> {
        if pipeline.is_empty() {
            return Ok(());
        }
        let mut live = self.spawn_stages(pipeline)?;
        self.wait_stages(&mut live)?;

        let mut results = Vec::with_capacity(live.stages.len());
        for stage in &mut live.stages {
            let stderr = stage
                .stderr
                .take()
                .and_then(|handle| handle.join().ok())
                .unwrap_or_default();
            if let Some(drain) = stage.stdout_drain.take() {
                let _ = drain.join();
            }
            let Some(status) = stage.status else { continue };
            results.push((stage.label.clone(), stage.argv.clone(), status, stderr));
        }

        let Some((_, last_argv, last_status, last_stderr)) = results.last() else {
            return Ok(());
        };
        if !last_status.success() {
            return Err(Error::command_failed(
                last_argv.clone(),
                describe_status(*last_status),
                last_stderr,
            ));
        }
        for (label, argv, status, stderr) in &results[..results.len() - 1] {
            if status.success() || is_benign_sigpipe(*status, stderr) {
                continue;
            }
            debug!(stage = %label, status = %describe_status(*status), "upstream stage failed");
            return Err(Error::command_failed(
                argv.clone(),
                describe_status(*status),
                stderr,
            ));
        }
        Ok(())
    }

    fn spawn_stages(&self, pipeline: Pipeline) -> Result<LivePipeline> {
        let count = pipeline.len();
        let mut live = LivePipeline::default();
        let mut upstream = None;

        for (index, stage) in pipeline.stages.into_iter().enumerate() {
            let is_last = index + 1 == count;
            trace!(stage = %stage.label, argv = ?stage.argv, "spawning pipeline stage");

            let mut command = Command::new(&stage.argv[0]);
            command.args(&stage.argv[1..]);
            command.stdin(match upstream.take() {
                Some(stdout) => Stdio::from(stdout),
                None => Stdio::null(),
            });
            command.stdout(Stdio::piped());
            command.stderr(if stage.inherit_stderr {
                Stdio::inherit()
            } else {
                Stdio::piped()
            });
            set_process_group(&mut command);

            let mut child = command.spawn().map_err(|err| {
                Error::command_failed(stage.argv.clone(), format!("spawn failed: {err}"), "")
            })?;

            let stderr = child
                .stderr
                .take()
                .map(|pipe| drain_stderr(stage.label.clone(), pipe));
            let mut stdout_drain = None;
            if is_last {
                if let Some(stdout) = child.stdout.take() {
                    let label = stage.label.clone();
                    stdout_drain = Some(thread::spawn(move || {
                        for line in BufReader::new(stdout).lines().map_while(|line| line.ok()) {
                            trace!(stage = %label, "{line}");
                        }
                    }));
                }
            } else {
                upstream = Some(child.stdout.take().ok_or_else(|| {
                    Error::command_failed(
                        stage.argv.clone(),
                        "stage exposed no stdout".to_owned(),
                        "",
                    )
                })?);
            }

            live.stages.push(LiveStage {
                label: stage.label,
                argv: stage.argv,
                child,
                stderr,
                stdout_drain,
                status: None,
            });
        }
        Ok(live)
    }

    fn wait_stages(&self, live: &mut LivePipeline) -> Result<()> {
        let mut pending = live.stages.len();
        while pending > 0 {
            self.cancellation().check()?;
            let mut progressed = false;
            for stage in &mut live.stages {
                if stage.status.is_some() {
                    continue;
                }
                let waited = stage.child.try_wait().map_err(|err| {
                    Error::command_failed(
                        stage.argv.clone(),
                        format!("wait failed: {err}"),
                        "",
                    )
                })?;
                if let Some(status) = waited {
                    trace!(stage = %stage.label, status = %describe_status(status), "stage exited");
                    stage.status = Some(status);
                    pending -= 1;
                    progressed = true;
                }
            }
            if pending > 0 && !progressed {
                thread::sleep(WAIT_POLL);
            }
        }
        Ok(())
    }
}

/// Collects a stage's stderr while echoing each line to the log, tagged
/// with the stage label.
fn drain_stderr(label: String, pipe: ChildStderr) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut collected = String::new();
        for line in BufReader::new(pipe).lines().map_while(|line| line.ok()) {
            debug!(stage = %label, "{line}");
            collected.push_str(&line);
            collected.push('\n');
        }
        collected
    })
}

/// An upstream stage that died of SIGPIPE (or the shell's 141 rendition of
/// it) after the consumer finished cleanly did its job.
fn is_benign_sigpipe(status: ExitStatus, stderr: &str) -> bool {
    if status.code() == Some(141) {
        return true;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if status.signal() == Some(13) {
            return true;
        }
    }
    stderr.to_ascii_lowercase().contains("broken pipe")
}
