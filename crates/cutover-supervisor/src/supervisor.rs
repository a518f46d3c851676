//! Build, launch, readiness and termination of the control-plane process

use crate::error::{BuildError, LaunchError, ReadinessError};
use crate::handle::{ProcessHandle, ProcessState, TerminationReport};
use crate::readiness::{Readiness, ReadinessMatcher};
use crate::signal::{group_status, signal_group};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use std::fs::{File, OpenOptions};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::process::Command;
use tokio::time::Instant;

/// Remote hosts the build script accepts
pub const MAX_REMOTE_HOSTS: usize = 3;

/// How long to wait for the group to vanish after SIGKILL
const KILL_WAIT: Duration = Duration::from_secs(5);

/// Supervisor configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Script invoked as `<script> <workspace> <revision> <forked repo> [remote...]`
    pub build_script: PathBuf,
    /// Durable sink for build and service output
    pub output_path: PathBuf,
    /// Interval between sink reads while waiting for readiness
    pub poll_interval: Duration,
    /// Send SIGKILL when the group outlives the grace period
    pub escalate_to_kill: bool,
}

impl SupervisorConfig {
    #[must_use]
    pub fn new(build_script: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            build_script: build_script.into(),
            output_path: output_path.into(),
            poll_interval: Duration::from_millis(100),
            escalate_to_kill: false,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn with_escalation(mut self, escalate: bool) -> Self {
        self.escalate_to_kill = escalate;
        self
    }
}

/// Positional parameters of the build script besides the revision
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildParams {
    pub workspace: PathBuf,
    pub forked_repo: PathBuf,
    pub remote_hosts: Vec<String>,
}

/// Runs the build script and supervises the launched service
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    config: SupervisorConfig,
}

impl ProcessSupervisor {
    #[must_use]
    pub fn new(config: SupervisorConfig) -> Self {
        Self { config }
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    fn open_sink(&self) -> std::io::Result<File> {
        if let Some(parent) = self.config.output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.config.output_path)
    }

    fn sink_stdio(&self) -> std::io::Result<(Stdio, Stdio, u64)> {
        let out = self.open_sink()?;
        let offset = out.metadata()?.len();
        let err = out.try_clone()?;
        Ok((Stdio::from(out), Stdio::from(err), offset))
    }

    /// Build a revision with the external build script.
    ///
    /// Output is appended to the sink. Waits for the script to finish.
    pub async fn build(&self, revision: &str, params: &BuildParams) -> Result<(), BuildError> {
        if params.remote_hosts.len() > MAX_REMOTE_HOSTS {
            return Err(BuildError::TooManyRemoteHosts {
                count: params.remote_hosts.len(),
                max: MAX_REMOTE_HOSTS,
            });
        }

        let (stdout, stderr, _) = self.sink_stdio().map_err(|source| BuildError::Sink {
            path: self.config.output_path.clone(),
            source,
        })?;

        tracing::info!(
            %revision,
            script = %self.config.build_script.display(),
            remotes = params.remote_hosts.len(),
            "building revision"
        );
        let status = Command::new(&self.config.build_script)
            .arg(&params.workspace)
            .arg(revision)
            .arg(&params.forked_repo)
            .args(&params.remote_hosts)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .status()
            .await
            .map_err(|source| BuildError::Spawn {
                script: self.config.build_script.clone(),
                source,
            })?;

        if !status.success() {
            tracing::error!(%revision, code = ?status.code(), "build failed");
            return Err(BuildError::NonZeroExit {
                revision: revision.to_string(),
                code: status.code(),
            });
        }
        tracing::info!(%revision, "build finished");
        Ok(())
    }

    /// Start the service as leader of a new process group.
    ///
    /// Output already in the sink is skipped by the new handle.
    pub fn launch(&self, start_command: &[String], working_dir: &Path) -> Result<ProcessHandle, LaunchError> {
        let (program, args) = start_command.split_first().ok_or(LaunchError::EmptyCommand)?;
        let (stdout, stderr, offset) = self.sink_stdio().map_err(|source| LaunchError::Sink {
            path: self.config.output_path.clone(),
            source,
        })?;

        let child = Command::new(program)
            .args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .process_group(0)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                program: program.clone(),
                source,
            })?;
        let pid = child.id().ok_or_else(|| LaunchError::NoPid(program.clone()))?;

        tracing::info!(pid, program = %program, dir = %working_dir.display(), "launched service");
        Ok(ProcessHandle {
            pid,
            process_group_id: pid,
            output_path: self.config.output_path.clone(),
            read_offset: offset,
            partial_line: Vec::new(),
            state: ProcessState::Starting,
            child: Some(child),
            exit: None,
        })
    }

    /// Handle for a group started by an earlier harness run.
    ///
    /// The group is not our child, so only signalling works on it. Its output
    /// is assumed to go to the configured sink.
    #[must_use]
    pub fn adopt(&self, process_group_id: u32) -> ProcessHandle {
        let read_offset = std::fs::metadata(&self.config.output_path).map_or(0, |m| m.len());
        tracing::info!(pgid = process_group_id, "adopted running process group");
        ProcessHandle {
            pid: process_group_id,
            process_group_id,
            output_path: self.config.output_path.clone(),
            read_offset,
            partial_line: Vec::new(),
            state: ProcessState::Ready,
            child: None,
            exit: None,
        }
    }

    /// Tail the sink from the handle's offset until the matcher decides.
    ///
    /// # Errors
    /// - `ReadinessError::Failed` on a failure marker
    /// - `ReadinessError::Exited` if the leader exits first
    /// - `ReadinessError::TimedOut` if `timeout` passes first
    pub async fn await_ready(
        &self,
        handle: &mut ProcessHandle,
        matcher: &dyn ReadinessMatcher,
        timeout: Duration,
    ) -> Result<(), ReadinessError> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut sink = tokio::fs::File::open(&handle.output_path).await?;

        let outcome = loop {
            // Check exit before reading so output written just before exit is seen
            let exited = handle.try_exit_status()?;

            if let Some(verdict) = consume_new_output(&mut sink, handle, matcher).await? {
                break verdict;
            }

            if let Some(status) = exited {
                // Last unterminated line
                let tail = String::from_utf8_lossy(&std::mem::take(&mut handle.partial_line)).into_owned();
                match matcher.check(tail.trim_end_matches('\r')) {
                    Readiness::Continue => break Err(ReadinessError::Exited { code: status.code() }),
                    verdict => break verdict_result(verdict, tail),
                }
            }

            let now = Instant::now();
            if now >= deadline {
                break Err(ReadinessError::TimedOut {
                    waited: now - started,
                });
            }
            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
        };

        match &outcome {
            Ok(()) => {
                handle.state = ProcessState::Ready;
                tracing::info!(pid = handle.pid, elapsed_ms = started.elapsed().as_millis(), "service ready");
            }
            Err(e) => {
                handle.state = ProcessState::Failed;
                tracing::error!(pid = handle.pid, error = %e, "service not ready");
            }
        }
        outcome
    }

    /// Stop the whole process group. Never fails.
    ///
    /// Sends SIGTERM and waits up to `grace`. With escalation configured, a
    /// group still alive after that gets SIGKILL. A group we may not signal is
    /// reported as not gone without waiting.
    pub async fn terminate(&self, handle: &mut ProcessHandle, grace: Duration) -> TerminationReport {
        let pgid = handle.process_group_id;
        let mut report = TerminationReport {
            confirmed_gone: false,
            escalated: false,
            signal_denied: false,
        };

        report.signal_denied = !deliver(pgid, Signal::SIGTERM);
        if report.signal_denied {
            report.confirmed_gone = group_status(pgid).is_gone();
        } else {
            report.confirmed_gone = wait_for_group_exit(handle, grace, self.config.poll_interval).await;
            if !report.confirmed_gone && self.config.escalate_to_kill {
                tracing::warn!(pgid, grace_ms = grace.as_millis(), "group survived SIGTERM, sending SIGKILL");
                report.escalated = true;
                report.signal_denied = !deliver(pgid, Signal::SIGKILL);
                report.confirmed_gone = wait_for_group_exit(handle, KILL_WAIT, self.config.poll_interval).await;
            }
        }

        handle.state = ProcessState::Stopped;
        if report.confirmed_gone {
            tracing::info!(pgid, escalated = report.escalated, "process group gone");
        } else {
            tracing::warn!(
                pgid,
                escalated = report.escalated,
                signal_denied = report.signal_denied,
                "process group still present after terminate"
            );
        }
        report
    }
}

/// Signal a group; false when we are not allowed to. A group that is
/// already gone counts as delivered.
fn deliver(pgid: u32, signal: Signal) -> bool {
    match signal_group(pgid, signal) {
        Ok(()) | Err(Errno::ESRCH) => true,
        Err(e) => {
            tracing::warn!(pgid, signal = signal.as_str(), error = %e, "cannot signal process group");
            false
        }
    }
}

/// Read everything appended since the last read and classify complete lines
async fn consume_new_output(
    sink: &mut tokio::fs::File,
    handle: &mut ProcessHandle,
    matcher: &dyn ReadinessMatcher,
) -> Result<Option<Result<(), ReadinessError>>, ReadinessError> {
    sink.seek(SeekFrom::Start(handle.read_offset)).await?;
    let mut fresh = Vec::new();
    let read = sink.read_to_end(&mut fresh).await?;
    if read == 0 {
        return Ok(None);
    }
    handle.read_offset += read as u64;
    handle.partial_line.extend_from_slice(&fresh);

    while let Some(newline) = handle.partial_line.iter().position(|b| *b == b'\n') {
        let raw: Vec<u8> = handle.partial_line.drain(..=newline).collect();
        let line = String::from_utf8_lossy(&raw);
        let line = line.trim_end_matches(['\n', '\r']);
        match matcher.check(line) {
            Readiness::Continue => {}
            verdict => return Ok(Some(verdict_result(verdict, line.to_string()))),
        }
    }
    Ok(None)
}

fn verdict_result(verdict: Readiness, line: String) -> Result<(), ReadinessError> {
    match verdict {
        Readiness::Ready | Readiness::Continue => Ok(()),
        Readiness::Failed(reason) => Err(ReadinessError::Failed { reason, line }),
    }
}

async fn wait_for_group_exit(handle: &mut ProcessHandle, wait: Duration, poll: Duration) -> bool {
    let deadline = Instant::now() + wait;
    loop {
        // A zombie leader still counts as a group member until reaped
        if let Err(e) = handle.try_exit_status() {
            tracing::warn!(pid = handle.pid, error = %e, "failed to reap leader");
        }
        if group_status(handle.process_group_id).is_gone() {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::time::sleep(poll.min(deadline - now)).await;
    }
}
