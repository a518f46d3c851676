//! Launched process handle

use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use tokio::process::Child;

/// Lifecycle of the supervised process slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessState {
    /// Build script running, nothing launched yet
    Building,
    /// Launched, readiness not yet seen
    Starting,
    Ready,
    Failed,
    Stopped,
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A launched service, leader of its own process group.
///
/// Owns the output read position: only one `await_ready` can tail it at a
/// time because it takes `&mut ProcessHandle`.
#[derive(Debug)]
pub struct ProcessHandle {
    pub(crate) pid: u32,
    pub(crate) process_group_id: u32,
    pub(crate) output_path: PathBuf,
    pub(crate) read_offset: u64,
    /// Bytes after the last newline seen, decoded once the line completes
    pub(crate) partial_line: Vec<u8>,
    pub(crate) state: ProcessState,
    pub(crate) child: Option<Child>,
    pub(crate) exit: Option<ExitStatus>,
}

impl ProcessHandle {
    #[inline]
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    #[inline]
    #[must_use]
    pub fn process_group_id(&self) -> u32 {
        self.process_group_id
    }

    /// Append-only file receiving stdout and stderr
    #[inline]
    #[must_use]
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Sink offset up to which output has been consumed
    #[inline]
    #[must_use]
    pub fn read_offset(&self) -> u64 {
        self.read_offset
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Exit status of the group leader, reaping it if it has exited
    pub fn try_exit_status(&mut self) -> std::io::Result<Option<ExitStatus>> {
        if self.exit.is_none() {
            if let Some(child) = self.child.as_mut() {
                if let Some(status) = child.try_wait()? {
                    self.exit = Some(status);
                    self.child = None;
                }
            }
        }
        Ok(self.exit)
    }
}

/// Outcome of a terminate request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationReport {
    /// No member of the process group remains
    pub confirmed_gone: bool,
    /// SIGKILL was sent after the grace period
    pub escalated: bool,
    /// The group may not be signalled by us, e.g. it belongs to another user
    pub signal_denied: bool,
}
