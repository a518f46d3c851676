//! Process-group signalling and liveness

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;

/// What a null signal tells about a process group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupStatus {
    /// At least one member exists and accepts our signals
    Alive,
    /// Members exist but we may not signal them
    Unsignalable,
    /// No member left
    Gone,
}

impl GroupStatus {
    fn from_null_signal(outcome: nix::Result<()>) -> Self {
        match outcome {
            Ok(()) => Self::Alive,
            Err(Errno::ESRCH) => Self::Gone,
            Err(Errno::EPERM) => Self::Unsignalable,
            Err(e) => {
                tracing::warn!(error = %e, "unexpected null-signal result, assuming alive");
                Self::Alive
            }
        }
    }

    #[inline]
    #[must_use]
    pub fn is_gone(self) -> bool {
        self == Self::Gone
    }
}

/// Group ids 0 and 1 would address our own group and every process
fn group_pid(pgid: u32) -> nix::Result<Pid> {
    match i32::try_from(pgid) {
        Ok(raw) if raw > 1 => Ok(Pid::from_raw(raw)),
        _ => Err(Errno::EINVAL),
    }
}

/// Send a signal to every member of a process group
pub(crate) fn signal_group(pgid: u32, signal: Signal) -> nix::Result<()> {
    killpg(group_pid(pgid)?, signal)
}

/// Check a process group with the null signal
#[must_use]
pub fn group_status(pgid: u32) -> GroupStatus {
    match group_pid(pgid) {
        Ok(pid) => GroupStatus::from_null_signal(killpg(pid, None)),
        Err(_) => GroupStatus::Unsignalable,
    }
}
