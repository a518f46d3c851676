//! Process identity read from procfs

/// Start time of `pid` in clock ticks since boot.
///
/// A pid together with its start time names one process even after the pid
/// is reused. `None` when the process is gone or procfs is unavailable.
#[must_use]
pub fn start_time(pid: u32) -> Option<u64> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    parse_start_time(&stat)
}

fn parse_start_time(stat: &str) -> Option<u64> {
    // comm may contain spaces and parentheses; fields resume after the last ')'
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.split_whitespace().nth(19)?.parse().ok()
}
