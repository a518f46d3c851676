//! Supervisor error types

use std::path::PathBuf;
use std::time::Duration;

/// Build script failure. Always fatal for the cutover.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// More remote hosts than the script accepts
    #[error("{count} remote hosts given, the build script takes at most {max}")]
    TooManyRemoteHosts { count: usize, max: usize },

    /// The script could not be started
    #[error("failed to spawn build script {}: {source}", .script.display())]
    Spawn {
        script: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The script ran and failed
    #[error("build of revision {revision} exited with {}", exit_text(*.code))]
    NonZeroExit { revision: String, code: Option<i32> },

    /// The output sink could not be opened
    #[error("cannot open output sink {}: {source}", .path.display())]
    Sink {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Service launch failure
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("empty start command")]
    EmptyCommand,

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The child was reaped before its pid could be read
    #[error("{0} exited before its pid was known")]
    NoPid(String),

    #[error("cannot open output sink {}: {source}", .path.display())]
    Sink {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The launched service did not become ready
#[derive(Debug, thiserror::Error)]
pub enum ReadinessError {
    /// A failure marker appeared in the output
    #[error("failure marker in output: {line}")]
    Failed { reason: String, line: String },

    /// Neither marker appeared in time
    #[error("not ready after {}s", .waited.as_secs_f64())]
    TimedOut { waited: Duration },

    /// The process exited before reporting ready
    #[error("process exited with {} before becoming ready", exit_text(*.code))]
    Exited { code: Option<i32> },

    /// Reading the sink failed
    #[error("reading output sink: {0}")]
    Io(#[from] std::io::Error),
}

impl ReadinessError {
    /// Every readiness failure ends the launch; the caller must terminate
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        true
    }
}

impl BuildError {
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        true
    }
}

fn exit_text(code: Option<i32>) -> String {
    code.map_or_else(|| "a signal".to_string(), |c| format!("code {c}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_rendering() {
        let err = BuildError::NonZeroExit {
            revision: "abc123".to_string(),
            code: Some(2),
        };
        assert_eq!(err.to_string(), "build of revision abc123 exited with code 2");

        let err = ReadinessError::Exited { code: None };
        assert_eq!(err.to_string(), "process exited with a signal before becoming ready");
    }
}
