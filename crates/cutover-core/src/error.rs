//! Error types for the cutover harness
//!
//! Provides error handling for:
//! - Configuration loading and validation
//! - Guest shell commands
//! - The cutover state machine
//! - Whole-scenario failures (`HarnessError`)

use crate::state_machine::CutoverState;
use crate::verifier::VerificationErrors;
use cutover_backend::{BackendError, IdentityError};
use cutover_control::{ControlPlaneError, TopologyError};
use cutover_model::ControlPlaneId;
use cutover_supervisor::{BuildError, LaunchError, ReadinessError};
use std::path::PathBuf;

/// Configuration could not be used
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    /// Extension is neither TOML nor YAML
    #[error("unsupported configuration format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Guest remote shell failure
#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    /// No address is known for the workload
    #[error("no guest address for workload {0}")]
    UnknownGuest(ControlPlaneId),

    /// The connection itself failed
    #[error("cannot reach guest {host}: {message}")]
    Connect { host: String, message: String },

    #[error("command on {host} timed out after {secs}s: {command}")]
    Timeout {
        host: String,
        command: String,
        secs: u64,
    },

    #[error("command on {host} failed ({code:?}): {command}: {stderr}")]
    CommandFailed {
        host: String,
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("guest shell i/o: {0}")]
    Io(#[from] std::io::Error),
}

impl ShellError {
    /// Worth one reconnect
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::Timeout { .. })
    }
}

/// A cutover that ended in `Failed`
#[derive(Debug, thiserror::Error)]
pub enum CutoverError {
    /// The state machine refused a transition
    #[error("illegal cutover transition {from} -> {to}")]
    IllegalTransition { from: CutoverState, to: CutoverState },

    /// A tracked object could not be resolved before the cutover
    #[error("capture incomplete at {object}: {source}")]
    CaptureIncomplete {
        object: ControlPlaneId,
        #[source]
        source: IdentityError,
    },

    #[error("build failed: {0}")]
    Build(#[from] BuildError),

    #[error("launch failed: {0}")]
    Launch(#[from] LaunchError),

    #[error("service not ready: {0}")]
    Readiness(#[from] ReadinessError),

    /// The new service is up but no client could be obtained
    #[error("cannot connect to new control plane: {0}")]
    Connect(#[from] ControlPlaneError),
}

impl CutoverError {
    /// A cutover is never resumed; a new session is required
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        true
    }

    /// A fresh session may succeed where this one failed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connect(e) => e.is_retryable(),
            Self::CaptureIncomplete { source, .. } => match source {
                IdentityError::Backend(e) => e.is_retryable(),
                _ => false,
            },
            _ => false,
        }
    }
}

/// Scenario-level failure
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("cutover failed: {0}")]
    Cutover(#[from] CutoverError),

    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),

    #[error("control plane error: {0}")]
    ControlPlane(#[from] ControlPlaneError),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("guest shell error: {0}")]
    Shell(#[from] ShellError),

    #[error(transparent)]
    Verification(#[from] VerificationErrors),

    #[error("harness i/o: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Cutover(e) => e.is_retryable(),
            Self::Topology(e) => e.is_retryable(),
            Self::ControlPlane(e) => e.is_retryable(),
            Self::Backend(e) => e.is_retryable(),
            Self::Shell(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Result alias for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;
    use cutover_model::ObjectKind;

    #[test]
    fn capture_error_names_object() {
        let id = ControlPlaneId::new();
        let err = CutoverError::CaptureIncomplete {
            object: id,
            source: IdentityError::NotFound {
                id,
                kind: ObjectKind::Volume,
                tried: vec![id.to_string()],
            },
        };
        assert!(err.to_string().starts_with(&format!("capture incomplete at {id}")));
        assert!(err.is_fatal());
        assert!(!err.is_retryable());
    }

    #[test]
    fn transport_failures_bubble_up_as_retryable() {
        let err = HarnessError::from(BackendError::Transport {
            operation: "VolumesList".to_string(),
            message: "reset".to_string(),
        });
        assert!(err.is_retryable());

        let err = HarnessError::from(ShellError::CommandFailed {
            host: "10.1.1.5".to_string(),
            command: "cat /root/m".to_string(),
            code: Some(1),
            stderr: "No such file".to_string(),
        });
        assert!(!err.is_retryable());
    }
}
