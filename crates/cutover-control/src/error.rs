//! Error types for the control plane
//!
//! - `ControlPlaneError` for a failed orchestration API call
//! - `TopologyError` for a cluster layout the harness cannot work with

use cutover_model::{HostId, ModelError, PoolId};

/// Which cluster a topology query was looking for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterRole {
    /// Shares the backend cluster identity with this environment
    Local,
    /// Backed by a different backend cluster
    Remote,
}

impl std::fmt::Display for ClusterRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Remote => f.write_str("remote"),
        }
    }
}

/// Failed control-plane call
#[derive(Debug, thiserror::Error)]
pub enum ControlPlaneError {
    /// Session login was refused
    #[error("login failed: {0}")]
    Login(String),

    /// The API answered with an error code
    #[error("{command} failed with code {code}: {message}")]
    Api {
        command: String,
        code: u16,
        message: String,
    },

    /// The request never produced an answer
    #[error("transport error in {command}: {message}")]
    Transport { command: String, message: String },

    /// The answer could not be decoded
    #[error("response for {command} not understood: {message}")]
    Decode { command: String, message: String },

    /// An async job finished unsuccessfully
    #[error("job {job_id} for {command} failed: {message}")]
    JobFailed {
        command: String,
        job_id: String,
        message: String,
    },

    /// An async job did not finish in time
    #[error("job {job_id} for {command} still pending after {waited_secs}s")]
    JobTimedOut {
        command: String,
        job_id: String,
        waited_secs: u64,
    },

    /// A listed entity does not exist
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// The request was rejected before being sent
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Response carried data outside the model
    #[error("model error: {0}")]
    Model(#[from] ModelError),
}

impl ControlPlaneError {
    /// Entity missing, either reported by the API or absent from a listing
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Transient failure worth another attempt
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::JobTimedOut { .. })
    }

    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

/// Result type alias for control-plane calls
pub type ControlPlaneResult<T> = Result<T, ControlPlaneError>;

/// Cluster layout does not support the scenario
#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    /// No cluster plays the role
    #[error("no {0} cluster in zone")]
    NoClusterForRole(ClusterRole),

    /// Several clusters claim the role
    #[error("{role} role claimed by {} clusters: {}", .clusters.len(), .clusters.join(", "))]
    AmbiguousRole {
        role: ClusterRole,
        clusters: Vec<String>,
    },

    /// A cluster has too few usable hosts
    #[error("cluster {cluster} has {found} usable hosts, {required} required")]
    TooFewHosts {
        cluster: String,
        found: usize,
        required: usize,
    },

    /// No host other than the current one is available
    #[error("no destination other than {current} in a pool of {pool_size}")]
    NoDestination { current: HostId, pool_size: usize },

    /// No storage pool other than the current one is available
    #[error("no storage pool other than {} among {candidates}", .current.map_or_else(|| "none".to_string(), |p| p.to_string()))]
    NoDestinationPool { current: Option<PoolId>, candidates: usize },

    /// The local backend identity could not be read
    #[error("local cluster identity unavailable: {0}")]
    LocalIdentity(String),

    /// Control plane call failed
    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),
}

impl TopologyError {
    /// Everything except a transient control-plane failure ends the scenario
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !self.is_retryable()
    }

    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ControlPlane(e) if e.is_retryable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ambiguous_role_lists_clusters() {
        let err = TopologyError::AmbiguousRole {
            role: ClusterRole::Local,
            clusters: vec!["c1".to_string(), "c2".to_string()],
        };
        assert_eq!(err.to_string(), "local role claimed by 2 clusters: c1, c2");
        assert!(err.is_fatal());
    }

    #[test]
    fn transient_control_plane_failure_is_retryable() {
        let err = TopologyError::from(ControlPlaneError::Transport {
            command: "listClusters".to_string(),
            message: "connection refused".to_string(),
        });
        assert!(err.is_retryable());
        assert!(!err.is_fatal());
    }

    #[test]
    fn api_errors_are_not_retryable() {
        let err = ControlPlaneError::Api {
            command: "migrateVolume".to_string(),
            code: 431,
            message: "bad pool".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(!err.is_not_found());
        assert!(ControlPlaneError::not_found("host", "h1").is_not_found());
    }
}
