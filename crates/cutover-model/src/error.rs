//! Errors raised while constructing or parsing model values

use crate::ids::ClusterId;

/// Model invariant violations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// A cluster cannot host a same-cluster migration
    #[error("cluster {cluster} has {found} usable host(s), at least {required} required")]
    TooFewHosts {
        cluster: ClusterId,
        found: usize,
        required: usize,
    },

    /// Local and remote roles point at the same cluster
    #[error("local and remote cluster are both {0}")]
    SameCluster(ClusterId),

    /// Unknown workload state string
    #[error("unknown workload state: '{0}'")]
    UnknownState(String),

    /// Unknown storage object kind string
    #[error("unknown object kind: '{0}'")]
    UnknownKind(String),

    /// Identifier did not parse
    #[error("invalid identifier '{value}': {reason}")]
    InvalidId { value: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_few_hosts_display() {
        let cluster = ClusterId::new();
        let err = ModelError::TooFewHosts {
            cluster,
            found: 1,
            required: 2,
        };
        let text = err.to_string();
        assert!(text.contains(&cluster.to_string()));
        assert!(text.contains("1 usable host"));
    }

    #[test]
    fn unknown_state_display() {
        let err = ModelError::UnknownState("Exploding".to_string());
        assert_eq!(err.to_string(), "unknown workload state: 'Exploding'");
    }
}
