//! Local/remote cluster placement

use crate::error::ModelError;
use crate::ids::{ClusterId, HostId};
use serde::{Deserialize, Serialize};

/// Hosts a cluster needs so a same-cluster migration target always exists
pub const MIN_HOSTS_PER_CLUSTER: usize = 2;

/// One cluster and its hosts, in listing order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterPlacement {
    pub cluster_id: ClusterId,
    pub name: String,
    pub hosts: Vec<HostId>,
}

impl ClusterPlacement {
    /// Build a placement, rejecting clusters with too few hosts
    pub fn new(
        cluster_id: ClusterId,
        name: impl Into<String>,
        hosts: Vec<HostId>,
    ) -> Result<Self, ModelError> {
        if hosts.len() < MIN_HOSTS_PER_CLUSTER {
            return Err(ModelError::TooFewHosts {
                cluster: cluster_id,
                found: hosts.len(),
                required: MIN_HOSTS_PER_CLUSTER,
            });
        }
        Ok(Self {
            cluster_id,
            name: name.into(),
            hosts,
        })
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, host: HostId) -> bool {
        self.hosts.contains(&host)
    }
}

/// The "this environment" cluster and its paired remote cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterTopology {
    pub local_cluster: ClusterPlacement,
    pub remote_cluster: ClusterPlacement,
}

impl ClusterTopology {
    /// Pair two distinct clusters
    pub fn new(local: ClusterPlacement, remote: ClusterPlacement) -> Result<Self, ModelError> {
        if local.cluster_id == remote.cluster_id {
            return Err(ModelError::SameCluster(local.cluster_id));
        }
        Ok(Self {
            local_cluster: local,
            remote_cluster: remote,
        })
    }

    /// Placement of the cluster a host belongs to
    #[must_use]
    pub fn cluster_of(&self, host: HostId) -> Option<&ClusterPlacement> {
        [&self.local_cluster, &self.remote_cluster]
            .into_iter()
            .find(|c| c.contains(host))
    }
}
