//! Local/remote cluster resolution
//!
//! Each control-plane cluster records, in a cluster-scoped configuration key,
//! the identity of the backend cluster that serves it. A cluster whose value
//! equals the identity read on this node is the local cluster; any other
//! value marks the remote cluster. Clusters without the key are not served
//! by the backend and take no role.

use crate::api::{ClusterInfo, ConfigScope, ControlPlane};
use crate::error::{ClusterRole, TopologyError};
use cutover_model::{ClusterPlacement, ClusterTopology, HostId, ModelError, PoolId, MIN_HOSTS_PER_CLUSTER};
use std::path::Path;
use std::sync::Arc;

/// Cluster-scoped configuration key holding the backend cluster identity
pub const CLUSTER_IDENTITY_KEY: &str = "sp.cluster.id";

/// Key of the identity in the backend's node configuration file
pub const DEFAULT_IDENTITY_CONF_KEY: &str = "SP_CLUSTER_ID";

/// Backend cluster identity of the node the harness runs on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalClusterIdentity(String);

impl LocalClusterIdentity {
    /// Identity given directly
    pub fn from_value(value: impl Into<String>) -> Result<Self, TopologyError> {
        let value = value.into().trim().to_string();
        if value.is_empty() {
            return Err(TopologyError::LocalIdentity("empty identity".to_string()));
        }
        Ok(Self(value))
    }

    /// Identity read from a `KEY=value` configuration file.
    ///
    /// Blank lines and `#` comments are skipped; values may be quoted. The
    /// last assignment of the key wins.
    pub fn from_conf_file(path: &Path, key: &str) -> Result<Self, TopologyError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| TopologyError::LocalIdentity(format!("{}: {e}", path.display())))?;
        let value = parse_conf_value(&text, key).ok_or_else(|| {
            TopologyError::LocalIdentity(format!("{key} not set in {}", path.display()))
        })?;
        Self::from_value(value)
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LocalClusterIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn parse_conf_value(text: &str, key: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .filter(|(k, _)| k.trim() == key)
        .map(|(_, v)| v.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
        .last()
}

/// Decides which control-plane cluster is local and which is remote
#[derive(Clone)]
pub struct ClusterTopologyResolver {
    control: Arc<dyn ControlPlane>,
    local_identity: LocalClusterIdentity,
    identity_key: String,
}

impl std::fmt::Debug for ClusterTopologyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterTopologyResolver")
            .field("local_identity", &self.local_identity)
            .field("identity_key", &self.identity_key)
            .finish_non_exhaustive()
    }
}

impl ClusterTopologyResolver {
    #[must_use]
    pub fn new(control: Arc<dyn ControlPlane>, local_identity: LocalClusterIdentity) -> Self {
        Self {
            control,
            local_identity,
            identity_key: CLUSTER_IDENTITY_KEY.to_string(),
        }
    }

    /// Read the identity from a different configuration key
    #[must_use]
    pub fn with_identity_key(mut self, key: impl Into<String>) -> Self {
        self.identity_key = key.into();
        self
    }

    /// Split the zone's clusters into (local, remote)
    async fn classify(&self) -> Result<(Vec<ClusterInfo>, Vec<ClusterInfo>), TopologyError> {
        let mut local = Vec::new();
        let mut remote = Vec::new();
        for cluster in self.control.list_clusters().await? {
            let identity = self
                .control
                .get_configuration(&self.identity_key, ConfigScope::Cluster(cluster.id))
                .await?;
            match identity {
                Some(id) if id == self.local_identity.as_str() => local.push(cluster),
                Some(id) => {
                    tracing::debug!(cluster = %cluster.name, identity = %id, "remote backend cluster");
                    remote.push(cluster);
                }
                None => tracing::debug!(cluster = %cluster.name, "cluster has no backend identity"),
            }
        }
        Ok((local, remote))
    }

    /// The one cluster served by this node's backend cluster
    pub async fn local_cluster(&self) -> Result<ClusterInfo, TopologyError> {
        let (local, _) = self.classify().await?;
        single_for_role(ClusterRole::Local, local)
    }

    /// The one cluster served by a different backend cluster
    pub async fn remote_cluster(&self) -> Result<ClusterInfo, TopologyError> {
        let (_, remote) = self.classify().await?;
        single_for_role(ClusterRole::Remote, remote)
    }

    /// Both clusters with their usable hosts
    pub async fn resolve(&self) -> Result<ClusterTopology, TopologyError> {
        let (local, remote) = self.classify().await?;
        let local = self.placement(single_for_role(ClusterRole::Local, local)?).await?;
        let remote = self.placement(single_for_role(ClusterRole::Remote, remote)?).await?;
        tracing::info!(
            local = %local.name,
            local_hosts = local.hosts.len(),
            remote = %remote.name,
            remote_hosts = remote.hosts.len(),
            "resolved cluster topology"
        );
        ClusterTopology::new(local, remote).map_err(model_error)
    }

    async fn placement(&self, cluster: ClusterInfo) -> Result<ClusterPlacement, TopologyError> {
        let hosts: Vec<HostId> = self
            .control
            .list_hosts(Some(cluster.id))
            .await?
            .into_iter()
            .filter(|h| h.is_up() && h.cluster_id == cluster.id)
            .map(|h| h.id)
            .collect();
        ClusterPlacement::new(cluster.id, cluster.name.clone(), hosts).map_err(|e| match e {
            ModelError::TooFewHosts { found, required, .. } => TopologyError::TooFewHosts {
                cluster: cluster.name,
                found,
                required,
            },
            other => model_error(other),
        })
    }
}

fn single_for_role(role: ClusterRole, mut clusters: Vec<ClusterInfo>) -> Result<ClusterInfo, TopologyError> {
    match clusters.len() {
        0 => Err(TopologyError::NoClusterForRole(role)),
        1 => Ok(clusters.remove(0)),
        _ => Err(TopologyError::AmbiguousRole {
            role,
            clusters: clusters.into_iter().map(|c| c.name).collect(),
        }),
    }
}

fn model_error(e: ModelError) -> TopologyError {
    TopologyError::ControlPlane(e.into())
}

/// First host of the pool that is not the current one.
///
/// # Errors
/// `TopologyError::NoDestination` when the pool has fewer than two hosts, or
/// when every host in it is the current one.
pub fn destination_host(current: HostId, pool: &[HostId]) -> Result<HostId, TopologyError> {
    let no_destination = || TopologyError::NoDestination {
        current,
        pool_size: pool.len(),
    };
    if pool.len() < MIN_HOSTS_PER_CLUSTER {
        return Err(no_destination());
    }
    pool.iter().copied().find(|h| *h != current).ok_or_else(no_destination)
}

/// First pool that is not the one a volume is on now
///
/// # Errors
/// `TopologyError::NoDestinationPool` when no other pool is listed.
pub fn destination_pool(current: Option<PoolId>, pools: &[PoolId]) -> Result<PoolId, TopologyError> {
    pools
        .iter()
        .copied()
        .find(|p| Some(*p) != current)
        .ok_or(TopologyError::NoDestinationPool {
            current,
            candidates: pools.len(),
        })
}
