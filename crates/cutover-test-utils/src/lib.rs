//! Testing utilities for the cutover workspace
//!
//! In-memory fakes for the backend, control plane, guest shell and
//! connector, plus fixtures shared by integration tests.

#![allow(missing_docs)]

pub mod backend;
pub mod connector;
pub mod control;
pub mod guest;

pub use backend::{schemes, FakeBackend, ID_TAG};
pub use connector::FakeConnector;
pub use control::FakeControlPlane;
pub use guest::FakeGuest;

use cutover_control::{ClusterInfo, ClusterTopologyResolver, ControlPlane, LocalClusterIdentity, TopologyError};
use cutover_model::{BackendRecord, ClusterTopology, ControlPlaneId, HostId, NamingScheme, ObjectKind, PoolId};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Identity of the local fixture cluster
pub const LOCAL_IDENTITY: &str = "nzkr.b";
/// Identity of the remote fixture cluster
pub const REMOTE_IDENTITY: &str = "kqfv.b";

/// Backend, guest and control plane with one local and one remote cluster.
///
/// The local cluster has two storage pools, the remote one a single pool.
/// Workload volumes start on the first pool of their cluster.
#[derive(Debug)]
pub struct TwoClusterEnv {
    pub backend: Arc<FakeBackend>,
    pub guest: Arc<FakeGuest>,
    pub control: Arc<FakeControlPlane>,
    pub naming: NamingScheme,
    pub local: (ClusterInfo, Vec<HostId>),
    pub remote: (ClusterInfo, Vec<HostId>),
    pub local_pools: Vec<PoolId>,
    pub remote_pools: Vec<PoolId>,
}

impl TwoClusterEnv {
    /// Two Up hosts per cluster
    #[must_use]
    pub fn new() -> Self {
        Self::with_hosts(2, 2)
    }

    #[must_use]
    pub fn with_hosts(local_hosts: usize, remote_hosts: usize) -> Self {
        let backend = Arc::new(FakeBackend::new());
        let guest = Arc::new(FakeGuest::new());
        let naming = NamingScheme::default();
        let control = Arc::new(
            FakeControlPlane::with_backend(backend.clone(), naming.clone()).with_guest(guest.clone()),
        );
        let local = control.add_cluster("local", Some(LOCAL_IDENTITY), local_hosts);
        let remote = control.add_cluster("remote", Some(REMOTE_IDENTITY), remote_hosts);
        let local_pools = (0..2)
            .map(|i| control.add_pool(&format!("primary-local-{i}"), Some(local.0.id)))
            .collect();
        let remote_pools = vec![control.add_pool("primary-remote-0", Some(remote.0.id))];
        Self {
            backend,
            guest,
            control,
            naming,
            local,
            remote,
            local_pools,
            remote_pools,
        }
    }

    #[must_use]
    pub fn control_plane(&self) -> Arc<dyn ControlPlane> {
        self.control.clone()
    }

    /// Resolve the topology as seen from the local cluster
    pub async fn topology(&self) -> Result<ClusterTopology, TopologyError> {
        ClusterTopologyResolver::new(self.control_plane(), LocalClusterIdentity::from_value(LOCAL_IDENTITY)?)
            .resolve()
            .await
    }
}

impl Default for TwoClusterEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Write an executable `sh` script
///
/// # Panics
/// If the file cannot be written
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod script");
    path
}

/// `total` global-named records of which only the first is tagged with `id`;
/// the others carry other ids under the same tag key.
#[must_use]
pub fn tag_candidates(kind: ObjectKind, id: ControlPlaneId, total: usize, naming: &NamingScheme) -> Vec<BackendRecord> {
    (0..total)
        .map(|i| {
            let owner = if i == 0 { id } else { ControlPlaneId::new() };
            BackendRecord::new(naming.global_name(&format!("t.{i}.b")), kind, 1 << 30)
                .with_tag(ID_TAG, owner.to_string())
                .with_global_id(format!("t.{i}.b"))
        })
        .collect()
}
