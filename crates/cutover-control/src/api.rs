//! Orchestration control-plane interface
//!
//! The subset of the control plane the harness drives: workloads, volumes,
//! snapshots, configuration and inventory.

use crate::error::ControlPlaneResult;
use crate::offering::{DiskOffering, ServiceOffering};
use async_trait::async_trait;
use cutover_model::{ClusterId, ControlPlaneId, HostId, PoolId, StorageObject, Workload};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Target pool per volume for a workload migration with storage
pub type VolumePoolMap = IndexMap<ControlPlaneId, PoolId>;

/// Scope of a configuration key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigScope {
    #[default]
    Global,
    Cluster(ClusterId),
}

/// A control-plane cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub id: ClusterId,
    pub name: String,
}

/// Host availability as reported by the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostState {
    Up,
    Down,
    Disconnected,
    Maintenance,
    #[serde(other)]
    Unknown,
}

/// A hypervisor host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub id: HostId,
    pub name: String,
    pub cluster_id: ClusterId,
    pub state: HostState,
}

impl HostInfo {
    #[inline]
    #[must_use]
    pub fn is_up(&self) -> bool {
        self.state == HostState::Up
    }
}

/// A primary storage pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoragePoolInfo {
    pub id: PoolId,
    pub name: String,
    /// `None` for zone-wide pools
    pub cluster_id: Option<ClusterId>,
}

/// Role of a volume on its workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VolumeType {
    Root,
    DataDisk,
}

/// The control plane's view of a volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub id: ControlPlaneId,
    pub name: String,
    pub volume_type: VolumeType,
    pub size_bytes: u64,
    pub workload_id: Option<ControlPlaneId>,
    pub pool_id: Option<PoolId>,
    /// Backend path recorded at attach time
    pub path: Option<String>,
}

impl VolumeInfo {
    /// Storage object for identity checks.
    ///
    /// A recorded path that is not the legacy name is taken as the global
    /// name the backend has already assigned.
    #[must_use]
    pub fn to_storage_object(&self, naming: &cutover_model::NamingScheme) -> StorageObject {
        let mut object = StorageObject::volume(self.id, self.size_bytes);
        if let Some(workload) = self.workload_id {
            object = object.attached_to(workload);
        }
        if let Some(path) = self.path.as_deref().map(|p| p.rsplit('/').next().unwrap_or(p)) {
            if naming.classify(path) == cutover_model::NameScheme::Global {
                object = object.with_global_name(path);
            } else {
                object = object.with_legacy_name(path);
            }
        }
        object
    }
}

/// The control plane's view of a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub id: ControlPlaneId,
    pub volume_id: ControlPlaneId,
    pub name: String,
    pub size_bytes: u64,
}

impl SnapshotInfo {
    #[must_use]
    pub fn to_storage_object(&self) -> StorageObject {
        StorageObject::snapshot(self.id, self.size_bytes)
    }
}

/// Parameters for deploying a workload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadSpec {
    pub name: String,
    pub service_offering_id: String,
    pub template_id: String,
    /// Pin to a host; the control plane chooses otherwise
    pub host_id: Option<HostId>,
    /// Deploy with one data disk of this offering
    pub disk_offering_id: Option<String>,
}

/// Orchestration operations used by the harness
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ControlPlane: Send + Sync {
    // Workloads

    async fn list_workloads(&self) -> ControlPlaneResult<Vec<Workload>>;

    async fn get_workload(&self, id: ControlPlaneId) -> ControlPlaneResult<Workload>;

    /// Deploy and start a workload
    async fn create_workload(&self, spec: &WorkloadSpec) -> ControlPlaneResult<Workload>;

    async fn start_workload(
        &self,
        id: ControlPlaneId,
        host: Option<HostId>,
    ) -> ControlPlaneResult<Workload>;

    async fn stop_workload(&self, id: ControlPlaneId, forced: bool) -> ControlPlaneResult<Workload>;

    async fn destroy_workload(&self, id: ControlPlaneId, expunge: bool) -> ControlPlaneResult<()>;

    /// Live-migrate to `host`; volumes in `volume_pools` move with it
    async fn migrate_workload(
        &self,
        id: ControlPlaneId,
        host: HostId,
        volume_pools: &VolumePoolMap,
    ) -> ControlPlaneResult<Workload>;

    // Volumes

    /// Volumes, optionally only those attached to one workload (ROOT first)
    async fn list_volumes(
        &self,
        workload: Option<ControlPlaneId>,
    ) -> ControlPlaneResult<Vec<VolumeInfo>>;

    async fn get_volume(&self, id: ControlPlaneId) -> ControlPlaneResult<VolumeInfo>;

    /// Create a detached data volume; `size_gib` only for customized offerings
    async fn create_volume(
        &self,
        name: &str,
        disk_offering_id: &str,
        size_gib: Option<u64>,
    ) -> ControlPlaneResult<VolumeInfo>;

    async fn attach_volume(
        &self,
        volume: ControlPlaneId,
        workload: ControlPlaneId,
    ) -> ControlPlaneResult<VolumeInfo>;

    async fn detach_volume(&self, volume: ControlPlaneId) -> ControlPlaneResult<VolumeInfo>;

    async fn resize_volume(
        &self,
        volume: ControlPlaneId,
        size_bytes: u64,
    ) -> ControlPlaneResult<VolumeInfo>;

    async fn migrate_volume(
        &self,
        volume: ControlPlaneId,
        pool: PoolId,
        live: bool,
    ) -> ControlPlaneResult<VolumeInfo>;

    async fn delete_volume(&self, volume: ControlPlaneId) -> ControlPlaneResult<()>;

    // Snapshots

    async fn create_snapshot(&self, volume: ControlPlaneId) -> ControlPlaneResult<SnapshotInfo>;

    async fn revert_snapshot(&self, snapshot: ControlPlaneId) -> ControlPlaneResult<()>;

    async fn delete_snapshot(&self, snapshot: ControlPlaneId) -> ControlPlaneResult<()>;

    async fn list_snapshots(
        &self,
        volume: Option<ControlPlaneId>,
    ) -> ControlPlaneResult<Vec<SnapshotInfo>>;

    // Configuration

    /// Current value; `None` when the key is unset in that scope
    async fn get_configuration(
        &self,
        name: &str,
        scope: ConfigScope,
    ) -> ControlPlaneResult<Option<String>>;

    async fn update_configuration(
        &self,
        name: &str,
        value: &str,
        scope: ConfigScope,
    ) -> ControlPlaneResult<()>;

    // Inventory

    /// Clusters of the configured zone
    async fn list_clusters(&self) -> ControlPlaneResult<Vec<ClusterInfo>>;

    /// Hypervisor hosts, optionally of one cluster
    async fn list_hosts(&self, cluster: Option<ClusterId>) -> ControlPlaneResult<Vec<HostInfo>>;

    async fn list_storage_pools(
        &self,
        cluster: Option<ClusterId>,
    ) -> ControlPlaneResult<Vec<StoragePoolInfo>>;

    // Offerings

    /// Register an offering, returning its id
    async fn create_service_offering(&self, offering: &ServiceOffering) -> ControlPlaneResult<String>;

    /// Register an offering, returning its id
    async fn create_disk_offering(&self, offering: &DiskOffering) -> ControlPlaneResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use cutover_model::{NamingScheme, GIB};

    fn volume(path: Option<&str>) -> VolumeInfo {
        VolumeInfo {
            id: ControlPlaneId::new(),
            name: "ROOT-7".to_string(),
            volume_type: VolumeType::Root,
            size_bytes: 10 * GIB,
            workload_id: Some(ControlPlaneId::new()),
            pool_id: None,
            path: path.map(str::to_string),
        }
    }

    #[test]
    fn global_path_becomes_global_name() {
        let info = volume(Some("/dev/storpool-byid/~x.1.a"));
        let object = info.to_storage_object(&NamingScheme::default());
        assert_eq!(object.backend_global_name.as_deref(), Some("~x.1.a"));
        assert!(object.backend_legacy_name.is_none());
        assert!(object.is_attached());
    }

    #[test]
    fn legacy_path_becomes_legacy_name() {
        let info = volume(Some("legacy-name"));
        let object = info.to_storage_object(&NamingScheme::default());
        assert_eq!(object.backend_legacy_name.as_deref(), Some("legacy-name"));
        assert_eq!(object.size_bytes, 10 * GIB);
    }

    #[test]
    fn host_state_tolerates_unknown_values() {
        let state: HostState = serde_json::from_str(r#""Alert""#).unwrap();
        assert_eq!(state, HostState::Unknown);
    }
}
