//! In-memory orchestration control plane

use crate::backend::FakeBackend;
use crate::guest::FakeGuest;
use async_trait::async_trait;
use cutover_control::{
    ClusterInfo, ConfigScope, ControlPlane, ControlPlaneError, ControlPlaneResult, DiskOffering,
    HostInfo, HostState, ServiceOffering, SnapshotInfo, StoragePoolInfo, VolumeInfo,
    VolumePoolMap, VolumeType, WorkloadSpec, CLUSTER_IDENTITY_KEY,
};
use cutover_model::{
    ClusterId, ControlPlaneId, HostId, NamingScheme, ObjectKind, PoolId, Workload, WorkloadState,
    GIB,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug)]
struct State {
    clusters: Vec<ClusterInfo>,
    hosts: Vec<HostInfo>,
    pools: Vec<StoragePoolInfo>,
    workloads: Vec<Workload>,
    volumes: Vec<VolumeInfo>,
    snapshots: Vec<SnapshotInfo>,
    configuration: HashMap<(String, Option<ClusterId>), String>,
    disk_offerings: HashMap<String, DiskOffering>,
    service_offerings: HashMap<String, ServiceOffering>,
    migrations: Vec<(ControlPlaneId, HostId)>,
    /// Guest files of the owning workload when a ROOT snapshot was taken
    guest_images: HashMap<ControlPlaneId, (ControlPlaneId, Vec<(String, String)>)>,
    root_size: u64,
}

impl Default for State {
    fn default() -> Self {
        Self {
            clusters: Vec::new(),
            hosts: Vec::new(),
            pools: Vec::new(),
            workloads: Vec::new(),
            volumes: Vec::new(),
            snapshots: Vec::new(),
            configuration: HashMap::new(),
            disk_offerings: HashMap::new(),
            service_offerings: HashMap::new(),
            migrations: Vec::new(),
            guest_images: HashMap::new(),
            root_size: 10 * GIB,
        }
    }
}

/// Control plane keeping clusters, hosts, workloads, volumes and snapshots in
/// memory. With a `FakeBackend` attached, every volume and snapshot it
/// creates, resizes or deletes is mirrored on the backend under its legacy
/// name. With a `FakeGuest` attached, ROOT snapshots capture the guest's
/// files and reverting restores them.
#[derive(Debug, Default)]
pub struct FakeControlPlane {
    state: Mutex<State>,
    backend: Option<(Arc<FakeBackend>, NamingScheme)>,
    guest: Option<Arc<FakeGuest>>,
}

fn not_found(kind: &'static str, id: impl ToString) -> ControlPlaneError {
    ControlPlaneError::NotFound {
        kind,
        id: id.to_string(),
    }
}

fn invalid(message: impl Into<String>) -> ControlPlaneError {
    ControlPlaneError::InvalidRequest(message.into())
}

impl State {
    fn workload_mut(&mut self, id: ControlPlaneId) -> ControlPlaneResult<&mut Workload> {
        self.workloads
            .iter_mut()
            .find(|w| w.control_plane_id == id)
            .ok_or_else(|| not_found("workload", id))
    }

    fn volume_mut(&mut self, id: ControlPlaneId) -> ControlPlaneResult<&mut VolumeInfo> {
        self.volumes
            .iter_mut()
            .find(|v| v.id == id)
            .ok_or_else(|| not_found("volume", id))
    }

    fn host(&self, id: HostId) -> ControlPlaneResult<&HostInfo> {
        self.hosts
            .iter()
            .find(|h| h.id == id)
            .ok_or_else(|| not_found("host", id))
    }

    /// Hosts of `cluster` can use the pool
    fn pool_reachable(&self, pool: PoolId, cluster: ClusterId) -> bool {
        self.pools
            .iter()
            .find(|p| p.id == pool)
            .is_some_and(|p| p.cluster_id.map_or(true, |c| c == cluster))
    }

    /// Where new volumes of a cluster's workloads are placed
    fn first_pool(&self, cluster: ClusterId) -> Option<PoolId> {
        self.pools.iter().find(|p| p.cluster_id == Some(cluster)).map(|p| p.id)
    }
}

impl FakeControlPlane {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mirror storage changes on a backend
    #[must_use]
    pub fn with_backend(backend: Arc<FakeBackend>, naming: NamingScheme) -> Self {
        Self {
            state: Mutex::default(),
            backend: Some((backend, naming)),
            guest: None,
        }
    }

    /// Keep guest files on ROOT snapshots
    #[must_use]
    pub fn with_guest(mut self, guest: Arc<FakeGuest>) -> Self {
        self.guest = Some(guest);
        self
    }

    /// ROOT size of workloads created through `create_workload`
    pub fn set_root_size(&self, size_bytes: u64) {
        self.state.lock().root_size = size_bytes;
    }

    /// Add a cluster with `hosts` Up hosts. With an identity, the cluster's
    /// backend identity key is set to it.
    pub fn add_cluster(&self, name: &str, identity: Option<&str>, hosts: usize) -> (ClusterInfo, Vec<HostId>) {
        let cluster = ClusterInfo {
            id: ClusterId::new(),
            name: name.to_string(),
        };
        let mut state = self.state.lock();
        state.clusters.push(cluster.clone());
        if let Some(identity) = identity {
            state
                .configuration
                .insert((CLUSTER_IDENTITY_KEY.to_string(), Some(cluster.id)), identity.to_string());
        }
        let ids: Vec<HostId> = (0..hosts)
            .map(|i| {
                let host = HostInfo {
                    id: HostId::new(),
                    name: format!("{name}-host-{i}"),
                    cluster_id: cluster.id,
                    state: HostState::Up,
                };
                let id = host.id;
                state.hosts.push(host);
                id
            })
            .collect();
        (cluster, ids)
    }

    pub fn set_host_state(&self, host: HostId, host_state: HostState) {
        if let Some(h) = self.state.lock().hosts.iter_mut().find(|h| h.id == host) {
            h.state = host_state;
        }
    }

    pub fn add_pool(&self, name: &str, cluster: Option<ClusterId>) -> PoolId {
        let pool = StoragePoolInfo {
            id: PoolId::new(),
            name: name.to_string(),
            cluster_id: cluster,
        };
        let id = pool.id;
        self.state.lock().pools.push(pool);
        id
    }

    /// Running workload on `host` with a ROOT volume of `root_size` bytes
    ///
    /// # Panics
    /// If the host is unknown
    pub fn add_workload(&self, host: HostId, root_size: u64) -> Workload {
        let mut state = self.state.lock();
        let cluster = state.host(host).map(|h| h.cluster_id).expect("unknown host");
        let id = ControlPlaneId::new();
        let root = self.new_volume(&format!("ROOT-{id}"), VolumeType::Root, root_size);
        let workload = Workload::running(id, host, cluster, root.id);
        let pool_id = state.first_pool(cluster);
        state.volumes.push(VolumeInfo {
            workload_id: Some(id),
            pool_id,
            ..root
        });
        state.workloads.push(workload.clone());
        workload
    }

    /// Detached data volume
    pub fn add_volume(&self, size_bytes: u64) -> VolumeInfo {
        let volume = self.new_volume("DATA", VolumeType::DataDisk, size_bytes);
        self.state.lock().volumes.push(volume.clone());
        volume
    }

    /// Workload migrations performed, in order
    #[must_use]
    pub fn migrations(&self) -> Vec<(ControlPlaneId, HostId)> {
        self.state.lock().migrations.clone()
    }

    fn new_volume(&self, name: &str, volume_type: VolumeType, size_bytes: u64) -> VolumeInfo {
        let id = ControlPlaneId::new();
        let path = self.backend.as_ref().map(|(backend, naming)| {
            backend.insert_legacy(ObjectKind::Volume, id, size_bytes, naming);
            naming.legacy_name(id)
        });
        VolumeInfo {
            id,
            name: name.to_string(),
            volume_type,
            size_bytes,
            workload_id: None,
            pool_id: None,
            path,
        }
    }

    fn mirror<F: FnOnce(&FakeBackend, &NamingScheme)>(&self, f: F) {
        if let Some((backend, naming)) = &self.backend {
            f(backend, naming);
        }
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn list_workloads(&self) -> ControlPlaneResult<Vec<Workload>> {
        Ok(self.state.lock().workloads.clone())
    }

    async fn get_workload(&self, id: ControlPlaneId) -> ControlPlaneResult<Workload> {
        Ok(self.state.lock().workload_mut(id)?.clone())
    }

    async fn create_workload(&self, spec: &WorkloadSpec) -> ControlPlaneResult<Workload> {
        if !self.state.lock().service_offerings.contains_key(&spec.service_offering_id) {
            return Err(not_found("service offering", &spec.service_offering_id));
        }
        let (host, cluster, root_size, data_size) = {
            let state = self.state.lock();
            let host = match spec.host_id {
                Some(id) => state.host(id)?.clone(),
                None => state
                    .hosts
                    .iter()
                    .find(|h| h.is_up())
                    .cloned()
                    .ok_or_else(|| invalid("no host is up"))?,
            };
            let data_size = match &spec.disk_offering_id {
                Some(id) => {
                    let offering = state
                        .disk_offerings
                        .get(id)
                        .ok_or_else(|| not_found("disk offering", id))?;
                    Some(offering.size_gib.unwrap_or(1) * GIB)
                }
                None => None,
            };
            (host.id, host.cluster_id, state.root_size, data_size)
        };
        let pool_id = self.state.lock().first_pool(cluster);

        let id = ControlPlaneId::new();
        let root = VolumeInfo {
            workload_id: Some(id),
            pool_id,
            ..self.new_volume(&format!("ROOT-{}", spec.name), VolumeType::Root, root_size)
        };
        let mut workload = Workload::running(id, host, cluster, root.id);
        let data = data_size.map(|size| VolumeInfo {
            workload_id: Some(id),
            pool_id,
            ..self.new_volume(&format!("DATA-{}", spec.name), VolumeType::DataDisk, size)
        });

        let mut state = self.state.lock();
        state.volumes.push(root);
        if let Some(data) = data {
            workload.attached_volumes.push(data.id);
            state.volumes.push(data);
        }
        state.workloads.push(workload.clone());
        Ok(workload)
    }

    async fn start_workload(&self, id: ControlPlaneId, host: Option<HostId>) -> ControlPlaneResult<Workload> {
        let mut state = self.state.lock();
        let cluster = match host {
            Some(h) => Some(state.host(h)?.cluster_id),
            None => None,
        };
        let workload = state.workload_mut(id)?;
        if let (Some(h), Some(c)) = (host, cluster) {
            workload.host_id = h;
            workload.cluster_id = c;
        }
        workload.state = WorkloadState::Running;
        Ok(workload.clone())
    }

    async fn stop_workload(&self, id: ControlPlaneId, _forced: bool) -> ControlPlaneResult<Workload> {
        let mut state = self.state.lock();
        let workload = state.workload_mut(id)?;
        workload.state = WorkloadState::Stopped;
        Ok(workload.clone())
    }

    async fn destroy_workload(&self, id: ControlPlaneId, expunge: bool) -> ControlPlaneResult<()> {
        let root = {
            let mut state = self.state.lock();
            let workload = state.workload_mut(id)?.clone();
            state.workloads.retain(|w| w.control_plane_id != id);
            let root = workload.root_volume();
            state.volumes.retain(|v| Some(v.id) != root);
            for volume in state.volumes.iter_mut().filter(|v| v.workload_id == Some(id)) {
                volume.workload_id = None;
            }
            root
        };
        if expunge {
            if let Some(root) = root {
                self.mirror(|backend, naming| {
                    backend.remove(ObjectKind::Volume, root, naming);
                });
            }
        }
        Ok(())
    }

    async fn migrate_workload(
        &self,
        id: ControlPlaneId,
        host: HostId,
        volume_pools: &VolumePoolMap,
    ) -> ControlPlaneResult<Workload> {
        let mut state = self.state.lock();
        let target = state.host(host)?.clone();
        if !target.is_up() {
            return Err(invalid(format!("host {host} is not up")));
        }
        for pool in volume_pools.values() {
            if !state.pools.iter().any(|p| p.id == *pool) {
                return Err(not_found("storage pool", pool));
            }
        }
        let workload = state.workload_mut(id)?.clone();
        if workload.host_id == host {
            return Err(invalid(format!("workload {id} already runs on {host}")));
        }
        if !workload.is_running() {
            return Err(invalid(format!("workload {id} is not running")));
        }
        // Volumes must end up on pools the target cluster can reach
        for volume in &workload.attached_volumes {
            let pool = match volume_pools.get(volume) {
                Some(pool) => Some(*pool),
                None => state.volume_mut(*volume)?.pool_id,
            };
            if let Some(pool) = pool {
                if !state.pool_reachable(pool, target.cluster_id) {
                    return Err(invalid(format!(
                        "volume {volume} on pool {pool} is unreachable from cluster {}",
                        target.cluster_id
                    )));
                }
            }
        }

        for (volume, pool) in volume_pools {
            state.volume_mut(*volume)?.pool_id = Some(*pool);
        }
        let workload = state.workload_mut(id)?;
        workload.host_id = host;
        workload.cluster_id = target.cluster_id;
        let workload = workload.clone();
        state.migrations.push((id, host));
        Ok(workload)
    }

    async fn list_volumes(&self, workload: Option<ControlPlaneId>) -> ControlPlaneResult<Vec<VolumeInfo>> {
        let state = self.state.lock();
        match workload {
            None => Ok(state.volumes.clone()),
            Some(id) => {
                let workload = state
                    .workloads
                    .iter()
                    .find(|w| w.control_plane_id == id)
                    .ok_or_else(|| not_found("workload", id))?;
                Ok(workload
                    .attached_volumes
                    .iter()
                    .filter_map(|v| state.volumes.iter().find(|info| info.id == *v).cloned())
                    .collect())
            }
        }
    }

    async fn get_volume(&self, id: ControlPlaneId) -> ControlPlaneResult<VolumeInfo> {
        Ok(self.state.lock().volume_mut(id)?.clone())
    }

    async fn create_volume(
        &self,
        name: &str,
        disk_offering_id: &str,
        size_gib: Option<u64>,
    ) -> ControlPlaneResult<VolumeInfo> {
        let size = {
            let state = self.state.lock();
            let offering = state
                .disk_offerings
                .get(disk_offering_id)
                .ok_or_else(|| not_found("disk offering", disk_offering_id))?;
            match (offering.customized, offering.size_gib, size_gib) {
                (true, _, Some(size)) => size * GIB,
                (false, Some(size), None) => size * GIB,
                _ => return Err(invalid("size only applies to customized offerings")),
            }
        };
        let volume = self.new_volume(name, VolumeType::DataDisk, size);
        self.state.lock().volumes.push(volume.clone());
        Ok(volume)
    }

    async fn attach_volume(&self, volume: ControlPlaneId, workload: ControlPlaneId) -> ControlPlaneResult<VolumeInfo> {
        let mut state = self.state.lock();
        state.workload_mut(workload)?;
        let info = state.volume_mut(volume)?;
        if info.workload_id.is_some() {
            return Err(invalid(format!("volume {volume} is already attached")));
        }
        info.workload_id = Some(workload);
        let info = info.clone();
        state.workload_mut(workload)?.attached_volumes.push(volume);
        Ok(info)
    }

    async fn detach_volume(&self, volume: ControlPlaneId) -> ControlPlaneResult<VolumeInfo> {
        let mut state = self.state.lock();
        let info = state.volume_mut(volume)?;
        if info.volume_type == VolumeType::Root {
            return Err(invalid("ROOT volumes cannot be detached"));
        }
        let owner = info.workload_id.take();
        let info = info.clone();
        if let Some(owner) = owner {
            state.workload_mut(owner)?.attached_volumes.retain(|v| *v != volume);
        }
        Ok(info)
    }

    async fn resize_volume(&self, volume: ControlPlaneId, size_bytes: u64) -> ControlPlaneResult<VolumeInfo> {
        let info = {
            let mut state = self.state.lock();
            let info = state.volume_mut(volume)?;
            if size_bytes < info.size_bytes {
                return Err(invalid(format!(
                    "shrinking {volume} from {} to {size_bytes} bytes is not allowed",
                    info.size_bytes
                )));
            }
            info.size_bytes = size_bytes;
            info.clone()
        };
        self.mirror(|backend, naming| {
            backend.set_size(ObjectKind::Volume, volume, naming, size_bytes);
        });
        Ok(info)
    }

    async fn migrate_volume(&self, volume: ControlPlaneId, pool: PoolId, _live: bool) -> ControlPlaneResult<VolumeInfo> {
        let mut state = self.state.lock();
        if !state.pools.iter().any(|p| p.id == pool) {
            return Err(not_found("storage pool", pool));
        }
        let info = state.volume_mut(volume)?;
        info.pool_id = Some(pool);
        Ok(info.clone())
    }

    async fn delete_volume(&self, volume: ControlPlaneId) -> ControlPlaneResult<()> {
        {
            let mut state = self.state.lock();
            if state.volume_mut(volume)?.workload_id.is_some() {
                return Err(invalid(format!("volume {volume} is attached")));
            }
            state.volumes.retain(|v| v.id != volume);
        }
        self.mirror(|backend, naming| {
            backend.remove(ObjectKind::Volume, volume, naming);
        });
        Ok(())
    }

    async fn create_snapshot(&self, volume: ControlPlaneId) -> ControlPlaneResult<SnapshotInfo> {
        let (size, root_of) = {
            let mut state = self.state.lock();
            let info = state.volume_mut(volume)?;
            let root_of = info.workload_id.filter(|_| info.volume_type == VolumeType::Root);
            (info.size_bytes, root_of)
        };
        let snapshot = SnapshotInfo {
            id: ControlPlaneId::new(),
            volume_id: volume,
            name: format!("snap-{volume}"),
            size_bytes: size,
        };
        self.mirror(|backend, naming| {
            backend.insert_legacy(ObjectKind::Snapshot, snapshot.id, size, naming);
        });
        let mut state = self.state.lock();
        if let (Some(guest), Some(workload)) = (&self.guest, root_of) {
            state.guest_images.insert(snapshot.id, (workload, guest.files_of(workload)));
        }
        state.snapshots.push(snapshot.clone());
        Ok(snapshot)
    }

    async fn revert_snapshot(&self, snapshot: ControlPlaneId) -> ControlPlaneResult<()> {
        let mut state = self.state.lock();
        let snap = state
            .snapshots
            .iter()
            .find(|s| s.id == snapshot)
            .cloned()
            .ok_or_else(|| not_found("snapshot", snapshot))?;
        let owner = state.volume_mut(snap.volume_id)?.workload_id;
        if let Some(owner) = owner {
            if state.workload_mut(owner)?.is_running() {
                return Err(invalid(format!("workload {owner} must be stopped to revert {snapshot}")));
            }
        }
        state.volume_mut(snap.volume_id)?.size_bytes = snap.size_bytes;
        let image = state.guest_images.get(&snapshot).cloned();
        drop(state);

        if let (Some(guest), Some((workload, files))) = (&self.guest, image) {
            guest.restore(workload, files);
        }
        self.mirror(|backend, naming| {
            backend.set_size(ObjectKind::Volume, snap.volume_id, naming, snap.size_bytes);
        });
        Ok(())
    }

    async fn delete_snapshot(&self, snapshot: ControlPlaneId) -> ControlPlaneResult<()> {
        {
            let mut state = self.state.lock();
            let before = state.snapshots.len();
            state.snapshots.retain(|s| s.id != snapshot);
            if state.snapshots.len() == before {
                return Err(not_found("snapshot", snapshot));
            }
            state.guest_images.remove(&snapshot);
        }
        self.mirror(|backend, naming| {
            backend.remove(ObjectKind::Snapshot, snapshot, naming);
        });
        Ok(())
    }

    async fn list_snapshots(&self, volume: Option<ControlPlaneId>) -> ControlPlaneResult<Vec<SnapshotInfo>> {
        Ok(self
            .state
            .lock()
            .snapshots
            .iter()
            .filter(|s| volume.map_or(true, |v| s.volume_id == v))
            .cloned()
            .collect())
    }

    async fn get_configuration(&self, name: &str, scope: ConfigScope) -> ControlPlaneResult<Option<String>> {
        Ok(self.state.lock().configuration.get(&(name.to_string(), cluster_of(scope))).cloned())
    }

    async fn update_configuration(&self, name: &str, value: &str, scope: ConfigScope) -> ControlPlaneResult<()> {
        self.state
            .lock()
            .configuration
            .insert((name.to_string(), cluster_of(scope)), value.to_string());
        Ok(())
    }

    async fn list_clusters(&self) -> ControlPlaneResult<Vec<ClusterInfo>> {
        Ok(self.state.lock().clusters.clone())
    }

    async fn list_hosts(&self, cluster: Option<ClusterId>) -> ControlPlaneResult<Vec<HostInfo>> {
        Ok(self
            .state
            .lock()
            .hosts
            .iter()
            .filter(|h| cluster.map_or(true, |c| h.cluster_id == c))
            .cloned()
            .collect())
    }

    async fn list_storage_pools(&self, cluster: Option<ClusterId>) -> ControlPlaneResult<Vec<StoragePoolInfo>> {
        Ok(self
            .state
            .lock()
            .pools
            .iter()
            .filter(|p| cluster.map_or(true, |c| p.cluster_id.map_or(true, |pc| pc == c)))
            .cloned()
            .collect())
    }

    async fn create_service_offering(&self, offering: &ServiceOffering) -> ControlPlaneResult<String> {
        offering.validate()?;
        let id = ControlPlaneId::new().to_string();
        self.state.lock().service_offerings.insert(id.clone(), offering.clone());
        Ok(id)
    }

    async fn create_disk_offering(&self, offering: &DiskOffering) -> ControlPlaneResult<String> {
        offering.validate()?;
        let id = ControlPlaneId::new().to_string();
        self.state.lock().disk_offerings.insert(id.clone(), offering.clone());
        Ok(id)
    }
}

fn cluster_of(scope: ConfigScope) -> Option<ClusterId> {
    match scope {
        ConfigScope::Global => None,
        ConfigScope::Cluster(id) => Some(id),
    }
}
