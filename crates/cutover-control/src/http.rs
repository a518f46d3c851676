//! HTTP client for the orchestration API
//!
//! Command-style JSON API: every call is `?command=<name>&response=json` plus
//! parameters. Answers are wrapped as `{"<name>response": {...}}`. Mutating
//! commands return a job id that is polled with `queryAsyncJobResult`.
//!
//! Authentication is a session login: the session cookie is kept by the
//! client's cookie store and the session key is sent with every call.

use crate::api::{
    ClusterInfo, ConfigScope, ControlPlane, HostInfo, HostState, SnapshotInfo, StoragePoolInfo,
    VolumeInfo, VolumePoolMap, VolumeType, WorkloadSpec,
};
use crate::error::{ControlPlaneError, ControlPlaneResult};
use crate::offering::{DiskOffering, ServiceOffering};
use async_trait::async_trait;
use cutover_model::{ClusterId, ControlPlaneId, HostId, PoolId, Workload, WorkloadState, GIB};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

type Params = Vec<(&'static str, String)>;

/// Control-plane client configuration
#[derive(Debug, Clone)]
pub struct HttpControlPlaneConfig {
    /// API endpoint, e.g. `http://10.0.0.2:8080/client/api`
    pub endpoint: String,
    pub username: String,
    pub password: String,
    /// Login domain path, `/` for the root domain
    pub domain: String,
    /// Zone all listings and deployments are scoped to
    pub zone_id: String,
    pub timeout: Duration,
    pub job_poll_interval: Duration,
    pub job_timeout: Duration,
}

/// Session-authenticated orchestration client
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    client: reqwest::Client,
    config: HttpControlPlaneConfig,
    session_key: String,
}

#[derive(Debug, Deserialize)]
struct WireVm {
    id: ControlPlaneId,
    #[serde(default)]
    hostid: Option<HostId>,
    state: String,
}

#[derive(Debug, Deserialize)]
struct WireVolume {
    id: ControlPlaneId,
    name: String,
    #[serde(rename = "type")]
    volume_type: String,
    size: u64,
    #[serde(default)]
    virtualmachineid: Option<ControlPlaneId>,
    #[serde(default)]
    storageid: Option<PoolId>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    deviceid: Option<u32>,
}

impl WireVolume {
    fn into_info(self) -> VolumeInfo {
        VolumeInfo {
            id: self.id,
            name: self.name,
            volume_type: if self.volume_type.eq_ignore_ascii_case("ROOT") {
                VolumeType::Root
            } else {
                VolumeType::DataDisk
            },
            size_bytes: self.size,
            workload_id: self.virtualmachineid,
            pool_id: self.storageid,
            path: self.path,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireSnapshot {
    id: ControlPlaneId,
    volumeid: ControlPlaneId,
    name: String,
    #[serde(default, alias = "virtualsize")]
    size: u64,
}

impl WireSnapshot {
    fn into_info(self) -> SnapshotInfo {
        SnapshotInfo {
            id: self.id,
            volume_id: self.volumeid,
            name: self.name,
            size_bytes: self.size,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireCluster {
    id: ClusterId,
    name: String,
}

#[derive(Debug, Deserialize)]
struct WireHost {
    id: HostId,
    name: String,
    clusterid: ClusterId,
    state: HostState,
}

#[derive(Debug, Deserialize)]
struct WirePool {
    id: PoolId,
    name: String,
    #[serde(default)]
    clusterid: Option<ClusterId>,
}

#[derive(Debug, Deserialize)]
struct WireConfiguration {
    name: String,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireCreated {
    id: String,
}

/// State of a polled async job
#[derive(Debug, Clone, PartialEq)]
enum JobOutcome {
    Pending,
    Succeeded(Value),
    Failed(String),
}

impl HttpControlPlane {
    /// Log in and keep the session
    pub async fn login(config: HttpControlPlaneConfig) -> ControlPlaneResult<Self> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .connect_timeout(Duration::from_secs(15))
            .timeout(config.timeout)
            .build()
            .map_err(|e| ControlPlaneError::Login(e.to_string()))?;

        let response = client
            .post(&config.endpoint)
            .form(&[
                ("command", "login"),
                ("response", "json"),
                ("username", config.username.as_str()),
                ("password", config.password.as_str()),
                ("domain", config.domain.as_str()),
            ])
            .send()
            .await
            .map_err(|e| ControlPlaneError::Login(e.to_string()))?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| ControlPlaneError::Login(format!("unreadable login response: {e}")))?;
        let inner = unwrap_command_response("login", body)
            .map_err(|e| ControlPlaneError::Login(e.to_string()))?;
        let session_key = inner
            .get("sessionkey")
            .and_then(Value::as_str)
            .ok_or_else(|| ControlPlaneError::Login("expected session key after login".to_string()))?
            .to_string();

        tracing::info!(endpoint = %config.endpoint, user = %config.username, "logged in to control plane");
        Ok(Self {
            client,
            config,
            session_key,
        })
    }

    /// Configured zone
    #[inline]
    #[must_use]
    pub fn zone_id(&self) -> &str {
        &self.config.zone_id
    }

    async fn call(&self, command: &str, params: Params) -> ControlPlaneResult<Value> {
        self.call_indexed(command, params, &[]).await
    }

    /// `call` with extra parameters whose keys are built at runtime
    async fn call_indexed(
        &self,
        command: &str,
        params: Params,
        indexed: &[(String, String)],
    ) -> ControlPlaneResult<Value> {
        let mut query: Vec<(&str, String)> = vec![
            ("command", command.to_string()),
            ("response", "json".to_string()),
            ("sessionkey", self.session_key.clone()),
        ];
        query.extend(params);

        tracing::trace!(command, "control plane call");
        let response = self
            .client
            .get(&self.config.endpoint)
            .query(&query)
            .query(indexed)
            .send()
            .await
            .map_err(|e| ControlPlaneError::Transport {
                command: command.to_string(),
                message: e.to_string(),
            })?;
        let status = response.status();
        let body: Value = response.json().await.map_err(|e| ControlPlaneError::Decode {
            command: command.to_string(),
            message: format!("status {status}: {e}"),
        })?;
        unwrap_command_response(command, body)
    }

    /// Run an async command to completion and return its job result
    async fn call_async(&self, command: &str, params: Params) -> ControlPlaneResult<Value> {
        self.call_async_indexed(command, params, &[]).await
    }

    async fn call_async_indexed(
        &self,
        command: &str,
        params: Params,
        indexed: &[(String, String)],
    ) -> ControlPlaneResult<Value> {
        let started = self.call_indexed(command, params, indexed).await?;
        let job_id = started
            .get("jobid")
            .and_then(Value::as_str)
            .ok_or_else(|| ControlPlaneError::Decode {
                command: command.to_string(),
                message: "async command returned no job id".to_string(),
            })?
            .to_string();

        let deadline = tokio::time::Instant::now() + self.config.job_timeout;
        loop {
            let status = self
                .call("queryAsyncJobResult", vec![("jobid", job_id.clone())])
                .await?;
            match job_outcome(command, &status)? {
                JobOutcome::Succeeded(result) => return Ok(result),
                JobOutcome::Failed(message) => {
                    return Err(ControlPlaneError::JobFailed {
                        command: command.to_string(),
                        job_id,
                        message,
                    })
                }
                JobOutcome::Pending if tokio::time::Instant::now() >= deadline => {
                    return Err(ControlPlaneError::JobTimedOut {
                        command: command.to_string(),
                        job_id,
                        waited_secs: self.config.job_timeout.as_secs(),
                    })
                }
                JobOutcome::Pending => tokio::time::sleep(self.config.job_poll_interval).await,
            }
        }
    }

    async fn host(&self, id: HostId) -> ControlPlaneResult<WireHost> {
        let listed = self
            .call("listHosts", vec![("id", id.to_string())])
            .await?;
        list_field::<WireHost>("listHosts", &listed, "host")?
            .into_iter()
            .next()
            .ok_or_else(|| ControlPlaneError::not_found("host", id))
    }

    async fn workload_from_wire(&self, vm: WireVm) -> ControlPlaneResult<Workload> {
        let host_id = vm
            .hostid
            .ok_or_else(|| ControlPlaneError::InvalidRequest(format!("workload {} has no host", vm.id)))?;
        let host = self.host(host_id).await?;
        let volumes = self.list_volumes(Some(vm.id)).await?;
        Ok(Workload {
            control_plane_id: vm.id,
            host_id,
            cluster_id: host.clusterid,
            state: vm.state.parse().unwrap_or(WorkloadState::Stopped),
            attached_volumes: volumes.into_iter().map(|v| v.id).collect(),
        })
    }

    async fn single<T: DeserializeOwned>(
        &self,
        command: &str,
        params: Params,
        field: &str,
        kind: &'static str,
        id: impl ToString,
    ) -> ControlPlaneResult<T> {
        let listed = self.call(command, params).await?;
        list_field::<T>(command, &listed, field)?
            .into_iter()
            .next()
            .ok_or_else(|| ControlPlaneError::not_found(kind, id.to_string()))
    }
}

fn command_key(command: &str) -> String {
    format!("{}response", command.to_lowercase())
}

/// Strip the `<command>response` wrapper, surfacing API errors
fn unwrap_command_response(command: &str, body: Value) -> ControlPlaneResult<Value> {
    let key = command_key(command);
    let inner = match body {
        Value::Object(mut map) => map.remove(&key).or_else(|| map.remove("errorresponse")),
        _ => None,
    }
    .ok_or_else(|| ControlPlaneError::Decode {
        command: command.to_string(),
        message: format!("missing {key} wrapper"),
    })?;

    if let Some(code) = inner.get("errorcode").and_then(Value::as_u64) {
        let message = inner
            .get("errortext")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Err(ControlPlaneError::Api {
            command: command.to_string(),
            code: u16::try_from(code).unwrap_or(u16::MAX),
            message,
        });
    }
    Ok(inner)
}

fn job_outcome(command: &str, status: &Value) -> ControlPlaneResult<JobOutcome> {
    let result = status.get("jobresult").cloned().unwrap_or(Value::Null);
    match status.get("jobstatus").and_then(Value::as_u64) {
        Some(0) => Ok(JobOutcome::Pending),
        Some(1) => Ok(JobOutcome::Succeeded(result)),
        Some(2) => Ok(JobOutcome::Failed(
            result
                .get("errortext")
                .and_then(Value::as_str)
                .unwrap_or("no error text")
                .to_string(),
        )),
        other => Err(ControlPlaneError::Decode {
            command: command.to_string(),
            message: format!("unexpected job status {other:?}"),
        }),
    }
}

/// Decode the list under `field`; listings omit the field when empty
fn list_field<T: DeserializeOwned>(
    command: &str,
    value: &Value,
    field: &str,
) -> ControlPlaneResult<Vec<T>> {
    match value.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(items) => serde_json::from_value(items.clone()).map_err(|e| ControlPlaneError::Decode {
            command: command.to_string(),
            message: format!("{field}: {e}"),
        }),
    }
}

fn object_field<T: DeserializeOwned>(command: &str, value: &Value, field: &str) -> ControlPlaneResult<T> {
    let item = value.get(field).ok_or_else(|| ControlPlaneError::Decode {
        command: command.to_string(),
        message: format!("missing {field}"),
    })?;
    serde_json::from_value(item.clone()).map_err(|e| ControlPlaneError::Decode {
        command: command.to_string(),
        message: format!("{field}: {e}"),
    })
}

/// Command and parameters for a workload migration, with storage when any
/// volume has a target pool
fn migrate_request(
    id: ControlPlaneId,
    host: HostId,
    volume_pools: &VolumePoolMap,
) -> (&'static str, Params, Vec<(String, String)>) {
    let params: Params = vec![("virtualmachineid", id.to_string()), ("hostid", host.to_string())];
    if volume_pools.is_empty() {
        return ("migrateVirtualMachine", params, Vec::new());
    }
    let indexed = volume_pools
        .iter()
        .enumerate()
        .flat_map(|(i, (volume, pool))| {
            [
                (format!("migrateto[{i}].volume"), volume.to_string()),
                (format!("migrateto[{i}].pool"), pool.to_string()),
            ]
        })
        .collect();
    ("migrateVirtualMachineWithVolume", params, indexed)
}

/// ROOT first, then data disks by device slot
fn attach_order(volumes: &mut [VolumeInfo], slots: &[(ControlPlaneId, Option<u32>)]) {
    let slot = |id: ControlPlaneId| {
        slots
            .iter()
            .find(|(v, _)| *v == id)
            .and_then(|(_, s)| *s)
            .unwrap_or(u32::MAX)
    };
    volumes.sort_by_key(|v| (v.volume_type != VolumeType::Root, slot(v.id)));
}

fn scope_params(scope: ConfigScope) -> Params {
    match scope {
        ConfigScope::Global => Vec::new(),
        ConfigScope::Cluster(cluster) => vec![("clusterid", cluster.to_string())],
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn list_workloads(&self) -> ControlPlaneResult<Vec<Workload>> {
        let listed = self
            .call("listVirtualMachines", vec![("zoneid", self.config.zone_id.clone())])
            .await?;
        let mut workloads = Vec::new();
        for vm in list_field::<WireVm>("listVirtualMachines", &listed, "virtualmachine")? {
            if vm.hostid.is_none() {
                tracing::debug!(workload = %vm.id, state = %vm.state, "skipping workload without host");
                continue;
            }
            workloads.push(self.workload_from_wire(vm).await?);
        }
        Ok(workloads)
    }

    async fn get_workload(&self, id: ControlPlaneId) -> ControlPlaneResult<Workload> {
        let vm: WireVm = self
            .single(
                "listVirtualMachines",
                vec![("id", id.to_string())],
                "virtualmachine",
                "workload",
                id,
            )
            .await?;
        self.workload_from_wire(vm).await
    }

    async fn create_workload(&self, spec: &WorkloadSpec) -> ControlPlaneResult<Workload> {
        let mut params: Params = vec![
            ("zoneid", self.config.zone_id.clone()),
            ("serviceofferingid", spec.service_offering_id.clone()),
            ("templateid", spec.template_id.clone()),
            ("name", spec.name.clone()),
            ("displayname", spec.name.clone()),
        ];
        if let Some(host) = spec.host_id {
            params.push(("hostid", host.to_string()));
        }
        if let Some(disk) = &spec.disk_offering_id {
            params.push(("diskofferingid", disk.clone()));
        }
        let result = self.call_async("deployVirtualMachine", params).await?;
        let vm: WireVm = object_field("deployVirtualMachine", &result, "virtualmachine")?;
        tracing::info!(workload = %vm.id, name = %spec.name, "deployed workload");
        self.get_workload(vm.id).await
    }

    async fn start_workload(
        &self,
        id: ControlPlaneId,
        host: Option<HostId>,
    ) -> ControlPlaneResult<Workload> {
        let mut params: Params = vec![("id", id.to_string())];
        if let Some(host) = host {
            params.push(("hostid", host.to_string()));
        }
        self.call_async("startVirtualMachine", params).await?;
        self.get_workload(id).await
    }

    async fn stop_workload(&self, id: ControlPlaneId, forced: bool) -> ControlPlaneResult<Workload> {
        self.call_async(
            "stopVirtualMachine",
            vec![("id", id.to_string()), ("forced", forced.to_string())],
        )
        .await?;
        self.get_workload(id).await
    }

    async fn destroy_workload(&self, id: ControlPlaneId, expunge: bool) -> ControlPlaneResult<()> {
        self.call_async(
            "destroyVirtualMachine",
            vec![("id", id.to_string()), ("expunge", expunge.to_string())],
        )
        .await?;
        Ok(())
    }

    async fn migrate_workload(
        &self,
        id: ControlPlaneId,
        host: HostId,
        volume_pools: &VolumePoolMap,
    ) -> ControlPlaneResult<Workload> {
        let (command, params, indexed) = migrate_request(id, host, volume_pools);
        tracing::info!(workload = %id, %host, volumes = volume_pools.len(), command, "migrating workload");
        self.call_async_indexed(command, params, &indexed).await?;
        self.get_workload(id).await
    }

    async fn list_volumes(
        &self,
        workload: Option<ControlPlaneId>,
    ) -> ControlPlaneResult<Vec<VolumeInfo>> {
        let mut params: Params = vec![("zoneid", self.config.zone_id.clone())];
        if let Some(workload) = workload {
            params.push(("virtualmachineid", workload.to_string()));
        }
        let listed = self.call("listVolumes", params).await?;
        let wire = list_field::<WireVolume>("listVolumes", &listed, "volume")?;
        let slots: Vec<(ControlPlaneId, Option<u32>)> = wire.iter().map(|v| (v.id, v.deviceid)).collect();
        let mut volumes: Vec<VolumeInfo> = wire.into_iter().map(WireVolume::into_info).collect();
        if workload.is_some() {
            attach_order(&mut volumes, &slots);
        }
        Ok(volumes)
    }

    async fn get_volume(&self, id: ControlPlaneId) -> ControlPlaneResult<VolumeInfo> {
        let wire: WireVolume = self
            .single("listVolumes", vec![("id", id.to_string())], "volume", "volume", id)
            .await?;
        Ok(wire.into_info())
    }

    async fn create_volume(
        &self,
        name: &str,
        disk_offering_id: &str,
        size_gib: Option<u64>,
    ) -> ControlPlaneResult<VolumeInfo> {
        let mut params: Params = vec![
            ("zoneid", self.config.zone_id.clone()),
            ("name", name.to_string()),
            ("diskofferingid", disk_offering_id.to_string()),
        ];
        if let Some(size) = size_gib {
            params.push(("size", size.to_string()));
        }
        let result = self.call_async("createVolume", params).await?;
        let wire: WireVolume = object_field("createVolume", &result, "volume")?;
        Ok(wire.into_info())
    }

    async fn attach_volume(
        &self,
        volume: ControlPlaneId,
        workload: ControlPlaneId,
    ) -> ControlPlaneResult<VolumeInfo> {
        let result = self
            .call_async(
                "attachVolume",
                vec![("id", volume.to_string()), ("virtualmachineid", workload.to_string())],
            )
            .await?;
        let wire: WireVolume = object_field("attachVolume", &result, "volume")?;
        Ok(wire.into_info())
    }

    async fn detach_volume(&self, volume: ControlPlaneId) -> ControlPlaneResult<VolumeInfo> {
        let result = self
            .call_async("detachVolume", vec![("id", volume.to_string())])
            .await?;
        let wire: WireVolume = object_field("detachVolume", &result, "volume")?;
        Ok(wire.into_info())
    }

    async fn resize_volume(
        &self,
        volume: ControlPlaneId,
        size_bytes: u64,
    ) -> ControlPlaneResult<VolumeInfo> {
        if size_bytes == 0 || size_bytes % GIB != 0 {
            return Err(ControlPlaneError::InvalidRequest(format!(
                "resize of {volume} to {size_bytes} bytes: size must be a whole number of GiB"
            )));
        }
        self.call_async(
            "resizeVolume",
            vec![("id", volume.to_string()), ("size", (size_bytes / GIB).to_string())],
        )
        .await?;
        self.get_volume(volume).await
    }

    async fn migrate_volume(
        &self,
        volume: ControlPlaneId,
        pool: PoolId,
        live: bool,
    ) -> ControlPlaneResult<VolumeInfo> {
        let result = self
            .call_async(
                "migrateVolume",
                vec![
                    ("volumeid", volume.to_string()),
                    ("storageid", pool.to_string()),
                    ("livemigrate", live.to_string()),
                ],
            )
            .await?;
        let wire: WireVolume = object_field("migrateVolume", &result, "volume")?;
        Ok(wire.into_info())
    }

    async fn delete_volume(&self, volume: ControlPlaneId) -> ControlPlaneResult<()> {
        self.call("deleteVolume", vec![("id", volume.to_string())]).await?;
        Ok(())
    }

    async fn create_snapshot(&self, volume: ControlPlaneId) -> ControlPlaneResult<SnapshotInfo> {
        let result = self
            .call_async("createSnapshot", vec![("volumeid", volume.to_string())])
            .await?;
        let wire: WireSnapshot = object_field("createSnapshot", &result, "snapshot")?;
        Ok(wire.into_info())
    }

    async fn revert_snapshot(&self, snapshot: ControlPlaneId) -> ControlPlaneResult<()> {
        self.call_async("revertSnapshot", vec![("id", snapshot.to_string())])
            .await?;
        Ok(())
    }

    async fn delete_snapshot(&self, snapshot: ControlPlaneId) -> ControlPlaneResult<()> {
        self.call_async("deleteSnapshot", vec![("id", snapshot.to_string())])
            .await?;
        Ok(())
    }

    async fn list_snapshots(
        &self,
        volume: Option<ControlPlaneId>,
    ) -> ControlPlaneResult<Vec<SnapshotInfo>> {
        let params: Params = volume
            .map(|v| vec![("volumeid", v.to_string())])
            .unwrap_or_default();
        let listed = self.call("listSnapshots", params).await?;
        Ok(list_field::<WireSnapshot>("listSnapshots", &listed, "snapshot")?
            .into_iter()
            .map(WireSnapshot::into_info)
            .collect())
    }

    async fn get_configuration(
        &self,
        name: &str,
        scope: ConfigScope,
    ) -> ControlPlaneResult<Option<String>> {
        let mut params = scope_params(scope);
        params.push(("name", name.to_string()));
        let listed = self.call("listConfigurations", params).await?;
        // The name parameter is a substring filter
        Ok(list_field::<WireConfiguration>("listConfigurations", &listed, "configuration")?
            .into_iter()
            .find(|c| c.name == name)
            .and_then(|c| c.value)
            .filter(|v| !v.is_empty()))
    }

    async fn update_configuration(
        &self,
        name: &str,
        value: &str,
        scope: ConfigScope,
    ) -> ControlPlaneResult<()> {
        let mut params = scope_params(scope);
        params.push(("name", name.to_string()));
        params.push(("value", value.to_string()));
        self.call("updateConfiguration", params).await?;
        tracing::info!(name, value, ?scope, "updated configuration");
        Ok(())
    }

    async fn list_clusters(&self) -> ControlPlaneResult<Vec<ClusterInfo>> {
        let listed = self
            .call("listClusters", vec![("zoneid", self.config.zone_id.clone())])
            .await?;
        Ok(list_field::<WireCluster>("listClusters", &listed, "cluster")?
            .into_iter()
            .map(|c| ClusterInfo { id: c.id, name: c.name })
            .collect())
    }

    async fn list_hosts(&self, cluster: Option<ClusterId>) -> ControlPlaneResult<Vec<HostInfo>> {
        let mut params: Params = vec![
            ("zoneid", self.config.zone_id.clone()),
            ("type", "Routing".to_string()),
        ];
        if let Some(cluster) = cluster {
            params.push(("clusterid", cluster.to_string()));
        }
        let listed = self.call("listHosts", params).await?;
        Ok(list_field::<WireHost>("listHosts", &listed, "host")?
            .into_iter()
            .map(|h| HostInfo {
                id: h.id,
                name: h.name,
                cluster_id: h.clusterid,
                state: h.state,
            })
            .collect())
    }

    async fn list_storage_pools(
        &self,
        cluster: Option<ClusterId>,
    ) -> ControlPlaneResult<Vec<StoragePoolInfo>> {
        let mut params: Params = vec![("zoneid", self.config.zone_id.clone())];
        if let Some(cluster) = cluster {
            params.push(("clusterid", cluster.to_string()));
        }
        let listed = self.call("listStoragePools", params).await?;
        Ok(list_field::<WirePool>("listStoragePools", &listed, "storagepool")?
            .into_iter()
            .map(|p| StoragePoolInfo {
                id: p.id,
                name: p.name,
                cluster_id: p.clusterid,
            })
            .collect())
    }

    async fn create_service_offering(&self, offering: &ServiceOffering) -> ControlPlaneResult<String> {
        offering.validate()?;
        let mut params: Params = vec![
            ("name", offering.name.clone()),
            ("displaytext", offering.name.clone()),
            ("cpunumber", offering.cpu_count.to_string()),
            ("cpuspeed", offering.cpu_speed_mhz.to_string()),
            ("memory", offering.memory_mib.to_string()),
        ];
        if let Some(tags) = &offering.storage_tags {
            params.push(("tags", tags.clone()));
        }
        let created = self.call("createServiceOffering", params).await?;
        let created: WireCreated = object_field("createServiceOffering", &created, "serviceoffering")?;
        Ok(created.id)
    }

    async fn create_disk_offering(&self, offering: &DiskOffering) -> ControlPlaneResult<String> {
        offering.validate()?;
        let mut params: Params = vec![
            ("name", offering.name.clone()),
            ("displaytext", offering.name.clone()),
            ("customized", offering.customized.to_string()),
        ];
        if let Some(size) = offering.size_gib {
            params.push(("disksize", size.to_string()));
        }
        if let Some(tags) = &offering.storage_tags {
            params.push(("tags", tags.clone()));
        }
        let created = self.call("createDiskOffering", params).await?;
        let created: WireCreated = object_field("createDiskOffering", &created, "diskoffering")?;
        Ok(created.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn response_wrapper_is_stripped() {
        let body = json!({"listclustersresponse": {"count": 1, "cluster": [{"id": ClusterId::new(), "name": "c1"}]}});
        let inner = unwrap_command_response("listClusters", body).unwrap();
        let clusters: Vec<WireCluster> = list_field("listClusters", &inner, "cluster").unwrap();
        assert_eq!(clusters[0].name, "c1");
    }

    #[test]
    fn error_code_becomes_api_error() {
        let body = json!({"migratevolumeresponse": {"errorcode": 431, "errortext": "pool not found"}});
        match unwrap_command_response("migrateVolume", body) {
            Err(ControlPlaneError::Api { code, message, .. }) => {
                assert_eq!(code, 431);
                assert_eq!(message, "pool not found");
            }
            other => panic!("expected api error, got {other:?}"),
        }
    }

    #[test]
    fn empty_listing_has_no_field() {
        let inner = unwrap_command_response("listHosts", json!({"listhostsresponse": {}})).unwrap();
        let hosts: Vec<WireHost> = list_field("listHosts", &inner, "host").unwrap();
        assert!(hosts.is_empty());
    }

    #[test]
    fn job_status_mapping() {
        assert_eq!(job_outcome("x", &json!({"jobstatus": 0})).unwrap(), JobOutcome::Pending);
        assert_eq!(
            job_outcome("x", &json!({"jobstatus": 2, "jobresult": {"errortext": "no capacity"}})).unwrap(),
            JobOutcome::Failed("no capacity".to_string())
        );
        match job_outcome("x", &json!({"jobstatus": 1, "jobresult": {"volume": {}}})).unwrap() {
            JobOutcome::Succeeded(result) => assert!(result.get("volume").is_some()),
            other => panic!("expected success, got {other:?}"),
        }
        assert!(job_outcome("x", &json!({"jobstatus": 7})).is_err());
    }

    #[test]
    fn migration_without_pools_keeps_storage() {
        let (command, params, indexed) =
            migrate_request(ControlPlaneId::new(), HostId::new(), &VolumePoolMap::new());
        assert_eq!(command, "migrateVirtualMachine");
        assert_eq!(params.len(), 2);
        assert!(indexed.is_empty());
    }

    #[test]
    fn migration_with_pools_indexes_volumes() {
        let mut pools = VolumePoolMap::new();
        let (root, data) = (ControlPlaneId::new(), ControlPlaneId::new());
        let pool = PoolId::new();
        pools.insert(root, pool);
        pools.insert(data, pool);

        let (command, _, indexed) = migrate_request(ControlPlaneId::new(), HostId::new(), &pools);
        assert_eq!(command, "migrateVirtualMachineWithVolume");
        assert_eq!(indexed[0], ("migrateto[0].volume".to_string(), root.to_string()));
        assert_eq!(indexed[2], ("migrateto[1].volume".to_string(), data.to_string()));
        assert_eq!(indexed[3], ("migrateto[1].pool".to_string(), pool.to_string()));
    }

    #[test]
    fn attached_volumes_root_first_then_slot() {
        let wire: Vec<WireVolume> = serde_json::from_value(json!([
            {"id": ControlPlaneId::new(), "name": "d2", "type": "DATADISK", "size": 1, "deviceid": 2},
            {"id": ControlPlaneId::new(), "name": "d1", "type": "DATADISK", "size": 1, "deviceid": 1},
            {"id": ControlPlaneId::new(), "name": "root", "type": "ROOT", "size": 1, "deviceid": 0},
        ]))
        .unwrap();
        let slots: Vec<_> = wire.iter().map(|v| (v.id, v.deviceid)).collect();
        let mut volumes: Vec<VolumeInfo> = wire.into_iter().map(WireVolume::into_info).collect();
        attach_order(&mut volumes, &slots);

        let names: Vec<&str> = volumes.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["root", "d1", "d2"]);
    }

    #[test]
    fn snapshot_size_from_virtual_size() {
        let wire: WireSnapshot = serde_json::from_value(json!({
            "id": ControlPlaneId::new(),
            "volumeid": ControlPlaneId::new(),
            "name": "s1",
            "virtualsize": 10 * GIB,
        }))
        .unwrap();
        assert_eq!(wire.into_info().size_bytes, 10 * GIB);
    }
}
