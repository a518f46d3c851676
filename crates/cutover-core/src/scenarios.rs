//! Building blocks of migration scenarios
//!
//! Every mutating step is followed by verifier checks. Checks land in a
//! `VerificationReport`; only infrastructure errors abort a scenario.

use crate::config::{ScenarioConfig, BYPASS_SECONDARY_KEY};
use crate::error::{HarnessError, HarnessResult};
use crate::orchestrator::{
    ControlPlaneConnector, CutoverPlan, MigrationOrchestrator, ReadySession,
};
use crate::verifier::{ConsistencyVerifier, VerificationFailure, VerificationReport};
use cutover_control::{
    destination_host, destination_pool, ConfigScope, ControlPlane, TopologyError, VolumeInfo,
    VolumePoolMap, WorkloadSpec,
};
use cutover_model::{
    ClusterId, ClusterPlacement, ClusterTopology, ControlPlaneId, HostId, NamingScheme, PoolId,
    StorageObject, Workload, GIB,
};
use cutover_supervisor::procfs::start_time;
use cutover_supervisor::{ProcessSupervisor, ReadinessMatcher};
use futures::future::try_join_all;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

/// Storage objects the scenario tracks, as the control plane reports them.
///
/// Configured volumes, every volume of the configured workloads, and the
/// configured snapshots, without duplicates.
pub async fn tracked_objects(
    control: &dyn ControlPlane,
    naming: &NamingScheme,
    scenario: &ScenarioConfig,
) -> HarnessResult<Vec<StorageObject>> {
    let (volumes, attached, snapshots) = futures::try_join!(
        try_join_all(scenario.volumes.iter().map(|id| control.get_volume(*id))),
        try_join_all(scenario.workloads.iter().map(|w| control.list_volumes(Some(w.id)))),
        async {
            if scenario.snapshots.is_empty() {
                Ok(Vec::new())
            } else {
                control.list_snapshots(None).await
            }
        },
    )?;

    let mut objects: Vec<StorageObject> = Vec::new();
    for info in volumes.into_iter().chain(attached.into_iter().flatten()) {
        if !objects.iter().any(|o| o.control_plane_id == info.id) {
            objects.push(info.to_storage_object(naming));
        }
    }
    for id in &scenario.snapshots {
        let snapshot = snapshots
            .iter()
            .find(|s| s.id == *id)
            .ok_or_else(|| cutover_control::ControlPlaneError::NotFound {
                kind: "snapshot",
                id: id.to_string(),
            })?;
        objects.push(snapshot.to_storage_object());
    }
    tracing::info!(objects = objects.len(), "tracked objects listed");
    Ok(objects)
}

/// Set the bypass-secondary toggle, returning the previous value
pub async fn apply_bypass_secondary(
    control: &dyn ControlPlane,
    enabled: bool,
) -> HarnessResult<Option<String>> {
    let previous = control
        .get_configuration(BYPASS_SECONDARY_KEY, ConfigScope::Global)
        .await?;
    let wanted = enabled.to_string();
    if previous.as_deref() == Some(wanted.as_str()) {
        tracing::debug!(key = BYPASS_SECONDARY_KEY, value = %wanted, "already set");
    } else {
        control
            .update_configuration(BYPASS_SECONDARY_KEY, &wanted, ConfigScope::Global)
            .await?;
        tracing::info!(key = BYPASS_SECONDARY_KEY, value = %wanted, ?previous, "configuration updated");
    }
    Ok(previous)
}

/// Ids of the offerings registered for a scenario
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OfferingIds {
    pub service: Option<String>,
    pub disk: Option<String>,
}

/// Register the configured offerings
pub async fn register_offerings(
    control: &dyn ControlPlane,
    scenario: &ScenarioConfig,
) -> HarnessResult<OfferingIds> {
    let mut ids = OfferingIds::default();
    if let Some(offering) = &scenario.service_offering {
        offering.validate()?;
        ids.service = Some(control.create_service_offering(offering).await?);
    }
    if let Some(offering) = &scenario.disk_offering {
        offering.validate()?;
        ids.disk = Some(control.create_disk_offering(offering).await?);
    }
    Ok(ids)
}

/// Deploy a workload from the scenario's template and service offering
pub async fn deploy_workload(
    control: &dyn ControlPlane,
    scenario: &ScenarioConfig,
    offerings: &OfferingIds,
    name: &str,
    host: Option<HostId>,
) -> HarnessResult<Workload> {
    let (Some(template_id), Some(service_offering_id)) =
        (scenario.template_id.clone(), offerings.service.clone())
    else {
        return Err(crate::error::ConfigError::Invalid(
            "deploying needs scenario.template_id and a service offering".to_string(),
        )
        .into());
    };
    let workload = control
        .create_workload(&WorkloadSpec {
            name: name.to_string(),
            service_offering_id,
            template_id,
            host_id: host,
            disk_offering_id: offerings.disk.clone(),
        })
        .await?;
    tracing::info!(workload = %workload.control_plane_id, host = %workload.host_id, "workload deployed");
    Ok(workload)
}

/// Expected ROOT size of deployed workloads
#[inline]
#[must_use]
pub fn root_size_bytes(scenario: &ScenarioConfig) -> u64 {
    scenario.root_size_gib * GIB
}

/// Resize a volume, then resize it again to the same size; sizes must match
/// on both sides after each step and the volume must stay resolvable.
pub async fn resize_and_verify(
    control: &dyn ControlPlane,
    verifier: &ConsistencyVerifier,
    volume: ControlPlaneId,
    size_bytes: u64,
) -> HarnessResult<VerificationReport> {
    let naming = verifier.resolver().naming().clone();
    let mut report = VerificationReport::new();

    for round in ["resize", "repeat_resize"] {
        let info = control.resize_volume(volume, size_bytes).await?;
        report.record(if info.size_bytes == size_bytes {
            Ok(())
        } else {
            Err(VerificationFailure::new(volume, round, size_bytes, info.size_bytes))
        });
        let object = info.to_storage_object(&naming);
        report.record(verifier.identity_resolves(&object).await);
        report.record(verifier.size_matches(&object).await);
    }
    Ok(report)
}

/// Live-migrate a workload to another host of its cluster while checking
/// that guest data survives, then check every attached volume.
pub async fn migrate_and_verify(
    control: &dyn ControlPlane,
    verifier: &ConsistencyVerifier,
    topology: &ClusterTopology,
    workload: ControlPlaneId,
    marker: &str,
) -> HarnessResult<VerificationReport> {
    let before = control.get_workload(workload).await?;
    let placement = placement_of(topology, &before)?;
    let destination = destination_host(before.host_id, &placement.hosts)?;
    migrate_to(
        control,
        verifier,
        &before,
        destination,
        &VolumePoolMap::new(),
        marker,
        || async { Ok(()) },
    )
    .await
}

/// Live-migrate a workload into the other cluster of the topology, moving
/// every attached volume to the first storage pool of that cluster.
pub async fn migrate_across_clusters_and_verify(
    control: &dyn ControlPlane,
    verifier: &ConsistencyVerifier,
    topology: &ClusterTopology,
    workload: ControlPlaneId,
    marker: &str,
) -> HarnessResult<VerificationReport> {
    let before = control.get_workload(workload).await?;
    let current = placement_of(topology, &before)?;
    let target = if current.cluster_id == topology.local_cluster.cluster_id {
        &topology.remote_cluster
    } else {
        &topology.local_cluster
    };
    let destination = destination_host(before.host_id, &target.hosts)?;

    let pools: Vec<PoolId> = control
        .list_storage_pools(Some(target.cluster_id))
        .await?
        .into_iter()
        .map(|p| p.id)
        .collect();
    let pool = destination_pool(None, &pools)?;
    let volume_pools: VolumePoolMap = before.attached_volumes.iter().map(|v| (*v, pool)).collect();
    tracing::info!(%workload, cluster = %target.name, %pool, "cross-cluster migration");

    migrate_to(control, verifier, &before, destination, &volume_pools, marker, || async { Ok(()) }).await
}

fn placement_of<'a>(topology: &'a ClusterTopology, workload: &Workload) -> HarnessResult<&'a ClusterPlacement> {
    [&topology.local_cluster, &topology.remote_cluster]
        .into_iter()
        .find(|c| c.cluster_id == workload.cluster_id)
        .ok_or_else(|| {
            TopologyError::NoDestination {
                current: workload.host_id,
                pool_size: 0,
            }
            .into()
        })
}

/// Migrate with a data round trip around `during` plus the migration, then
/// check placement and every attached volume
async fn migrate_to<F, Fut>(
    control: &dyn ControlPlane,
    verifier: &ConsistencyVerifier,
    before: &Workload,
    destination: HostId,
    volume_pools: &VolumePoolMap,
    marker: &str,
    during: F,
) -> HarnessResult<VerificationReport>
where
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = HarnessResult<()>> + Send,
{
    let naming = verifier.resolver().naming().clone();
    let workload = before.control_plane_id;
    let mut report = VerificationReport::new();
    tracing::info!(
        %workload,
        from = %before.host_id,
        to = %destination,
        volumes = before.attached_volumes.len(),
        remapped = volume_pools.len(),
        "migrating workload"
    );

    report.record(
        verifier
            .data_round_trips(before, marker, move || async move {
                during().await?;
                control.migrate_workload(workload, destination, volume_pools).await?;
                Ok::<(), HarnessError>(())
            })
            .await,
    );

    let after = control.get_workload(workload).await?;
    report.record(if after.host_id == destination {
        Ok(())
    } else {
        Err(VerificationFailure::new(workload, "migrate_host", destination, after.host_id))
    });
    report.record(if after.attached_volumes == before.attached_volumes {
        Ok(())
    } else {
        Err(VerificationFailure::new(
            workload,
            "attached_volumes",
            before.attached_volumes.len(),
            after.attached_volumes.len(),
        ))
    });

    for volume in &after.attached_volumes {
        let info = control.get_volume(*volume).await?;
        if let Some(pool) = volume_pools.get(volume) {
            report.record(if info.pool_id == Some(*pool) {
                Ok(())
            } else {
                Err(VerificationFailure::new(*volume, "volume_pool", pool, describe_pool(info.pool_id)))
            });
        }
        let object = info.to_storage_object(&naming);
        report.record(verifier.identity_resolves(&object).await);
        report.record(verifier.size_matches(&object).await);
    }
    Ok(report)
}

fn describe_pool(pool: Option<PoolId>) -> String {
    pool.map_or_else(|| "no pool".to_string(), |p| p.to_string())
}

/// Move a volume to another storage pool of its cluster, then check it
/// still resolves with the same size.
pub async fn migrate_volume_and_verify(
    control: &dyn ControlPlane,
    verifier: &ConsistencyVerifier,
    volume: ControlPlaneId,
    cluster: ClusterId,
) -> HarnessResult<VerificationReport> {
    let naming = verifier.resolver().naming().clone();
    let mut report = VerificationReport::new();

    let before = control.get_volume(volume).await?;
    let pools: Vec<PoolId> = control
        .list_storage_pools(Some(cluster))
        .await?
        .into_iter()
        .map(|p| p.id)
        .collect();
    let pool = destination_pool(before.pool_id, &pools)?;
    let live = before.workload_id.is_some();
    tracing::info!(%volume, from = %describe_pool(before.pool_id), to = %pool, live, "migrating volume");

    let after = control.migrate_volume(volume, pool, live).await?;
    report.record(if after.pool_id == Some(pool) {
        Ok(())
    } else {
        Err(VerificationFailure::new(volume, "volume_pool", pool, describe_pool(after.pool_id)))
    });
    let object = after.to_storage_object(&naming);
    report.record(verifier.identity_resolves(&object).await);
    report.record(verifier.size_matches(&object).await);
    Ok(report)
}

/// Detach a data volume and attach it again while guest data is checked,
/// verifying the volume after each step.
pub async fn detach_reattach_and_verify(
    control: &dyn ControlPlane,
    verifier: &ConsistencyVerifier,
    workload: ControlPlaneId,
    volume: ControlPlaneId,
    marker: &str,
) -> HarnessResult<VerificationReport> {
    let naming = verifier.resolver().naming().clone();
    let mut report = VerificationReport::new();
    let vm = control.get_workload(workload).await?;

    let mut steps: Vec<(&str, VolumeInfo)> = Vec::with_capacity(2);
    let log = &mut steps;
    report.record(
        verifier
            .data_round_trips(&vm, marker, move || async move {
                log.push(("detach", control.detach_volume(volume).await?));
                log.push(("attach", control.attach_volume(volume, workload).await?));
                Ok::<(), HarnessError>(())
            })
            .await,
    );

    for (step, info) in steps {
        let expected = (step == "attach").then_some(workload);
        report.record(if info.workload_id == expected {
            Ok(())
        } else {
            Err(VerificationFailure::new(
                volume,
                step,
                describe_owner(expected),
                describe_owner(info.workload_id),
            ))
        });
        let object = info.to_storage_object(&naming);
        report.record(verifier.identity_resolves(&object).await);
        report.record(verifier.size_matches(&object).await);
    }

    let after = control.get_workload(workload).await?;
    report.record(if after.attached_volumes.contains(&volume) {
        Ok(())
    } else {
        Err(VerificationFailure::new(workload, "attached_volumes", volume, "missing"))
    });
    Ok(report)
}

fn describe_owner(owner: Option<ControlPlaneId>) -> String {
    owner.map_or_else(|| "detached".to_string(), |w| format!("attached to {w}"))
}

/// Snapshot the ROOT volume, overwrite the guest data, and revert with the
/// workload stopped; the original data must come back.
pub async fn revert_and_verify(
    control: &dyn ControlPlane,
    verifier: &ConsistencyVerifier,
    workload: ControlPlaneId,
    marker: &str,
) -> HarnessResult<VerificationReport> {
    let naming = verifier.resolver().naming().clone();
    let vm = control.get_workload(workload).await?;
    let root = root_volume(&vm)?;
    let mut report = VerificationReport::new();

    let taken = OnceLock::new();
    let slot = &taken;
    let host = vm.host_id;
    report.record(
        verifier
            .data_round_trips(&vm, marker, move || async move {
                let snapshot = control.create_snapshot(root).await?;
                let _ = slot.set(snapshot.to_storage_object());
                verifier.overwrite_marker(workload, marker).await?;
                control.stop_workload(workload, false).await?;
                control.revert_snapshot(snapshot.id).await?;
                control.start_workload(workload, Some(host)).await?;
                Ok::<(), HarnessError>(())
            })
            .await,
    );

    let object = control.get_volume(root).await?.to_storage_object(&naming);
    report.record(verifier.identity_resolves(&object).await);
    report.record(verifier.size_matches(&object).await);

    if let Some(snapshot) = taken.into_inner() {
        report.record(verifier.identity_resolves(&snapshot).await);
        report.merge(delete_snapshot_and_verify(control, verifier, &snapshot).await?);
    }
    Ok(report)
}

fn root_volume(workload: &Workload) -> HarnessResult<ControlPlaneId> {
    workload.root_volume().ok_or_else(|| {
        cutover_control::ControlPlaneError::NotFound {
            kind: "root volume of workload",
            id: workload.control_plane_id.to_string(),
        }
        .into()
    })
}

async fn delete_snapshot_and_verify(
    control: &dyn ControlPlane,
    verifier: &ConsistencyVerifier,
    snapshot: &StorageObject,
) -> HarnessResult<VerificationReport> {
    let mut report = VerificationReport::new();
    control.delete_snapshot(snapshot.control_plane_id).await?;
    let absent = verifier.resolver().confirm_absent(snapshot).await?;
    report.record(if absent {
        Ok(())
    } else {
        Err(VerificationFailure::new(
            snapshot.control_plane_id,
            "snapshot_deleted",
            "absent",
            "still on backend",
        ))
    });
    Ok(report)
}

/// Snapshot the ROOT volume while the workload migrates, then check the
/// snapshot survived and is really gone after deletion.
pub async fn snapshot_across_migration(
    control: &dyn ControlPlane,
    verifier: &ConsistencyVerifier,
    topology: &ClusterTopology,
    workload: ControlPlaneId,
    marker: &str,
) -> HarnessResult<VerificationReport> {
    let before = control.get_workload(workload).await?;
    let root = root_volume(&before)?;
    let placement = placement_of(topology, &before)?;
    let destination = destination_host(before.host_id, &placement.hosts)?;

    let taken = OnceLock::new();
    let slot = &taken;
    let mut report = migrate_to(
        control,
        verifier,
        &before,
        destination,
        &VolumePoolMap::new(),
        marker,
        move || async move {
            let snapshot = control.create_snapshot(root).await?;
            tracing::info!(snapshot = %snapshot.id, %root, "snapshot taken mid-migration");
            let _ = slot.set(snapshot.to_storage_object());
            Ok::<(), HarnessError>(())
        },
    )
    .await?;

    // A failed snapshot is already recorded by the round trip
    let Some(snapshot) = taken.into_inner() else {
        return Ok(report);
    };
    report.record(verifier.identity_resolves(&snapshot).await);
    report.record(verifier.size_matches(&snapshot).await);
    report.merge(delete_snapshot_and_verify(control, verifier, &snapshot).await?);
    Ok(report)
}

/// Everything a config-driven cutover needs besides the clients
pub struct CutoverRun {
    pub plan: CutoverPlan,
    pub supervisor: ProcessSupervisor,
    pub matcher: Box<dyn ReadinessMatcher>,
    pub connector: Arc<dyn ControlPlaneConnector>,
    /// Where the running service's process group id is kept between runs
    pub pid_file: Option<PathBuf>,
}

impl std::fmt::Debug for CutoverRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CutoverRun")
            .field("plan", &self.plan)
            .field("pid_file", &self.pid_file)
            .finish_non_exhaustive()
    }
}

/// Capture the tracked objects, cut over, and check them on the new service.
///
/// The new service keeps running; its process group id goes to the pid file
/// so the next run can stop it.
pub async fn cutover_and_verify(
    run: CutoverRun,
    control: &dyn ControlPlane,
    verifier: &ConsistencyVerifier,
    scenario: &ScenarioConfig,
) -> HarnessResult<(ReadySession, VerificationReport)> {
    let naming = verifier.resolver().naming().clone();
    let tracked = tracked_objects(control, &naming, scenario).await?;
    let backoff = run.plan.retry_backoff;

    let mut orchestrator = MigrationOrchestrator::new(
        run.supervisor.clone(),
        verifier.resolver().clone(),
        run.connector,
        run.matcher,
        run.plan,
    );
    if let Some(pid_file) = &run.pid_file {
        if let Some(record) = read_pid_file(pid_file)? {
            if record.is_current() {
                orchestrator = orchestrator.with_current(run.supervisor.adopt(record.process_group_id));
            } else {
                tracing::warn!(
                    path = %pid_file.display(),
                    pgid = record.process_group_id,
                    "stale pid file, leaving that process group alone"
                );
            }
        }
    }

    let ready = orchestrator.run(tracked).await?;
    if let Some(pid_file) = &run.pid_file {
        write_pid_file(pid_file, &PidRecord::of_running(ready.handle().process_group_id()))?;
    }

    let new_control = ready.control_plane().clone();
    let after = tracked_objects(new_control.as_ref(), &naming, scenario).await?;
    let verifier = verifier.with_control(new_control);

    let mut report = ready
        .captured_state()
        .verify_after_cutover(verifier.resolver(), &after, backoff)
        .await;
    for entry in ready.captured_state().entries() {
        let Some(object) = after
            .iter()
            .find(|o| o.control_plane_id == entry.object.control_plane_id)
        else {
            continue;
        };
        report.record(verifier.size_matches(object).await);
        report.record(verifier.tags_preserved(object, &entry.record.tags).await);
    }
    Ok((ready, report))
}

/// What the pid file keeps about the running service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PidRecord {
    pub process_group_id: u32,
    /// Start time of the group leader, absent in files without one
    pub leader_start: Option<u64>,
}

impl PidRecord {
    /// Record for a group whose leader runs now
    #[must_use]
    pub fn of_running(process_group_id: u32) -> Self {
        Self {
            process_group_id,
            leader_start: start_time(process_group_id),
        }
    }

    /// The recorded leader is still the process running under that pid.
    ///
    /// False once the pid was reused, and for records without a start time.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.leader_start
            .is_some_and(|recorded| start_time(self.process_group_id) == Some(recorded))
    }
}

/// Service recorded by an earlier run, as `<pgid> [<leader start time>]`
pub fn read_pid_file(path: &Path) -> std::io::Result<Option<PidRecord>> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let mut fields = text.split_whitespace();
    let pgid = fields.next().and_then(|f| f.parse().ok());
    let leader_start = fields.next().map(str::parse);
    match (pgid, leader_start) {
        (Some(process_group_id), None) => Ok(Some(PidRecord {
            process_group_id,
            leader_start: None,
        })),
        (Some(process_group_id), Some(Ok(start))) => Ok(Some(PidRecord {
            process_group_id,
            leader_start: Some(start),
        })),
        _ => {
            tracing::warn!(path = %path.display(), content = %text.trim(), "ignoring unreadable pid file");
            Ok(None)
        }
    }
}

pub fn write_pid_file(path: &Path, record: &PidRecord) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let text = match record.leader_start {
        Some(start) => format!("{} {start}\n", record.process_group_id),
        None => format!("{}\n", record.process_group_id),
    };
    std::fs::write(path, text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackedWorkload;
    use crate::guest::MockGuestShell;
    use cutover_backend::IdentityResolver;
    use cutover_test_utils::{FakeBackend, FakeControlPlane};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tempfile::TempDir;

    fn verifier(control: Arc<FakeControlPlane>, backend: Arc<FakeBackend>) -> ConsistencyVerifier {
        ConsistencyVerifier::new(
            IdentityResolver::new(backend, NamingScheme::default()),
            control,
            Arc::new(MockGuestShell::new()),
        )
        .with_retry_backoff(Duration::from_millis(10))
    }

    #[test]
    fn pid_file_round_trip_and_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run/service.pgid");
        assert_eq!(read_pid_file(&path).unwrap(), None);

        let record = PidRecord {
            process_group_id: 4242,
            leader_start: Some(98765),
        };
        write_pid_file(&path, &record).unwrap();
        assert_eq!(read_pid_file(&path).unwrap(), Some(record));

        std::fs::write(&path, "4242\n").unwrap();
        assert_eq!(read_pid_file(&path).unwrap().unwrap().leader_start, None);

        for garbage in ["not a pid", "4242 soon"] {
            std::fs::write(&path, garbage).unwrap();
            assert_eq!(read_pid_file(&path).unwrap(), None);
        }
    }

    #[test]
    fn pid_record_matches_only_the_same_process() {
        let own = std::process::id();
        let running = PidRecord::of_running(own);
        assert!(running.is_current());

        let reused = PidRecord {
            leader_start: running.leader_start.map(|s| s + 1),
            ..running
        };
        assert!(!reused.is_current());
        assert!(!PidRecord {
            process_group_id: own,
            leader_start: None
        }
        .is_current());
    }

    #[tokio::test]
    async fn bypass_secondary_is_applied_once() {
        let control = FakeControlPlane::new();
        assert_eq!(apply_bypass_secondary(&control, true).await.unwrap(), None);
        assert_eq!(
            apply_bypass_secondary(&control, true).await.unwrap().as_deref(),
            Some("true")
        );
        assert_eq!(
            control
                .get_configuration(BYPASS_SECONDARY_KEY, ConfigScope::Global)
                .await
                .unwrap()
                .as_deref(),
            Some("true")
        );
    }

    #[tokio::test]
    async fn tracked_objects_deduplicate_workload_volumes() {
        let backend = Arc::new(FakeBackend::new());
        let control = FakeControlPlane::with_backend(backend, NamingScheme::default());
        let (_, hosts) = control.add_cluster("local", Some("a.b"), 2);
        let vm = control.add_workload(hosts[0], 10 * GIB);
        let root = vm.root_volume().unwrap();

        let scenario = ScenarioConfig {
            volumes: vec![root],
            workloads: vec![TrackedWorkload {
                id: vm.control_plane_id,
                address: "10.1.1.5".to_string(),
            }],
            ..ScenarioConfig::default()
        };
        let objects = tracked_objects(&control, &NamingScheme::default(), &scenario)
            .await
            .unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].control_plane_id, root);
        assert_eq!(objects[0].size_bytes, 10 * GIB);
    }

    #[tokio::test]
    async fn unknown_snapshot_is_an_error() {
        let control = FakeControlPlane::new();
        let scenario = ScenarioConfig {
            snapshots: vec![ControlPlaneId::new()],
            ..ScenarioConfig::default()
        };
        let err = tracked_objects(&control, &NamingScheme::default(), &scenario)
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::ControlPlane(e) if e.is_not_found()));
    }

    #[tokio::test]
    async fn resize_is_idempotent_and_sizes_agree() {
        let backend = Arc::new(FakeBackend::new());
        let control = Arc::new(FakeControlPlane::with_backend(backend.clone(), NamingScheme::default()));
        let (_, hosts) = control.add_cluster("local", Some("a.b"), 2);
        let vm = control.add_workload(hosts[0], 10 * GIB);
        let verifier = verifier(control.clone(), backend);

        let report = resize_and_verify(control.as_ref(), &verifier, vm.root_volume().unwrap(), 20 * GIB)
            .await
            .unwrap();
        assert!(report.passed(), "{:?}", report.failures());
        assert_eq!(report.checks(), 6);
    }

    #[tokio::test]
    async fn deploy_needs_template_and_offering() {
        let control = FakeControlPlane::new();
        let err = deploy_workload(
            &control,
            &ScenarioConfig::default(),
            &OfferingIds::default(),
            "vm-1",
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));
    }
}
