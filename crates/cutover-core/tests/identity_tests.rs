//! Identity checks across the legacy to global rename

use cutover_backend::{IdentityResolver, ResolutionOrder};
use cutover_control::{destination_host, ControlPlane, TopologyError};
use cutover_core::scenarios::{resize_and_verify, tracked_objects};
use cutover_core::{CapturedState, ConsistencyVerifier, ScenarioConfig, TrackedWorkload};
use cutover_model::{ControlPlaneId, HostId, NameScheme, ObjectKind, StorageObject, GIB};
use cutover_test_utils::{schemes, tag_candidates, FakeGuest, TwoClusterEnv};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

const BACKOFF: Duration = Duration::from_millis(10);

fn resolver(env: &TwoClusterEnv) -> IdentityResolver {
    IdentityResolver::new(env.backend.clone(), env.naming.clone())
}

fn verifier(env: &TwoClusterEnv) -> ConsistencyVerifier {
    ConsistencyVerifier::new(resolver(env), env.control_plane(), Arc::new(FakeGuest::new()))
        .with_retry_backoff(BACKOFF)
}

#[tokio::test]
async fn captured_objects_survive_rename() {
    let env = TwoClusterEnv::new();
    let vm = env.control.add_workload(env.local.1[0], 10 * GIB);
    let spare = env.control.add_volume(5 * GIB);
    let scenario = ScenarioConfig {
        volumes: vec![spare.id],
        workloads: vec![TrackedWorkload {
            id: vm.control_plane_id,
            address: "10.1.1.5".to_string(),
        }],
        ..ScenarioConfig::default()
    };
    let before = tracked_objects(env.control.as_ref(), &env.naming, &scenario).await.unwrap();
    assert_eq!(before.len(), 2);

    let captured = CapturedState::capture(&resolver(&env), before, BACKOFF).await.unwrap();
    assert_eq!(env.backend.rename_all_to_global(&env.naming), 2);
    assert!(schemes(&env.backend.records(ObjectKind::Volume), &env.naming)
        .iter()
        .all(|s| *s == NameScheme::Global));

    let after = tracked_objects(env.control.as_ref(), &env.naming, &scenario).await.unwrap();
    let report = captured.verify_after_cutover(&resolver(&env), &after, BACKOFF).await;
    assert!(report.passed(), "{:?}", report.failures());
    // resolvable, same object, size and tag lookup per object
    assert_eq!(report.checks(), 2 * 4);
}

#[tokio::test]
async fn both_resolution_orders_find_renamed_object() {
    let env = TwoClusterEnv::new();
    let vm = env.control.add_workload(env.local.1[0], 10 * GIB);
    let root = vm.root_volume().unwrap();
    env.backend.rename_to_global(ObjectKind::Volume, root, &env.naming).unwrap();
    let object = env.control.get_volume(root).await.unwrap().to_storage_object(&env.naming);

    for order in [ResolutionOrder::LegacyFirst, ResolutionOrder::GlobalFirst] {
        let record = resolver(&env).with_order(order).resolve_current(&object).await.unwrap();
        assert_eq!(record.scheme(&env.naming), NameScheme::Global);
        assert!(record.belongs_to(root, &env.naming));
    }
}

#[tokio::test]
async fn resize_is_idempotent_under_either_name() {
    let env = TwoClusterEnv::new();
    let vm = env.control.add_workload(env.local.1[0], 10 * GIB);
    let root = vm.root_volume().unwrap();
    let verifier = verifier(&env);

    let legacy = resize_and_verify(env.control.as_ref(), &verifier, root, 12 * GIB).await.unwrap();
    assert!(legacy.passed(), "{:?}", legacy.failures());
    assert_eq!(legacy.checks(), 6);

    env.backend.rename_to_global(ObjectKind::Volume, root, &env.naming).unwrap();
    let global = resize_and_verify(env.control.as_ref(), &verifier, root, 14 * GIB).await.unwrap();
    assert!(global.passed(), "{:?}", global.failures());
    assert_eq!(env.backend.find(ObjectKind::Volume, root, &env.naming).unwrap().size_bytes, 14 * GIB);
}

#[tokio::test]
async fn size_drift_is_reported_not_raised() {
    let env = TwoClusterEnv::new();
    let vm = env.control.add_workload(env.local.1[0], 10 * GIB);
    let root = vm.root_volume().unwrap();
    env.backend.set_size(ObjectKind::Volume, root, &env.naming, 9 * GIB);

    let object = env.control.get_volume(root).await.unwrap().to_storage_object(&env.naming);
    let failure = verifier(&env).size_matches(&object).await.unwrap_err();
    assert_eq!(failure.expected, (10 * GIB).to_string());
    assert_eq!(failure.actual, (9 * GIB).to_string());
}

#[tokio::test]
async fn tag_lookup_picks_the_one_match() {
    let env = TwoClusterEnv::new();
    let id = ControlPlaneId::new();
    for record in tag_candidates(ObjectKind::Volume, id, 5, &env.naming) {
        env.backend.insert(record);
    }

    let record = resolver(&env)
        .resolve_current(&StorageObject::volume(id, GIB))
        .await
        .unwrap();
    assert_eq!(record.name, "~t.0.b");

    let index = resolver(&env).tag_index(ObjectKind::Volume).await.unwrap();
    assert_eq!(index.len(), 5);
    assert_eq!(index.lookup(id).unwrap().name, "~t.0.b");
    assert!(index.lookup(ControlPlaneId::new()).is_err());
}

#[tokio::test]
async fn transient_listing_failure_is_retryable() {
    let env = TwoClusterEnv::new();
    let vm = env.control.add_workload(env.local.1[0], 10 * GIB);
    let object = env
        .control
        .get_volume(vm.root_volume().unwrap())
        .await
        .unwrap()
        .to_storage_object(&env.naming);

    env.backend.fail_next_listings(1);
    let err = CapturedState::capture(&resolver(&env), vec![object.clone()], BACKOFF)
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    let captured = CapturedState::capture(&resolver(&env), vec![object], BACKOFF).await.unwrap();
    assert_eq!(captured.len(), 1);
}

#[tokio::test]
async fn single_host_pool_has_no_destination() {
    let host = HostId::new();
    match destination_host(host, &[host]) {
        Err(TopologyError::NoDestination { current, pool_size }) => {
            assert_eq!(current, host);
            assert_eq!(pool_size, 1);
        }
        other => panic!("expected no destination, got {other:?}"),
    }

    let env = TwoClusterEnv::with_hosts(1, 2);
    assert!(matches!(env.topology().await, Err(TopologyError::TooFewHosts { .. })));
}
