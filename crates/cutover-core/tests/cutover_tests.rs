//! Full cutovers with real build and service processes

use cutover_backend::IdentityResolver;
use cutover_core::scenarios::{cutover_and_verify, read_pid_file, CutoverRun, PidRecord};
use cutover_core::{
    ConsistencyVerifier, CutoverError, CutoverPlan, HarnessError, ScenarioConfig, TrackedWorkload,
};
use cutover_model::{NameScheme, ObjectKind, GIB};
use cutover_supervisor::{
    group_status, BuildParams, GroupStatus, MarkerMatcher, ProcessSupervisor, SupervisorConfig,
};
use std::os::unix::process::CommandExt;
use cutover_test_utils::{schemes, write_script, FakeConnector, FakeGuest, TwoClusterEnv};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const GRACE: Duration = Duration::from_secs(2);

struct Harness {
    dir: TempDir,
    env: TwoClusterEnv,
    scenario: ScenarioConfig,
    supervisor: ProcessSupervisor,
}

impl Harness {
    fn new(build: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let env = TwoClusterEnv::new();
        let vm = env.control.add_workload(env.local.1[0], 10 * GIB);
        let spare = env.control.add_volume(3 * GIB);
        let scenario = ScenarioConfig {
            volumes: vec![spare.id],
            workloads: vec![TrackedWorkload {
                id: vm.control_plane_id,
                address: "10.1.1.5".to_string(),
            }],
            ..ScenarioConfig::default()
        };
        let build = write_script(dir.path(), "build.sh", build);
        write_script(dir.path(), "start.sh", r#"echo "booting $1"; echo READY; exec sleep 30"#);
        let supervisor = ProcessSupervisor::new(
            SupervisorConfig::new(build, dir.path().join("logs/service.log"))
                .with_poll_interval(Duration::from_millis(20)),
        );
        Self {
            dir,
            env,
            scenario,
            supervisor,
        }
    }

    fn verifier(&self) -> ConsistencyVerifier {
        ConsistencyVerifier::new(
            IdentityResolver::new(self.env.backend.clone(), self.env.naming.clone()),
            self.env.control_plane(),
            Arc::new(FakeGuest::new()),
        )
        .with_retry_backoff(Duration::from_millis(10))
    }

    /// Connector whose connect applies the backend's rename pass
    fn renaming_connector(&self) -> FakeConnector {
        let backend = self.env.backend.clone();
        let naming = self.env.naming.clone();
        FakeConnector::new(self.env.control_plane()).on_connect(move || {
            backend.rename_all_to_global(&naming);
        })
    }

    fn run(&self, to_revision: &str, connector: FakeConnector) -> CutoverRun {
        let dir = self.dir.path();
        CutoverRun {
            plan: CutoverPlan {
                from_revision: "main".to_string(),
                to_revision: to_revision.to_string(),
                build: BuildParams {
                    workspace: dir.to_path_buf(),
                    forked_repo: dir.to_path_buf(),
                    remote_hosts: Vec::new(),
                },
                start_command: vec![dir.join("start.sh").display().to_string(), to_revision.to_string()],
                working_dir: dir.to_path_buf(),
                ready_timeout: Duration::from_secs(5),
                grace: GRACE,
                retry_backoff: Duration::from_millis(10),
            },
            supervisor: self.supervisor.clone(),
            matcher: Box::new(MarkerMatcher::new("READY").with_failure("FATAL")),
            connector: Arc::new(connector),
            pid_file: Some(self.pid_file()),
        }
    }

    fn pid_file(&self) -> std::path::PathBuf {
        self.dir.path().join("run/service.pgid")
    }

    fn recorded_pgid(&self) -> Option<u32> {
        read_pid_file(&self.pid_file()).unwrap().map(|r| r.process_group_id)
    }
}

#[tokio::test]
async fn cutover_preserves_captured_state() {
    let h = Harness::new("exit 0");
    let verifier = h.verifier();

    let (ready, report) = cutover_and_verify(
        h.run("4f2c9e1", h.renaming_connector()),
        h.env.control.as_ref(),
        &verifier,
        &h.scenario,
    )
    .await
    .unwrap();

    assert!(report.passed(), "{:?}", report.failures());
    assert_eq!(ready.captured_state().len(), 2);
    assert!(ready
        .captured_state()
        .entries()
        .iter()
        .all(|e| e.record.scheme(&h.env.naming) == NameScheme::Legacy));
    assert!(schemes(&h.env.backend.records(ObjectKind::Volume), &h.env.naming)
        .iter()
        .all(|s| *s == NameScheme::Global));
    assert_eq!(ready.revisions(), ("main", "4f2c9e1"));

    let pgid = ready.handle().process_group_id();
    assert_eq!(h.recorded_pgid(), Some(pgid));
    assert!(read_pid_file(&h.pid_file()).unwrap().unwrap().is_current());

    let log = std::fs::read_to_string(&h.supervisor.config().output_path).unwrap();
    assert!(log.contains("booting 4f2c9e1"), "log was: {log}");

    let mut handle = ready.into_handle();
    assert!(h.supervisor.terminate(&mut handle, GRACE).await.confirmed_gone);
}

#[tokio::test]
async fn next_cutover_stops_the_recorded_service() {
    let h = Harness::new("exit 0");
    let verifier = h.verifier();

    let (first, _) = cutover_and_verify(
        h.run("rev-1", h.renaming_connector()),
        h.env.control.as_ref(),
        &verifier,
        &h.scenario,
    )
    .await
    .unwrap();
    let mut first = first.into_handle();

    let (second, report) = cutover_and_verify(
        h.run("rev-2", h.renaming_connector()),
        h.env.control.as_ref(),
        &verifier,
        &h.scenario,
    )
    .await
    .unwrap();
    assert!(report.passed(), "{:?}", report.failures());
    assert_eq!(h.recorded_pgid(), Some(second.handle().process_group_id()));

    // The adopted first service got SIGTERM from the second run
    let mut exited = false;
    for _ in 0..100 {
        if first.try_exit_status().unwrap().is_some() {
            exited = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(exited, "first service still running");

    let mut handle = second.into_handle();
    h.supervisor.terminate(&mut handle, GRACE).await;
}

#[tokio::test]
async fn failed_build_leaves_names_untouched() {
    let h = Harness::new("echo 'compile error'; exit 3");
    let verifier = h.verifier();
    let connector = h.renaming_connector();

    let err = cutover_and_verify(h.run("broken", connector), h.env.control.as_ref(), &verifier, &h.scenario)
        .await
        .unwrap_err();

    assert!(matches!(err, HarnessError::Cutover(CutoverError::Build(_))), "{err}");
    assert!(schemes(&h.env.backend.records(ObjectKind::Volume), &h.env.naming)
        .iter()
        .all(|s| *s == NameScheme::Legacy));
    assert_eq!(h.recorded_pgid(), None);
}

#[tokio::test]
async fn refused_login_fails_the_cutover() {
    let h = Harness::new("exit 0");
    let verifier = h.verifier();

    let err = cutover_and_verify(
        h.run("4f2c9e1", h.renaming_connector().refusing(1)),
        h.env.control.as_ref(),
        &verifier,
        &h.scenario,
    )
    .await
    .unwrap_err();

    match err {
        HarnessError::Cutover(e @ CutoverError::Connect(_)) => assert!(e.is_fatal()),
        other => panic!("expected connect failure, got {other}"),
    }
    assert_eq!(h.recorded_pgid(), None);
}

#[tokio::test]
async fn stale_pid_file_does_not_signal_a_reused_pid() {
    let h = Harness::new("exit 0");
    let verifier = h.verifier();

    // An unrelated group now owns the recorded pid
    let mut bystander = std::process::Command::new("sleep")
        .arg("30")
        .process_group(0)
        .spawn()
        .unwrap();
    let pgid = bystander.id();
    let started = cutover_supervisor::procfs::start_time(pgid).unwrap();
    cutover_core::scenarios::write_pid_file(
        &h.pid_file(),
        &PidRecord {
            process_group_id: pgid,
            leader_start: Some(started + 1),
        },
    )
    .unwrap();

    let (ready, report) = cutover_and_verify(
        h.run("4f2c9e1", h.renaming_connector()),
        h.env.control.as_ref(),
        &verifier,
        &h.scenario,
    )
    .await
    .unwrap();
    assert!(report.passed(), "{:?}", report.failures());

    assert!(bystander.try_wait().unwrap().is_none(), "bystander was signalled");
    assert_eq!(group_status(pgid), GroupStatus::Alive);
    assert_eq!(h.recorded_pgid(), Some(ready.handle().process_group_id()));

    bystander.kill().unwrap();
    bystander.wait().unwrap();
    let mut handle = ready.into_handle();
    h.supervisor.terminate(&mut handle, GRACE).await;
}
