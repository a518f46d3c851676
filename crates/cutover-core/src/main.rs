use anyhow::{bail, Context};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use cutover_backend::{HttpStorageBackend, IdentityResolver, StorageBackend};
use cutover_control::{ClusterTopologyResolver, ControlPlane, HttpControlPlane};
use cutover_core::orchestrator::{CutoverPlan, HttpConnector};
use cutover_core::scenarios::{self, CutoverRun};
use cutover_core::{ConsistencyVerifier, HarnessConfig, HarnessContext, SshGuestShell};
use cutover_model::{ControlPlaneId, StorageObject};
use cutover_supervisor::{BuildParams, ProcessSupervisor, MAX_REMOTE_HOSTS};
use std::path::PathBuf;
use std::sync::Arc;

fn cli() -> Command {
    Command::new("cutover-harness")
        .version(cutover_core::VERSION)
        .about("Redeploys the control plane and verifies storage identity across the cutover")
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Harness configuration, TOML or YAML"),
        )
        .arg(
            Arg::new("workspace")
                .long("workspace")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Working directory; logs go to <workspace>/logs"),
        )
        .arg(
            Arg::new("build-script")
                .long("build-script")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Script building a revision"),
        )
        .arg(
            Arg::new("from-revision")
                .long("from-revision")
                .global(true)
                .help("Revision currently deployed"),
        )
        .arg(
            Arg::new("to-revision")
                .long("to-revision")
                .global(true)
                .help("Revision to cut over to"),
        )
        .arg(
            Arg::new("forked-repo")
                .long("forked-repo")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Checkout the build script works in"),
        )
        .arg(
            Arg::new("remote")
                .long("remote")
                .global(true)
                .action(ArgAction::Append)
                .help("Remote host the build deploys to (repeatable, at most 3)"),
        )
        .subcommand(Command::new("cutover").about("Capture, cut over and verify (default)"))
        .subcommand(Command::new("topology").about("Print the resolved local/remote topology"))
        .subcommand(
            Command::new("resolve")
                .about("Resolve one volume on the backend")
                .arg(
                    Arg::new("id")
                        .required(true)
                        .value_parser(value_parser!(ControlPlaneId))
                        .help("Control-plane volume id"),
                ),
        )
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    // Global flags propagate into the subcommand's matches
    let (command, args) = match matches.subcommand() {
        Some((name, sub)) => (name, sub),
        None => ("cutover", &matches),
    };
    let workspace = args
        .get_one::<PathBuf>("workspace")
        .cloned()
        .context("--workspace is required")?;

    let ctx = HarnessContext::create(&workspace).context("creating harness context")?;
    let result = run(command, args, &workspace).await;
    if let Err(e) = &result {
        tracing::error!(error = %format!("{e:#}"), "harness failed");
    }
    ctx.teardown();
    result
}

async fn run(command: &str, args: &ArgMatches, workspace: &std::path::Path) -> anyhow::Result<()> {
    let config_path = args
        .get_one::<PathBuf>("config")
        .context("--config is required")?;
    let config = HarnessConfig::load(config_path).context("loading configuration")?;

    match command {
        "topology" => topology(&config).await,
        "resolve" => {
            let id = *args.get_one::<ControlPlaneId>("id").context("volume id is required")?;
            resolve(&config, id).await
        }
        _ => cutover(args, &config, workspace).await,
    }
}

async fn connect(config: &HarnessConfig) -> anyhow::Result<Arc<dyn ControlPlane>> {
    let control = HttpControlPlane::login(config.control_plane_config())
        .await
        .context("logging in to control plane")?;
    Ok(Arc::new(control))
}

fn resolver(config: &HarnessConfig) -> anyhow::Result<IdentityResolver> {
    let backend: Arc<dyn StorageBackend> = Arc::new(
        HttpStorageBackend::new(&config.backend_config()).context("configuring backend client")?,
    );
    Ok(IdentityResolver::new(backend, config.naming_scheme()).with_order(config.backend.resolution_order))
}

async fn topology(config: &HarnessConfig) -> anyhow::Result<()> {
    let control = connect(config).await?;
    let identity = config.local_identity().context("reading local cluster identity")?;
    let topology = ClusterTopologyResolver::new(control, identity)
        .with_identity_key(config.cluster.config_key.clone())
        .resolve()
        .await
        .context("resolving topology")?;
    println!("{}", serde_json::to_string_pretty(&topology)?);
    Ok(())
}

async fn resolve(config: &HarnessConfig, id: ControlPlaneId) -> anyhow::Result<()> {
    let control = connect(config).await?;
    let resolver = resolver(config)?;
    let object: StorageObject = control
        .get_volume(id)
        .await
        .with_context(|| format!("looking up volume {id}"))?
        .to_storage_object(resolver.naming());
    let record = resolver
        .resolve_current_with_retry(&object, config.retry_backoff())
        .await
        .with_context(|| format!("resolving volume {id}"))?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

async fn cutover(matches: &ArgMatches, config: &HarnessConfig, workspace: &std::path::Path) -> anyhow::Result<()> {
    let required = |name: &str| {
        matches
            .get_one::<String>(name)
            .cloned()
            .with_context(|| format!("--{name} is required for cutover"))
    };
    let required_path = |name: &str| {
        matches
            .get_one::<PathBuf>(name)
            .cloned()
            .with_context(|| format!("--{name} is required for cutover"))
    };
    let from_revision = required("from-revision")?;
    let to_revision = required("to-revision")?;
    let build_script = required_path("build-script")?;
    let forked_repo = required_path("forked-repo")?;
    let remote_hosts: Vec<String> = matches
        .get_many::<String>("remote")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    if remote_hosts.len() > MAX_REMOTE_HOSTS {
        bail!("at most {MAX_REMOTE_HOSTS} --remote hosts are supported, got {}", remote_hosts.len());
    }

    let control = connect(config).await?;
    if config.bypass_secondary {
        scenarios::apply_bypass_secondary(control.as_ref(), true)
            .await
            .context("enabling bypass-secondary mode")?;
    }

    let guest = Arc::new(SshGuestShell::new(config.ssh_config()));
    for workload in &config.scenario.workloads {
        guest.register(workload.id, workload.address.clone());
    }
    let verifier = ConsistencyVerifier::new(resolver(config)?, control.clone(), guest)
        .with_retry_backoff(config.retry_backoff());

    let plan = CutoverPlan {
        from_revision,
        to_revision,
        build: BuildParams {
            workspace: workspace.to_path_buf(),
            forked_repo: forked_repo.clone(),
            remote_hosts,
        },
        start_command: config.supervisor.start_command.clone(),
        working_dir: config.supervisor.working_dir.clone().unwrap_or(forked_repo),
        ready_timeout: config.ready_timeout(),
        grace: config.grace(),
        retry_backoff: config.retry_backoff(),
    };
    let run = CutoverRun {
        plan,
        supervisor: ProcessSupervisor::new(config.supervisor_config(&build_script, workspace)),
        matcher: config.readiness_matcher()?,
        connector: Arc::new(HttpConnector::new(config.control_plane_config(), config.retry.clone())),
        pid_file: config.supervisor.pid_file.clone(),
    };

    let (ready, mut report) = scenarios::cutover_and_verify(run, control.as_ref(), &verifier, &config.scenario)
        .await
        .context("cutover")?;

    if !config.scenario.workloads.is_empty() {
        let new_control = ready.control_plane().clone();
        let identity = config.local_identity().context("reading local cluster identity")?;
        let topology = ClusterTopologyResolver::new(new_control.clone(), identity)
            .with_identity_key(config.cluster.config_key.clone())
            .resolve()
            .await
            .context("resolving topology")?;
        let verifier = verifier.with_control(new_control.clone());
        let control = new_control.as_ref();
        for workload in &config.scenario.workloads {
            let id = workload.id;
            let marker = format!("cutover-{id}");
            report.merge(
                scenarios::migrate_and_verify(control, &verifier, &topology, id, &marker)
                    .await
                    .with_context(|| format!("migrating workload {id}"))?,
            );
            report.merge(
                scenarios::migrate_across_clusters_and_verify(control, &verifier, &topology, id, &marker)
                    .await
                    .with_context(|| format!("migrating workload {id} across clusters"))?,
            );
            report.merge(
                scenarios::revert_and_verify(control, &verifier, id, &format!("revert-{id}"))
                    .await
                    .with_context(|| format!("reverting workload {id}"))?,
            );
        }
        for volume in &config.scenario.volumes {
            report.merge(
                scenarios::migrate_volume_and_verify(control, &verifier, *volume, topology.local_cluster.cluster_id)
                    .await
                    .with_context(|| format!("migrating volume {volume}"))?,
            );
        }
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    let handle = ready.into_handle();
    tracing::info!(
        pgid = handle.process_group_id(),
        checks = report.checks(),
        "cutover finished, service left running"
    );
    report.into_result()?;
    Ok(())
}
