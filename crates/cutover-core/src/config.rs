//! Harness configuration
//!
//! Read once at start from a TOML or YAML file (chosen by extension) and
//! validated before anything connects anywhere.

use crate::error::ConfigError;
use crate::guest::SshConfig;
use crate::retry::RetryConfig;
use cutover_backend::{HttpBackendConfig, ResolutionOrder};
use cutover_control::{
    DiskOffering, HttpControlPlaneConfig, LocalClusterIdentity, ServiceOffering, TopologyError,
    CLUSTER_IDENTITY_KEY, DEFAULT_IDENTITY_CONF_KEY,
};
use cutover_model::{ControlPlaneId, NamingScheme};
use cutover_supervisor::{MarkerMatcher, ReadinessMatcher, RegexMatcher, SupervisorConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Global configuration key keeping snapshots on primary storage
pub const BYPASS_SECONDARY_KEY: &str = "sp.bypass.secondary.storage";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HarnessConfig {
    pub management: ManagementConfig,
    pub backend: BackendConfig,
    pub supervisor: ServiceConfig,
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub guest: GuestConfig,
    #[serde(default)]
    pub scenario: ScenarioConfig,
    /// Backoff used when connecting to the freshly launched control plane
    #[serde(default)]
    pub retry: RetryConfig,
    /// Keep snapshot data on primary storage
    #[serde(default)]
    pub bypass_secondary: bool,
}

/// Orchestration API endpoint and credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManagementConfig {
    pub endpoint: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_domain")]
    pub domain: String,
    pub zone_id: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_job_poll_ms")]
    pub job_poll_interval_ms: u64,
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
}

/// Storage backend endpoint and naming
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    pub endpoint: String,
    pub auth_token: String,
    #[serde(default)]
    pub legacy_prefix: Option<String>,
    #[serde(default = "default_global_marker")]
    pub global_marker: String,
    #[serde(default)]
    pub resolution_order: ResolutionOrder,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Pause before the single `NotFound` retry
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

/// The supervised control-plane service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Program and arguments
    pub start_command: Vec<String>,
    /// Defaults to the forked repository
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Defaults to `<workspace>/logs/service.log`
    #[serde(default)]
    pub output_file: Option<PathBuf>,
    #[serde(default)]
    pub ready_marker: Option<String>,
    #[serde(default)]
    pub ready_pattern: Option<String>,
    #[serde(default)]
    pub failure_markers: Vec<String>,
    #[serde(default)]
    pub failure_patterns: Vec<String>,
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
    #[serde(default)]
    pub escalate_to_kill: bool,
    #[serde(default = "default_poll_ms")]
    pub poll_interval_ms: u64,
    /// Records the running service's process group across harness runs
    #[serde(default)]
    pub pid_file: Option<PathBuf>,
}

/// Where the local backend cluster identity comes from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    /// Identity given directly; wins over `conf_file`
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(default)]
    pub conf_file: Option<PathBuf>,
    #[serde(default = "default_conf_key")]
    pub conf_key: String,
    /// Cluster-scoped control-plane key holding each cluster's identity
    #[serde(default = "default_identity_key")]
    pub config_key: String,
}

/// Guest shell settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GuestConfig {
    pub ssh_program: PathBuf,
    pub user: String,
    pub port: u16,
    pub identity_file: Option<PathBuf>,
    pub options: Vec<String>,
    pub connect_timeout_secs: u64,
    pub command_timeout_secs: u64,
}

impl Default for GuestConfig {
    fn default() -> Self {
        let ssh = SshConfig::default();
        Self {
            ssh_program: ssh.program,
            user: ssh.user,
            port: ssh.port,
            identity_file: ssh.identity_file,
            options: ssh.options,
            connect_timeout_secs: ssh.connect_timeout.as_secs(),
            command_timeout_secs: ssh.command_timeout.as_secs(),
        }
    }
}

/// A workload whose guest data is checked across the cutover
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackedWorkload {
    pub id: ControlPlaneId,
    /// Guest address for the remote shell
    pub address: String,
}

/// What the scenarios track and deploy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScenarioConfig {
    pub volumes: Vec<ControlPlaneId>,
    pub snapshots: Vec<ControlPlaneId>,
    pub workloads: Vec<TrackedWorkload>,
    pub template_id: Option<String>,
    pub service_offering: Option<ServiceOffering>,
    pub disk_offering: Option<DiskOffering>,
    pub root_size_gib: u64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            volumes: Vec::new(),
            snapshots: Vec::new(),
            workloads: Vec::new(),
            template_id: None,
            service_offering: None,
            disk_offering: None,
            root_size_gib: 10,
        }
    }
}

fn default_domain() -> String {
    "/".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_job_poll_ms() -> u64 {
    1000
}
fn default_job_timeout_secs() -> u64 {
    600
}
fn default_global_marker() -> String {
    NamingScheme::default().global_marker
}
fn default_retry_backoff_ms() -> u64 {
    2000
}
fn default_ready_timeout_secs() -> u64 {
    900
}
fn default_grace_secs() -> u64 {
    30
}
fn default_poll_ms() -> u64 {
    200
}
fn default_conf_key() -> String {
    DEFAULT_IDENTITY_CONF_KEY.to_string()
}
fn default_identity_key() -> String {
    CLUSTER_IDENTITY_KEY.to_string()
}

impl HarnessConfig {
    /// Read, parse and validate a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let parse_error = |message: String| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        };
        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&text).map_err(|e| parse_error(e.to_string()))?,
            Some("yaml" | "yml") => {
                serde_yaml::from_str(&text).map_err(|e| parse_error(e.to_string()))?
            }
            _ => return Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
        };
        config.validate()?;
        tracing::debug!(path = %path.display(), zone = %config.management.zone_id, "configuration loaded");
        Ok(config)
    }

    /// Check everything that can be checked without network access
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("management.endpoint", &self.management.endpoint),
            ("management.username", &self.management.username),
            ("management.zone_id", &self.management.zone_id),
            ("backend.endpoint", &self.backend.endpoint),
            ("backend.auth_token", &self.backend.auth_token),
        ];
        if let Some((field, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(invalid(format!("{field} must not be empty")));
        }
        if self.backend.global_marker.is_empty() {
            return Err(invalid("backend.global_marker must not be empty"));
        }

        let service = &self.supervisor;
        if service.start_command.first().map_or(true, |p| p.trim().is_empty()) {
            return Err(invalid("supervisor.start_command must name a program"));
        }
        if service.ready_timeout_secs == 0 {
            return Err(invalid("supervisor.ready_timeout_secs must be positive"));
        }
        if service.poll_interval_ms == 0 {
            return Err(invalid("supervisor.poll_interval_ms must be positive"));
        }
        self.readiness_matcher()?;

        if self.cluster.identity.is_none() && self.cluster.conf_file.is_none() {
            return Err(invalid("cluster needs either identity or conf_file"));
        }

        if let Some(offering) = &self.scenario.service_offering {
            offering.validate().map_err(|e| invalid(e.to_string()))?;
        }
        if let Some(offering) = &self.scenario.disk_offering {
            offering.validate().map_err(|e| invalid(e.to_string()))?;
        }
        if self.scenario.root_size_gib == 0 {
            return Err(invalid("scenario.root_size_gib must be positive"));
        }
        Ok(())
    }

    #[must_use]
    pub fn naming_scheme(&self) -> NamingScheme {
        NamingScheme {
            legacy_prefix: self.backend.legacy_prefix.clone(),
            global_marker: self.backend.global_marker.clone(),
        }
    }

    /// Matcher for the configured ready marker or pattern.
    ///
    /// Exactly one of `ready_marker` and `ready_pattern` must be set; failure
    /// markers and patterns go with the matching kind.
    pub fn readiness_matcher(&self) -> Result<Box<dyn ReadinessMatcher>, ConfigError> {
        let service = &self.supervisor;
        match (&service.ready_marker, &service.ready_pattern) {
            (Some(marker), None) => {
                if marker.is_empty() {
                    return Err(invalid("supervisor.ready_marker must not be empty"));
                }
                if !service.failure_patterns.is_empty() {
                    return Err(invalid("failure_patterns need ready_pattern, not ready_marker"));
                }
                Ok(Box::new(
                    MarkerMatcher::new(marker.clone()).with_failures(service.failure_markers.clone()),
                ))
            }
            (None, Some(pattern)) => {
                if !service.failure_markers.is_empty() {
                    return Err(invalid("failure_markers need ready_marker, not ready_pattern"));
                }
                let bad = |e: regex::Error| invalid(format!("supervisor pattern: {e}"));
                let mut matcher = RegexMatcher::new(pattern).map_err(bad)?;
                for failure in &service.failure_patterns {
                    matcher = matcher.with_failure(failure).map_err(bad)?;
                }
                Ok(Box::new(matcher))
            }
            (Some(_), Some(_)) => Err(invalid("set only one of ready_marker and ready_pattern")),
            (None, None) => Err(invalid("supervisor needs ready_marker or ready_pattern")),
        }
    }

    /// Local backend cluster identity, from the value or the conf file
    pub fn local_identity(&self) -> Result<LocalClusterIdentity, TopologyError> {
        match (&self.cluster.identity, &self.cluster.conf_file) {
            (Some(identity), _) => LocalClusterIdentity::from_value(identity.clone()),
            (None, Some(path)) => LocalClusterIdentity::from_conf_file(path, &self.cluster.conf_key),
            (None, None) => Err(TopologyError::LocalIdentity(
                "no identity or conf_file configured".to_string(),
            )),
        }
    }

    #[must_use]
    pub fn control_plane_config(&self) -> HttpControlPlaneConfig {
        let m = &self.management;
        HttpControlPlaneConfig {
            endpoint: m.endpoint.clone(),
            username: m.username.clone(),
            password: m.password.clone(),
            domain: m.domain.clone(),
            zone_id: m.zone_id.clone(),
            timeout: Duration::from_secs(m.timeout_secs),
            job_poll_interval: Duration::from_millis(m.job_poll_interval_ms),
            job_timeout: Duration::from_secs(m.job_timeout_secs),
        }
    }

    #[must_use]
    pub fn backend_config(&self) -> HttpBackendConfig {
        HttpBackendConfig {
            base_url: self.backend.endpoint.clone(),
            auth_token: self.backend.auth_token.clone(),
            timeout: Duration::from_secs(self.backend.timeout_secs),
        }
    }

    #[inline]
    #[must_use]
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.backend.retry_backoff_ms)
    }

    #[inline]
    #[must_use]
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.supervisor.ready_timeout_secs)
    }

    #[inline]
    #[must_use]
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.supervisor.grace_secs)
    }

    /// Supervisor settings; the sink defaults to `<workspace>/logs/service.log`
    #[must_use]
    pub fn supervisor_config(&self, build_script: &Path, workspace: &Path) -> SupervisorConfig {
        let output = self
            .supervisor
            .output_file
            .clone()
            .unwrap_or_else(|| workspace.join("logs").join("service.log"));
        SupervisorConfig::new(build_script, output)
            .with_poll_interval(Duration::from_millis(self.supervisor.poll_interval_ms))
            .with_escalation(self.supervisor.escalate_to_kill)
    }

    #[must_use]
    pub fn ssh_config(&self) -> SshConfig {
        let g = &self.guest;
        SshConfig {
            program: g.ssh_program.clone(),
            user: g.user.clone(),
            port: g.port,
            identity_file: g.identity_file.clone(),
            options: g.options.clone(),
            connect_timeout: Duration::from_secs(g.connect_timeout_secs),
            command_timeout: Duration::from_secs(g.command_timeout_secs),
        }
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cutover_supervisor::Readiness;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const MINIMAL_TOML: &str = r#"
        [management]
        endpoint = "http://10.0.0.2:8080/client/api"
        username = "admin"
        password = "password"
        zone_id = "zone-1"

        [backend]
        endpoint = "http://10.0.0.5:81/ctrl/1.0"
        auth_token = "1234"

        [supervisor]
        start_command = ["mvn", "-pl", ":cloud-client-ui", "jetty:run"]
        ready_marker = "Started ServerConnector"
        failure_markers = ["BUILD FAILURE"]

        [cluster]
        identity = "sp-cluster-a"
    "#;

    fn write(dir: &TempDir, name: &str, text: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, text).unwrap();
        path
    }

    fn minimal() -> HarnessConfig {
        toml::from_str(MINIMAL_TOML).unwrap()
    }

    #[test]
    fn toml_defaults_fill_in() {
        let dir = TempDir::new().unwrap();
        let config = HarnessConfig::load(&write(&dir, "harness.toml", MINIMAL_TOML)).unwrap();

        assert_eq!(config.management.domain, "/");
        assert_eq!(config.backend.global_marker, "~");
        assert_eq!(config.backend.resolution_order, ResolutionOrder::LegacyFirst);
        assert_eq!(config.scenario.root_size_gib, 10);
        assert_eq!(config.guest.user, "root");
        assert!(!config.bypass_secondary);
        assert_eq!(config.cluster.config_key, CLUSTER_IDENTITY_KEY);
    }

    #[test]
    fn yaml_is_chosen_by_extension() {
        let dir = TempDir::new().unwrap();
        let yaml = r#"
management:
  endpoint: http://10.0.0.2:8080/client/api
  username: admin
  password: password
  zone_id: zone-1
backend:
  endpoint: http://10.0.0.5:81/ctrl/1.0
  auth_token: "1234"
  resolution_order: global-first
supervisor:
  start_command: [./run.sh]
  ready_pattern: "Started .* in [0-9.]+ seconds"
  failure_patterns: ["APPLICATION FAILED"]
cluster:
  conf_file: /etc/storpool.conf
bypass_secondary: true
"#;
        let config = HarnessConfig::load(&write(&dir, "harness.yml", yaml)).unwrap();
        assert_eq!(config.backend.resolution_order, ResolutionOrder::GlobalFirst);
        assert!(config.bypass_secondary);

        let matcher = config.readiness_matcher().unwrap();
        assert_eq!(matcher.check("Started App in 12.5 seconds"), Readiness::Ready);
        assert!(matches!(matcher.check("APPLICATION FAILED TO START"), Readiness::Failed(_)));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let dir = TempDir::new().unwrap();
        let text = format!("{MINIMAL_TOML}\n[extra]\nkey = 1\n");
        assert!(matches!(
            HarnessConfig::load(&write(&dir, "harness.toml", &text)),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn unsupported_extension_and_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            HarnessConfig::load(&write(&dir, "harness.json", "{}")),
            Err(ConfigError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            HarnessConfig::load(&dir.path().join("absent.toml")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn readiness_needs_exactly_one_ready_condition() {
        let mut config = minimal();
        config.supervisor.ready_pattern = Some("ready".to_string());
        assert!(config.validate().is_err());

        config.supervisor.ready_marker = None;
        config.supervisor.ready_pattern = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_regex_is_a_config_error() {
        let mut config = minimal();
        config.supervisor.ready_marker = None;
        config.supervisor.failure_markers.clear();
        config.supervisor.ready_pattern = Some("(unclosed".to_string());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(m)) if m.contains("pattern")));
    }

    #[test]
    fn offerings_are_validated_on_load() {
        let mut config = minimal();
        config.scenario.disk_offering = Some(DiskOffering {
            name: "data".to_string(),
            size_gib: None,
            customized: false,
            storage_tags: None,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_required_field_is_named() {
        let mut config = minimal();
        config.management.zone_id = " ".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("management.zone_id"));
    }

    #[test]
    fn local_identity_from_conf_file() {
        let dir = TempDir::new().unwrap();
        let conf = write(&dir, "storpool.conf", "SP_CLUSTER_ID=b.c\n");
        let mut config = minimal();
        config.cluster.identity = None;
        config.cluster.conf_file = Some(conf);
        assert_eq!(config.local_identity().unwrap().as_str(), "b.c");
    }

    #[test]
    fn derived_client_configs() {
        let config = minimal();
        let workspace = Path::new("/srv/cutover");

        let supervisor = config.supervisor_config(Path::new("/srv/build.sh"), workspace);
        assert_eq!(supervisor.output_path, workspace.join("logs/service.log"));
        assert_eq!(supervisor.poll_interval, Duration::from_millis(200));

        let control = config.control_plane_config();
        assert_eq!(control.job_timeout, Duration::from_secs(600));
        assert_eq!(config.backend_config().base_url, "http://10.0.0.5:81/ctrl/1.0");
        assert_eq!(config.naming_scheme(), NamingScheme::default());
        assert_eq!(config.ssh_config().port, 22);
    }
}
