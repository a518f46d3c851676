//! Remote shell into guest workloads
//!
//! Data checks write a payload inside the guest, mutate the storage under it
//! and read the payload back. `SshGuestShell` drives the system `ssh` client
//! per call, with a timeout and one reconnect on connection failures.

use crate::error::ShellError;
use async_trait::async_trait;
use cutover_model::ControlPlaneId;
use dashmap::DashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// `ssh` exits with this code when the connection, not the command, failed
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Shell access to a workload's guest OS
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GuestShell: Send + Sync {
    /// Run a command, returning its stdout
    async fn exec(&self, workload: ControlPlaneId, command: &str) -> Result<String, ShellError>;

    /// Replace a file's contents and flush it to disk
    async fn write_file(
        &self,
        workload: ControlPlaneId,
        path: &str,
        contents: &str,
    ) -> Result<(), ShellError> {
        let command = format!("printf '%s' {} > {} && sync", shell_quote(contents), shell_quote(path));
        self.exec(workload, &command).await.map(drop)
    }

    async fn read_file(&self, workload: ControlPlaneId, path: &str) -> Result<String, ShellError> {
        self.exec(workload, &format!("cat {}", shell_quote(path))).await
    }
}

/// Single-quote a word for a POSIX shell
#[must_use]
pub fn shell_quote(word: &str) -> String {
    format!("'{}'", word.replace('\'', r"'\''"))
}

/// `ssh` client settings
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Client binary
    pub program: PathBuf,
    pub user: String,
    pub port: u16,
    pub identity_file: Option<PathBuf>,
    /// Extra `-o` options
    pub options: Vec<String>,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ssh"),
            user: "root".to_string(),
            port: 22,
            identity_file: None,
            options: Vec::new(),
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(60),
        }
    }
}

/// Guest shell over the system `ssh` client
#[derive(Debug)]
pub struct SshGuestShell {
    config: SshConfig,
    addresses: DashMap<ControlPlaneId, String>,
}

impl SshGuestShell {
    #[must_use]
    pub fn new(config: SshConfig) -> Self {
        Self {
            config,
            addresses: DashMap::new(),
        }
    }

    /// Address to reach a workload's guest at
    pub fn register(&self, workload: ControlPlaneId, address: impl Into<String>) {
        self.addresses.insert(workload, address.into());
    }

    pub fn forget(&self, workload: ControlPlaneId) {
        self.addresses.remove(&workload);
    }

    fn args(&self, host: &str, command: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.connect_timeout.as_secs().max(1)),
            "-p".to_string(),
            self.config.port.to_string(),
        ];
        if let Some(key) = &self.config.identity_file {
            args.push("-i".to_string());
            args.push(key.display().to_string());
        }
        for option in &self.config.options {
            args.push("-o".to_string());
            args.push(option.clone());
        }
        args.push(format!("{}@{host}", self.config.user));
        args.push("--".to_string());
        args.push(command.to_string());
        args
    }

    async fn exec_once(&self, host: &str, command: &str) -> Result<String, ShellError> {
        let output = Command::new(&self.config.program)
            .args(self.args(host, command))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.config.command_timeout, output)
            .await
            .map_err(|_| ShellError::Timeout {
                host: host.to_string(),
                command: command.to_string(),
                secs: self.config.command_timeout.as_secs(),
            })??;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        match output.status.code() {
            Some(0) => Ok(String::from_utf8_lossy(&output.stdout).into_owned()),
            Some(SSH_CONNECTION_FAILURE) => Err(ShellError::Connect {
                host: host.to_string(),
                message: stderr,
            }),
            code => Err(ShellError::CommandFailed {
                host: host.to_string(),
                command: command.to_string(),
                code,
                stderr,
            }),
        }
    }
}

#[async_trait]
impl GuestShell for SshGuestShell {
    async fn exec(&self, workload: ControlPlaneId, command: &str) -> Result<String, ShellError> {
        let host = self
            .addresses
            .get(&workload)
            .map(|a| a.value().clone())
            .ok_or(ShellError::UnknownGuest(workload))?;

        match self.exec_once(&host, command).await {
            Err(e) if e.is_retryable() => {
                tracing::warn!(%workload, %host, error = %e, "guest shell failed, reconnecting once");
                self.exec_once(&host, command).await
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// Stand-in `ssh` that fails its first `failures` connections, then runs
    /// the command locally
    fn fake_ssh(dir: &TempDir, failures: u32) -> PathBuf {
        let path = dir.path().join("ssh");
        let counter = dir.path().join("attempts");
        let script = format!(
            "#!/bin/sh\n\
             n=$(cat '{c}' 2>/dev/null || echo 0); n=$((n+1)); echo $n > '{c}'\n\
             if [ $n -le {failures} ]; then echo 'Connection refused' >&2; exit 255; fi\n\
             while [ \"$1\" != \"--\" ]; do shift; done; shift\n\
             exec /bin/sh -c \"$1\"\n",
            c = counter.display()
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn attempts(dir: &TempDir) -> u32 {
        std::fs::read_to_string(dir.path().join("attempts"))
            .unwrap()
            .trim()
            .parse()
            .unwrap()
    }

    fn shell(program: PathBuf) -> (SshGuestShell, ControlPlaneId) {
        let shell = SshGuestShell::new(SshConfig {
            program,
            command_timeout: Duration::from_secs(5),
            ..SshConfig::default()
        });
        let workload = ControlPlaneId::new();
        shell.register(workload, "10.1.1.5");
        (shell, workload)
    }

    #[test]
    fn quoting_survives_single_quotes() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote("/root/marker"), "'/root/marker'");
    }

    #[test]
    fn args_put_command_after_separator() {
        let shell = SshGuestShell::new(SshConfig {
            identity_file: Some(PathBuf::from("/keys/id")),
            options: vec!["LogLevel=ERROR".to_string()],
            ..SshConfig::default()
        });
        let args = shell.args("10.1.1.5", "uptime");
        let n = args.len();
        assert_eq!(&args[n - 3..], ["root@10.1.1.5", "--", "uptime"]);
        assert!(args.windows(2).any(|w| w == ["-i", "/keys/id"]));
        assert!(args.windows(2).any(|w| w == ["-o", "LogLevel=ERROR"]));
    }

    #[tokio::test]
    async fn unknown_workload_is_rejected() {
        let shell = SshGuestShell::new(SshConfig::default());
        let workload = ControlPlaneId::new();
        assert!(matches!(
            shell.exec(workload, "true").await,
            Err(ShellError::UnknownGuest(id)) if id == workload
        ));
    }

    #[tokio::test]
    async fn reconnects_once_after_connection_failure() {
        let dir = TempDir::new().unwrap();
        let (shell, workload) = shell(fake_ssh(&dir, 1));

        let out = shell.exec(workload, "echo hello").await.unwrap();
        assert_eq!(out.trim(), "hello");
        assert_eq!(attempts(&dir), 2);
    }

    #[tokio::test]
    async fn gives_up_after_second_connection_failure() {
        let dir = TempDir::new().unwrap();
        let (shell, workload) = shell(fake_ssh(&dir, 5));

        let err = shell.exec(workload, "echo hello").await.unwrap_err();
        assert!(matches!(err, ShellError::Connect { .. }));
        assert_eq!(attempts(&dir), 2);
    }

    #[tokio::test]
    async fn command_failure_is_not_retried() {
        let dir = TempDir::new().unwrap();
        let (shell, workload) = shell(fake_ssh(&dir, 0));

        let err = shell.exec(workload, "exit 3").await.unwrap_err();
        assert!(matches!(err, ShellError::CommandFailed { code: Some(3), .. }));
        assert_eq!(attempts(&dir), 1);
    }

    #[tokio::test]
    async fn file_round_trip_through_default_methods() {
        let dir = TempDir::new().unwrap();
        let (shell, workload) = shell(fake_ssh(&dir, 0));
        let target = dir.path().join("marker");
        let target = target.to_str().unwrap();

        shell.write_file(workload, target, "payload 'quoted'").await.unwrap();
        assert_eq!(shell.read_file(workload, target).await.unwrap(), "payload 'quoted'");
    }
}
