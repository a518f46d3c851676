//! Guest shell backed by an in-memory file table

use async_trait::async_trait;
use cutover_core::{GuestShell, ShellError};
use cutover_model::ControlPlaneId;
use dashmap::DashMap;
use parking_lot::Mutex;

/// Guest whose files survive anything the control plane does to the
/// workload, unless a test corrupts them.
#[derive(Debug, Default)]
pub struct FakeGuest {
    files: DashMap<(ControlPlaneId, String), String>,
    commands: Mutex<Vec<(ControlPlaneId, String)>>,
}

impl FakeGuest {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a file behind the harness's back
    pub fn corrupt(&self, workload: ControlPlaneId, path: &str) {
        if let Some(mut contents) = self.files.get_mut(&(workload, path.to_string())) {
            contents.push('!');
        }
    }

    /// Lose every file of a workload
    pub fn wipe(&self, workload: ControlPlaneId) {
        self.files.retain(|(w, _), _| *w != workload);
    }

    #[must_use]
    pub fn file(&self, workload: ControlPlaneId, path: &str) -> Option<String> {
        self.files.get(&(workload, path.to_string())).map(|c| c.clone())
    }

    /// Every file of a workload
    #[must_use]
    pub fn files_of(&self, workload: ControlPlaneId) -> Vec<(String, String)> {
        self.files
            .iter()
            .filter(|entry| entry.key().0 == workload)
            .map(|entry| (entry.key().1.clone(), entry.value().clone()))
            .collect()
    }

    /// Replace every file of a workload
    pub fn restore(&self, workload: ControlPlaneId, files: Vec<(String, String)>) {
        self.wipe(workload);
        for (path, contents) in files {
            self.files.insert((workload, path), contents);
        }
    }

    /// Commands run through `exec`, in order
    #[must_use]
    pub fn commands(&self) -> Vec<(ControlPlaneId, String)> {
        self.commands.lock().clone()
    }
}

#[async_trait]
impl GuestShell for FakeGuest {
    async fn exec(&self, workload: ControlPlaneId, command: &str) -> Result<String, ShellError> {
        self.commands.lock().push((workload, command.to_string()));
        Ok(String::new())
    }

    async fn write_file(&self, workload: ControlPlaneId, path: &str, contents: &str) -> Result<(), ShellError> {
        self.files.insert((workload, path.to_string()), contents.to_string());
        Ok(())
    }

    async fn read_file(&self, workload: ControlPlaneId, path: &str) -> Result<String, ShellError> {
        self.file(workload, path).ok_or_else(|| ShellError::CommandFailed {
            host: workload.to_string(),
            command: format!("cat {path}"),
            code: Some(1),
            stderr: format!("cat: {path}: No such file or directory"),
        })
    }
}
