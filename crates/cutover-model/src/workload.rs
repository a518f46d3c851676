//! Running workloads (virtual machines)

use crate::error::ModelError;
use crate::ids::{ClusterId, ControlPlaneId, HostId};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Workload power state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkloadState {
    Running,
    Stopped,
    Migrating,
}

impl FromStr for WorkloadState {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Running" => Ok(Self::Running),
            "Stopped" => Ok(Self::Stopped),
            "Migrating" => Ok(Self::Migrating),
            other => Err(ModelError::UnknownState(other.to_string())),
        }
    }
}

impl std::fmt::Display for WorkloadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A virtual machine placed on a host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    pub control_plane_id: ControlPlaneId,
    pub host_id: HostId,
    pub cluster_id: ClusterId,
    pub state: WorkloadState,
    /// Attached volume ids, ROOT first
    pub attached_volumes: Vec<ControlPlaneId>,
}

impl Workload {
    /// New running workload with only a ROOT volume
    #[must_use]
    pub fn running(
        id: ControlPlaneId,
        host_id: HostId,
        cluster_id: ClusterId,
        root: ControlPlaneId,
    ) -> Self {
        Self {
            control_plane_id: id,
            host_id,
            cluster_id,
            state: WorkloadState::Running,
            attached_volumes: vec![root],
        }
    }

    /// ROOT volume
    #[inline]
    #[must_use]
    pub fn root_volume(&self) -> Option<ControlPlaneId> {
        self.attached_volumes.first().copied()
    }

    /// Non-ROOT volumes in attach order
    #[inline]
    #[must_use]
    pub fn data_volumes(&self) -> &[ControlPlaneId] {
        self.attached_volumes.get(1..).unwrap_or(&[])
    }

    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == WorkloadState::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_volume_is_first() {
        let root = ControlPlaneId::new();
        let data = ControlPlaneId::new();
        let mut vm = Workload::running(ControlPlaneId::new(), HostId::new(), ClusterId::new(), root);
        vm.attached_volumes.push(data);

        assert_eq!(vm.root_volume(), Some(root));
        assert_eq!(vm.data_volumes(), &[data]);
    }

    #[test]
    fn no_data_volumes_without_extra_attachments() {
        let vm = Workload::running(
            ControlPlaneId::new(),
            HostId::new(),
            ClusterId::new(),
            ControlPlaneId::new(),
        );
        assert!(vm.data_volumes().is_empty());
        assert!(vm.is_running());
    }

    #[test]
    fn state_parses_control_plane_strings() {
        assert_eq!("Migrating".parse::<WorkloadState>().unwrap(), WorkloadState::Migrating);
        assert!("Starting".parse::<WorkloadState>().is_err());
    }
}
