//! Typed compute and disk offerings
//!
//! Offerings are read from the harness configuration and registered with the
//! control plane before a scenario deploys workloads.

use crate::error::ControlPlaneError;
use serde::{Deserialize, Serialize};

/// Compute offering for deployed workloads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceOffering {
    pub name: String,
    pub cpu_count: u32,
    pub cpu_speed_mhz: u32,
    pub memory_mib: u32,
    /// Storage tag restricting ROOT volumes to matching pools
    #[serde(default)]
    pub storage_tags: Option<String>,
}

impl ServiceOffering {
    /// Reject offerings the control plane would refuse anyway
    pub fn validate(&self) -> Result<(), ControlPlaneError> {
        if self.name.trim().is_empty() {
            return Err(ControlPlaneError::InvalidRequest(
                "service offering needs a name".to_string(),
            ));
        }
        if self.cpu_count == 0 || self.cpu_speed_mhz == 0 {
            return Err(ControlPlaneError::InvalidRequest(format!(
                "service offering {}: cpu count and speed must be positive",
                self.name
            )));
        }
        if self.memory_mib < 128 {
            return Err(ControlPlaneError::InvalidRequest(format!(
                "service offering {}: {} MiB memory is below the 128 MiB minimum",
                self.name, self.memory_mib
            )));
        }
        Ok(())
    }
}

/// Disk offering for data volumes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskOffering {
    pub name: String,
    /// Fixed size; `None` when the offering is customizable
    #[serde(default)]
    pub size_gib: Option<u64>,
    #[serde(default)]
    pub customized: bool,
    #[serde(default)]
    pub storage_tags: Option<String>,
}

impl DiskOffering {
    /// Exactly one of a fixed size or `customized` must be set
    pub fn validate(&self) -> Result<(), ControlPlaneError> {
        if self.name.trim().is_empty() {
            return Err(ControlPlaneError::InvalidRequest(
                "disk offering needs a name".to_string(),
            ));
        }
        match (self.size_gib, self.customized) {
            (Some(0), _) => Err(ControlPlaneError::InvalidRequest(format!(
                "disk offering {}: size must be positive",
                self.name
            ))),
            (Some(_), true) => Err(ControlPlaneError::InvalidRequest(format!(
                "disk offering {}: a customized offering has no fixed size",
                self.name
            ))),
            (None, false) => Err(ControlPlaneError::InvalidRequest(format!(
                "disk offering {}: needs a size or customized = true",
                self.name
            ))),
            _ => Ok(()),
        }
    }
}
