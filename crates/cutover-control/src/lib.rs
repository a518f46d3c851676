//! Cutover Control - orchestration control plane access
//!
//! Provides:
//! - The `ControlPlane` trait and its session-authenticated HTTP client
//! - Typed service and disk offerings
//! - `ClusterTopologyResolver`: which cluster is local, which is remote
//! - `destination_host` and `destination_pool`: migration target selection

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod api;
pub mod error;
pub mod http;
pub mod offering;
pub mod topology;

pub use api::{
    ClusterInfo, ConfigScope, ControlPlane, HostInfo, HostState, SnapshotInfo, StoragePoolInfo,
    VolumeInfo, VolumePoolMap, VolumeType, WorkloadSpec,
};
pub use error::{ClusterRole, ControlPlaneError, ControlPlaneResult, TopologyError};
pub use http::{HttpControlPlane, HttpControlPlaneConfig};
pub use offering::{DiskOffering, ServiceOffering};
pub use topology::{
    destination_host, destination_pool, ClusterTopologyResolver, LocalClusterIdentity, CLUSTER_IDENTITY_KEY,
    DEFAULT_IDENTITY_CONF_KEY,
};
