//! Cutover Model - shared data types
//!
//! The vocabulary every other harness crate speaks:
//! - Control-plane identifiers for objects, hosts, clusters and pools
//! - Storage objects (volumes, snapshots) and their two backend names
//! - The backend's own view of an object (`BackendRecord`)
//! - Workloads and cluster topology
//!
//! # Example
//!
//! ```rust
//! use cutover_model::{ControlPlaneId, NamingScheme, StorageObject, GIB};
//!
//! let id = ControlPlaneId::new();
//! let volume = StorageObject::volume(id, 10 * GIB);
//! let scheme = NamingScheme::default();
//! assert_eq!(scheme.legacy_name(volume.control_plane_id), id.to_string());
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod error;
pub mod ids;
pub mod naming;
pub mod storage;
pub mod topology;
pub mod workload;

pub use error::ModelError;
pub use ids::{ClusterId, ControlPlaneId, HostId, PoolId};
pub use naming::{NameScheme, NamingScheme};
pub use storage::{BackendRecord, ObjectKind, StorageObject, Tags};
pub use topology::{ClusterPlacement, ClusterTopology, MIN_HOSTS_PER_CLUSTER};
pub use workload::{Workload, WorkloadState};

/// One gibibyte in bytes
pub const GIB: u64 = 1024 * 1024 * 1024;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
