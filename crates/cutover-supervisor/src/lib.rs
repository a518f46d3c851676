//! Cutover Supervisor - the supervised control-plane process
//!
//! Provides:
//! - `ProcessSupervisor::build`: run the external build script for a revision
//! - `ProcessSupervisor::launch`: start the service in its own process group
//! - `ProcessSupervisor::await_ready`: tail its output through a `ReadinessMatcher`
//! - `ProcessSupervisor::terminate`: stop the whole group, optionally escalating
//! - `group_status` and `procfs::start_time`: liveness and identity of a group
//!
//! # Example
//!
//! ```rust,ignore
//! let supervisor = ProcessSupervisor::new(SupervisorConfig::new("./build.sh", "logs/service.log"));
//! supervisor.build("4f2c9e1", &params).await?;
//! let mut handle = supervisor.launch(&start_command, &workspace)?;
//! supervisor.await_ready(&mut handle, &MarkerMatcher::new("Started"), timeout).await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod error;
pub mod handle;
pub mod procfs;
pub mod readiness;
pub mod signal;
pub mod supervisor;

pub use error::{BuildError, LaunchError, ReadinessError};
pub use handle::{ProcessHandle, ProcessState, TerminationReport};
pub use readiness::{MarkerMatcher, Readiness, ReadinessMatcher, RegexMatcher};
pub use signal::{group_status, GroupStatus};
pub use supervisor::{BuildParams, ProcessSupervisor, SupervisorConfig, MAX_REMOTE_HOSTS};
