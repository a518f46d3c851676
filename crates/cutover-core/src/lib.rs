//! Cutover Core - migration test harness
//!
//! Drives a control-plane redeploy while the storage backend switches object
//! names from legacy to global, and checks that nothing was lost:
//! - `MigrationOrchestrator`: capture, stop, build, launch, await readiness
//! - `ConsistencyVerifier`: sizes, identities, tags and guest data
//! - `GuestShell`: remote shell into workloads
//! - `HarnessContext`: workspace and log sink of one run
//! - Scenario building blocks for resize, migration and snapshots
//!
//! # Example
//!
//! ```rust,ignore
//! use cutover_core::{HarnessConfig, HarnessContext, MigrationOrchestrator};
//!
//! let config = HarnessConfig::load(Path::new("harness.toml"))?;
//! let ctx = HarnessContext::create(&workspace)?;
//! let ready = MigrationOrchestrator::new(supervisor, resolver, connector, matcher, plan)
//!     .run(tracked)
//!     .await?;
//! let report = ready
//!     .captured_state()
//!     .verify_after_cutover(&resolver, &after, backoff)
//!     .await;
//! ctx.teardown();
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod context;
pub mod error;
pub mod guest;
pub mod orchestrator;
pub mod retry;
pub mod scenarios;
pub mod state_machine;
pub mod verifier;

pub use config::{HarnessConfig, ScenarioConfig, TrackedWorkload, BYPASS_SECONDARY_KEY};
pub use context::HarnessContext;
pub use error::{ConfigError, CutoverError, HarnessError, HarnessResult, ShellError};
pub use guest::{shell_quote, GuestShell, SshConfig, SshGuestShell};
pub use orchestrator::{
    CapturedObject, CapturedState, ControlPlaneConnector, CutoverPlan, HttpConnector,
    MigrationOrchestrator, MigrationSession, ReadySession,
};
pub use retry::{retry_with_backoff, RetryConfig};
pub use scenarios::{CutoverRun, OfferingIds};
pub use state_machine::{allowed_transitions, validate_transition, CutoverState};
pub use verifier::{
    ConsistencyVerifier, VerificationErrors, VerificationFailure, VerificationReport,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
