//! Explicit harness state with create/teardown
//!
//! `HarnessContext::create` prepares the workspace and installs the harness
//! log sink as this thread's default tracing subscriber. The guard it holds
//! restores the previous subscriber when the context is torn down or dropped,
//! including during a panic unwind.

use chrono::{DateTime, Utc};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

/// Log file name under `<workspace>/logs`
pub const HARNESS_LOG: &str = "harness.log";

/// Workspace and log sink of one harness run
#[derive(Debug)]
pub struct HarnessContext {
    workspace: PathBuf,
    log_path: PathBuf,
    started_at: DateTime<Utc>,
    _guard: DefaultGuard,
}

impl HarnessContext {
    /// Prepare `<workspace>/logs` and route this thread's tracing output to
    /// stderr and to `<workspace>/logs/harness.log`.
    ///
    /// `RUST_LOG` overrides the default `info` filter.
    pub fn create(workspace: &Path) -> std::io::Result<Self> {
        let logs = workspace.join("logs");
        std::fs::create_dir_all(&logs)?;
        let log_path = logs.join(HARNESS_LOG);
        let file = OpenOptions::new().create(true).append(true).open(&log_path)?;

        let guard = tracing::subscriber::set_default(subscriber(file));
        let started_at = Utc::now();
        tracing::info!(
            workspace = %workspace.display(),
            log = %log_path.display(),
            version = crate::VERSION,
            "harness context created"
        );

        Ok(Self {
            workspace: workspace.to_path_buf(),
            log_path,
            started_at,
            _guard: guard,
        })
    }

    #[inline]
    #[must_use]
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    #[inline]
    #[must_use]
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    #[inline]
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Log the run's end and restore the previous subscriber
    pub fn teardown(self) {
        let elapsed = Utc::now() - self.started_at;
        tracing::info!(elapsed_ms = elapsed.num_milliseconds(), "harness context torn down");
    }
}

fn subscriber(file: File) -> impl tracing::Subscriber + Send + Sync {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);
    let sink = tracing_subscriber::fmt::layer()
        .json()
        .with_ansi(false)
        .with_current_span(true)
        .with_span_list(false)
        .with_writer(Mutex::new(file));

    tracing_subscriber::registry().with(filter).with(stderr).with(sink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn events_reach_the_log_file_until_teardown() {
        let dir = TempDir::new().unwrap();
        let ctx = HarnessContext::create(dir.path()).unwrap();
        let log = ctx.log_path().to_path_buf();
        assert_eq!(log, dir.path().join("logs").join(HARNESS_LOG));

        tracing::info!(revision = "4f2c9e1", "inside the context");
        ctx.teardown();
        tracing::info!("after teardown");

        let text = std::fs::read_to_string(&log).unwrap();
        assert!(text.contains("inside the context"));
        assert!(text.contains("4f2c9e1"));
        assert!(text.contains("harness context torn down"));
        assert!(!text.contains("after teardown"));
    }

    #[test]
    fn guard_is_released_on_panic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_path_buf();
        let result = std::panic::catch_unwind(move || {
            let _ctx = HarnessContext::create(&path).unwrap();
            panic!("scenario blew up");
        });
        assert!(result.is_err());

        tracing::info!("after unwind");
        let text = std::fs::read_to_string(dir.path().join("logs").join(HARNESS_LOG)).unwrap();
        assert!(!text.contains("after unwind"));
    }

    #[test]
    fn reopening_appends() {
        let dir = TempDir::new().unwrap();
        HarnessContext::create(dir.path()).unwrap().teardown();
        HarnessContext::create(dir.path()).unwrap().teardown();

        let text = std::fs::read_to_string(dir.path().join("logs").join(HARNESS_LOG)).unwrap();
        assert_eq!(text.matches("harness context created").count(), 2);
    }
}
