//! Consistency checks between control plane, backend and guest
//!
//! Each check returns `Result<(), VerificationFailure>`. Scenarios collect
//! failures in a `VerificationReport` so teardown still runs after a failed
//! check.

use crate::error::{HarnessError, ShellError};
use crate::guest::GuestShell;
use cutover_backend::IdentityResolver;
use cutover_control::ControlPlane;
use cutover_model::{ControlPlaneId, ObjectKind, StorageObject, Tags, Workload};
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;

/// Bytes of random data written per round-trip check
const PAYLOAD_BYTES: usize = 4096;

/// Directory inside the guest holding marker files
const MARKER_DIR: &str = "/root";

/// One failed check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{operation} on {object}: expected {expected}, got {actual}")]
pub struct VerificationFailure {
    pub object: ControlPlaneId,
    pub operation: String,
    pub expected: String,
    pub actual: String,
}

impl VerificationFailure {
    pub fn new(
        object: ControlPlaneId,
        operation: impl Into<String>,
        expected: impl std::fmt::Display,
        actual: impl std::fmt::Display,
    ) -> Self {
        Self {
            object,
            operation: operation.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

/// Every failure of a scenario
#[derive(Debug, Clone, thiserror::Error)]
#[error("{} verification check(s) failed; first: {}", .0.len(), first(.0))]
pub struct VerificationErrors(pub Vec<VerificationFailure>);

fn first(failures: &[VerificationFailure]) -> String {
    failures.first().map_or_else(String::new, ToString::to_string)
}

/// Failures collected across a scenario
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerificationReport {
    checks: usize,
    failures: Vec<VerificationFailure>,
}

impl VerificationReport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a check outcome, logging failures as they happen
    pub fn record<T>(&mut self, outcome: Result<T, VerificationFailure>) -> Option<T> {
        self.checks += 1;
        match outcome {
            Ok(value) => Some(value),
            Err(failure) => {
                tracing::error!(
                    object = %failure.object,
                    operation = %failure.operation,
                    expected = %failure.expected,
                    actual = %failure.actual,
                    "verification failed"
                );
                self.failures.push(failure);
                None
            }
        }
    }

    pub fn merge(&mut self, other: VerificationReport) {
        self.checks += other.checks;
        self.failures.extend(other.failures);
    }

    #[inline]
    #[must_use]
    pub fn checks(&self) -> usize {
        self.checks
    }

    #[inline]
    #[must_use]
    pub fn failures(&self) -> &[VerificationFailure] {
        &self.failures
    }

    #[inline]
    #[must_use]
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    /// Fails if any recorded check failed
    pub fn into_result(self) -> Result<(), VerificationErrors> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(VerificationErrors(self.failures))
        }
    }
}

/// Stateless consistency checks
#[derive(Clone)]
pub struct ConsistencyVerifier {
    resolver: IdentityResolver,
    control: Arc<dyn ControlPlane>,
    guest: Arc<dyn GuestShell>,
    retry_backoff: std::time::Duration,
}

impl std::fmt::Debug for ConsistencyVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsistencyVerifier")
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

impl ConsistencyVerifier {
    #[must_use]
    pub fn new(
        resolver: IdentityResolver,
        control: Arc<dyn ControlPlane>,
        guest: Arc<dyn GuestShell>,
    ) -> Self {
        Self {
            resolver,
            control,
            guest,
            retry_backoff: cutover_backend::DEFAULT_RETRY_BACKOFF,
        }
    }

    /// Pause before the single `NotFound` retry
    #[must_use]
    pub fn with_retry_backoff(mut self, backoff: std::time::Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Same checks against another control-plane client, e.g. the one of a
    /// freshly launched service
    #[must_use]
    pub fn with_control(&self, control: Arc<dyn ControlPlane>) -> Self {
        Self {
            control,
            ..self.clone()
        }
    }

    #[inline]
    #[must_use]
    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    /// Orchestration size equals backend size exactly
    pub async fn size_matches(&self, object: &StorageObject) -> Result<(), VerificationFailure> {
        let id = object.control_plane_id;
        let expected = match object.kind {
            ObjectKind::Volume => self
                .control
                .get_volume(id)
                .await
                .map_err(|e| VerificationFailure::new(id, "size_matches", "orchestration volume", e))?
                .size_bytes,
            ObjectKind::Snapshot => object.size_bytes,
        };
        let record = self
            .resolver
            .resolve_current_with_retry(object, self.retry_backoff)
            .await
            .map_err(|e| VerificationFailure::new(id, "size_matches", "backend object", e))?;

        if record.size_bytes == expected {
            Ok(())
        } else {
            Err(VerificationFailure::new(
                id,
                format!("size_matches ({})", record.name),
                expected,
                record.size_bytes,
            ))
        }
    }

    /// The object resolves under its current name
    pub async fn identity_resolves(&self, object: &StorageObject) -> Result<(), VerificationFailure> {
        let id = object.control_plane_id;
        let record = self
            .resolver
            .resolve_current_with_retry(object, self.retry_backoff)
            .await
            .map_err(|e| VerificationFailure::new(id, "identity_resolves", "resolvable object", e))?;
        tracing::debug!(object = %id, name = %record.name, scheme = ?record.scheme(self.resolver.naming()), "resolved");
        Ok(())
    }

    /// Every expected tag present with its value; extra backend tags ignored
    pub async fn tags_preserved(
        &self,
        object: &StorageObject,
        expected: &Tags,
    ) -> Result<(), VerificationFailure> {
        let id = object.control_plane_id;
        let record = self
            .resolver
            .resolve_current_with_retry(object, self.retry_backoff)
            .await
            .map_err(|e| VerificationFailure::new(id, "tags_preserved", "backend object", e))?;

        for (key, value) in expected {
            match record.tags.get(key) {
                Some(actual) if actual == value => {}
                Some(actual) => {
                    return Err(VerificationFailure::new(
                        id,
                        format!("tags_preserved[{key}]"),
                        value,
                        actual,
                    ))
                }
                None => {
                    return Err(VerificationFailure::new(
                        id,
                        format!("tags_preserved[{key}]"),
                        value,
                        "<missing>",
                    ))
                }
            }
        }
        Ok(())
    }

    /// Replace the marker file of `data_round_trips` with other content, for
    /// operations that must bring the original payload back
    pub async fn overwrite_marker(&self, workload: ControlPlaneId, marker: &str) -> Result<(), ShellError> {
        let path = format!("{MARKER_DIR}/{marker}");
        self.guest.write_file(workload, &path, &random_payload()).await?;
        tracing::debug!(%workload, %path, "marker overwritten");
        Ok(())
    }

    /// Write a random payload in the guest, run `op`, read it back unchanged
    pub async fn data_round_trips<F, Fut>(
        &self,
        workload: &Workload,
        marker: &str,
        op: F,
    ) -> Result<(), VerificationFailure>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<(), HarnessError>> + Send,
    {
        let id = workload.control_plane_id;
        let operation = format!("data_round_trips[{marker}]");
        let path = format!("{MARKER_DIR}/{marker}");
        let payload = random_payload();
        let digest = payload_digest(&payload);

        self.guest
            .write_file(id, &path, &payload)
            .await
            .map_err(|e| VerificationFailure::new(id, &operation, "payload written", e))?;
        tracing::debug!(workload = %id, %path, %digest, "payload written");

        op().await
            .map_err(|e| VerificationFailure::new(id, &operation, "mutating operation to succeed", e))?;

        let read_back = self
            .guest
            .read_file(id, &path)
            .await
            .map_err(|e| VerificationFailure::new(id, &operation, "payload readable", e))?;

        if read_back == payload {
            Ok(())
        } else {
            Err(VerificationFailure::new(
                id,
                operation,
                format!("sha256 {digest}"),
                format!("sha256 {} ({} bytes)", payload_digest(&read_back), read_back.len()),
            ))
        }
    }
}

fn random_payload() -> String {
    let mut bytes = vec![0u8; PAYLOAD_BYTES / 2];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn payload_digest(payload: &str) -> String {
    hex::encode(Sha256::digest(payload.as_bytes()))
}
