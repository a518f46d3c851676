//! Scheme cutover of the control-plane service
//!
//! One `MigrationOrchestrator` drives one cutover through
//! `Idle → Capturing → Stopping → Building → Launching → AwaitingReady`
//! and ends in `Ready` or `Failed`. It is consumed by `run`: a failed cutover
//! is never resumed, the caller starts a new session.

use crate::error::CutoverError;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::state_machine::{validate_transition, CutoverState};
use crate::verifier::{VerificationFailure, VerificationReport};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cutover_backend::{IdentityResolver, TagIndex};
use cutover_control::{ControlPlane, ControlPlaneError, HttpControlPlane, HttpControlPlaneConfig};
use cutover_model::{BackendRecord, ControlPlaneId, NameScheme, ObjectKind, StorageObject};
use cutover_supervisor::{BuildParams, ProcessHandle, ProcessSupervisor, ReadinessMatcher};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Obtains a control-plane client once the new service is up
#[async_trait]
pub trait ControlPlaneConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn ControlPlane>, ControlPlaneError>;
}

/// Logs in over HTTP, retrying while the fresh service settles
#[derive(Debug, Clone)]
pub struct HttpConnector {
    config: HttpControlPlaneConfig,
    retry: RetryConfig,
}

impl HttpConnector {
    #[must_use]
    pub fn new(config: HttpControlPlaneConfig, retry: RetryConfig) -> Self {
        Self { config, retry }
    }
}

#[async_trait]
impl ControlPlaneConnector for HttpConnector {
    async fn connect(&self) -> Result<Arc<dyn ControlPlane>, ControlPlaneError> {
        let control = retry_with_backoff(
            &self.retry,
            "control plane login",
            // A service that just printed its ready line may still refuse logins
            |e: &ControlPlaneError| matches!(e, ControlPlaneError::Login(_)) || e.is_retryable(),
            || HttpControlPlane::login(self.config.clone()),
        )
        .await?;
        Ok(Arc::new(control))
    }
}

/// One tracked object and the backend record it resolved to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapturedObject {
    pub object: StorageObject,
    pub record: BackendRecord,
}

/// Backend state of every tracked object before the cutover
#[derive(Debug, Clone, Serialize)]
pub struct CapturedState {
    entries: Vec<CapturedObject>,
    captured_at: DateTime<Utc>,
}

impl CapturedState {
    /// Resolve every object; the first one that cannot be resolved aborts
    /// the capture.
    pub async fn capture(
        resolver: &IdentityResolver,
        objects: Vec<StorageObject>,
        backoff: Duration,
    ) -> Result<Self, CutoverError> {
        let mut entries = Vec::with_capacity(objects.len());
        for object in objects {
            let record = resolver
                .resolve_current_with_retry(&object, backoff)
                .await
                .map_err(|source| CutoverError::CaptureIncomplete {
                    object: object.control_plane_id,
                    source,
                })?;
            tracing::debug!(
                object = %object.control_plane_id,
                kind = %object.kind,
                name = %record.name,
                "captured"
            );
            entries.push(CapturedObject { object, record });
        }
        tracing::info!(objects = entries.len(), "capture complete");
        Ok(Self {
            entries,
            captured_at: Utc::now(),
        })
    }

    #[inline]
    #[must_use]
    pub fn entries(&self) -> &[CapturedObject] {
        &self.entries
    }

    #[inline]
    #[must_use]
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    #[must_use]
    pub fn get(&self, id: ControlPlaneId) -> Option<&CapturedObject> {
        self.entries.iter().find(|e| e.object.control_plane_id == id)
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check every captured object against the post-cutover view.
    ///
    /// `current` is what the new control plane reports. Each captured object
    /// must still be listed, resolve on the backend, be the same backing
    /// object and keep its size. Objects now under a global name must also be
    /// the single match of their id tag.
    pub async fn verify_after_cutover(
        &self,
        resolver: &IdentityResolver,
        current: &[StorageObject],
        backoff: Duration,
    ) -> VerificationReport {
        let mut report = VerificationReport::new();
        let naming = resolver.naming();
        let mut indexes: HashMap<ObjectKind, TagIndex> = HashMap::new();

        for entry in &self.entries {
            let id = entry.object.control_plane_id;
            let Some(object) = current.iter().find(|o| o.control_plane_id == id) else {
                report.record::<()>(Err(VerificationFailure::new(
                    id,
                    "verify_after_cutover",
                    "listed by the control plane",
                    "absent",
                )));
                continue;
            };

            let resolved = resolver
                .resolve_current_with_retry(object, backoff)
                .await
                .map_err(|e| VerificationFailure::new(id, "verify_after_cutover", "resolvable", e));
            let Some(record) = report.record(resolved) else {
                continue;
            };

            report.record(if record.belongs_to(id, naming) {
                Ok(())
            } else {
                Err(VerificationFailure::new(id, "same_object", id, &record.name))
            });
            report.record(if record.size_bytes == entry.record.size_bytes {
                Ok(())
            } else {
                Err(VerificationFailure::new(
                    id,
                    "size_unchanged",
                    entry.record.size_bytes,
                    record.size_bytes,
                ))
            });

            if record.scheme(naming) == NameScheme::Global {
                if !indexes.contains_key(&object.kind) {
                    match resolver.tag_index(object.kind).await {
                        Ok(index) => {
                            indexes.insert(object.kind, index);
                        }
                        Err(e) => {
                            report.record::<()>(Err(VerificationFailure::new(
                                id,
                                "tag_index",
                                "backend listing",
                                e,
                            )));
                            continue;
                        }
                    }
                }
                let outcome = match indexes.get(&object.kind).map(|index| index.lookup(id)) {
                    Some(Ok(tagged)) if tagged.name == record.name => Ok(()),
                    Some(Ok(tagged)) => Err(VerificationFailure::new(id, "tag_lookup", &record.name, &tagged.name)),
                    Some(Err(e)) => Err(VerificationFailure::new(id, "tag_lookup", &record.name, e)),
                    None => Err(VerificationFailure::new(id, "tag_lookup", &record.name, "no index")),
                };
                report.record(outcome);
            }
        }
        tracing::info!(
            checks = report.checks(),
            failures = report.failures().len(),
            "post-cutover verification done"
        );
        report
    }
}

/// What to build and how to run it
#[derive(Debug, Clone)]
pub struct CutoverPlan {
    pub from_revision: String,
    pub to_revision: String,
    pub build: BuildParams,
    pub start_command: Vec<String>,
    pub working_dir: PathBuf,
    pub ready_timeout: Duration,
    /// Grace period between SIGTERM and giving up (or SIGKILL)
    pub grace: Duration,
    /// Pause before the single `NotFound` retry during capture
    pub retry_backoff: Duration,
}

/// State of the cutover in progress
#[derive(Debug)]
pub struct MigrationSession {
    pub from_revision: String,
    pub to_revision: String,
    /// Group of the launched service, once launched
    pub process_group_id: Option<u32>,
    pub ready_deadline: Option<DateTime<Utc>>,
    pub captured_state: Option<CapturedState>,
    state: CutoverState,
    handle: Option<ProcessHandle>,
}

impl MigrationSession {
    fn new(plan: &CutoverPlan) -> Self {
        Self {
            from_revision: plan.from_revision.clone(),
            to_revision: plan.to_revision.clone(),
            process_group_id: None,
            ready_deadline: None,
            captured_state: None,
            state: CutoverState::Idle,
            handle: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> CutoverState {
        self.state
    }

    fn transition(&mut self, to: CutoverState) -> Result<(), CutoverError> {
        validate_transition(self.state, to)?;
        tracing::info!(
            from = %self.state,
            to = %to,
            revision = %self.to_revision,
            "cutover transition"
        );
        self.state = to;
        Ok(())
    }
}

/// A cutover that reached `Ready`
pub struct ReadySession {
    control_plane: Arc<dyn ControlPlane>,
    captured_state: CapturedState,
    handle: ProcessHandle,
    from_revision: String,
    to_revision: String,
}

impl std::fmt::Debug for ReadySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadySession")
            .field("from_revision", &self.from_revision)
            .field("to_revision", &self.to_revision)
            .field("handle", &self.handle)
            .field("captured", &self.captured_state.len())
            .finish_non_exhaustive()
    }
}

impl ReadySession {
    /// Client of the freshly launched control plane
    #[inline]
    #[must_use]
    pub fn control_plane(&self) -> &Arc<dyn ControlPlane> {
        &self.control_plane
    }

    #[inline]
    #[must_use]
    pub fn captured_state(&self) -> &CapturedState {
        &self.captured_state
    }

    #[inline]
    #[must_use]
    pub fn handle(&self) -> &ProcessHandle {
        &self.handle
    }

    #[inline]
    #[must_use]
    pub fn revisions(&self) -> (&str, &str) {
        (&self.from_revision, &self.to_revision)
    }

    /// Hand the running service to the caller, e.g. to stop it later
    #[must_use]
    pub fn into_handle(self) -> ProcessHandle {
        self.handle
    }
}

/// Drives one cutover
pub struct MigrationOrchestrator {
    supervisor: ProcessSupervisor,
    resolver: IdentityResolver,
    connector: Arc<dyn ControlPlaneConnector>,
    matcher: Box<dyn ReadinessMatcher>,
    plan: CutoverPlan,
    current: Option<ProcessHandle>,
    session: MigrationSession,
}

impl std::fmt::Debug for MigrationOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationOrchestrator")
            .field("plan", &self.plan)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl MigrationOrchestrator {
    #[must_use]
    pub fn new(
        supervisor: ProcessSupervisor,
        resolver: IdentityResolver,
        connector: Arc<dyn ControlPlaneConnector>,
        matcher: Box<dyn ReadinessMatcher>,
        plan: CutoverPlan,
    ) -> Self {
        let session = MigrationSession::new(&plan);
        Self {
            supervisor,
            resolver,
            connector,
            matcher,
            plan,
            current: None,
            session,
        }
    }

    /// With the running service to stop before building
    #[must_use]
    pub fn with_current(mut self, handle: ProcessHandle) -> Self {
        self.current = Some(handle);
        self
    }

    #[inline]
    #[must_use]
    pub fn session(&self) -> &MigrationSession {
        &self.session
    }

    /// Run the cutover for the tracked objects.
    ///
    /// On failure the launched group (if any) has been asked to terminate
    /// and the session is in `Failed`.
    pub async fn run(mut self, tracked: Vec<StorageObject>) -> Result<ReadySession, CutoverError> {
        match self.drive(tracked).await {
            Ok(control_plane) => {
                let (Some(captured_state), Some(handle)) =
                    (self.session.captured_state.take(), self.session.handle.take())
                else {
                    // drive() only returns Ok after capturing and launching
                    return Err(CutoverError::IllegalTransition {
                        from: self.session.state,
                        to: CutoverState::Ready,
                    });
                };
                Ok(ReadySession {
                    control_plane,
                    captured_state,
                    handle,
                    from_revision: self.plan.from_revision,
                    to_revision: self.plan.to_revision,
                })
            }
            Err(e) => {
                self.abort(&e).await;
                Err(e)
            }
        }
    }

    async fn drive(&mut self, tracked: Vec<StorageObject>) -> Result<Arc<dyn ControlPlane>, CutoverError> {
        self.session.transition(CutoverState::Capturing)?;
        let captured = CapturedState::capture(&self.resolver, tracked, self.plan.retry_backoff).await?;
        self.session.captured_state = Some(captured);

        self.session.transition(CutoverState::Stopping)?;
        if let Some(mut previous) = self.current.take() {
            let report = self.supervisor.terminate(&mut previous, self.plan.grace).await;
            if !report.confirmed_gone {
                tracing::warn!(
                    pgid = previous.process_group_id(),
                    signal_denied = report.signal_denied,
                    "previous service may still be running"
                );
            }
        } else {
            tracing::info!("no running service to stop");
        }

        self.session.transition(CutoverState::Building)?;
        self.supervisor.build(&self.plan.to_revision, &self.plan.build).await?;

        self.session.transition(CutoverState::Launching)?;
        let handle = self.supervisor.launch(&self.plan.start_command, &self.plan.working_dir)?;
        self.session.process_group_id = Some(handle.process_group_id());
        self.session.handle = Some(handle);

        self.session.transition(CutoverState::AwaitingReady)?;
        self.session.ready_deadline = chrono::Duration::from_std(self.plan.ready_timeout)
            .ok()
            .map(|timeout| Utc::now() + timeout);
        if let Some(handle) = self.session.handle.as_mut() {
            self.supervisor
                .await_ready(handle, self.matcher.as_ref(), self.plan.ready_timeout)
                .await?;
        }

        let control_plane = self.connector.connect().await?;
        self.session.transition(CutoverState::Ready)?;
        Ok(control_plane)
    }

    /// Terminate what was launched and settle in `Failed`. Problems here are
    /// logged and never replace the original error.
    async fn abort(&mut self, cause: &CutoverError) {
        tracing::error!(state = %self.session.state, error = %cause, "cutover failed");
        if let Some(handle) = self.session.handle.as_mut() {
            let report = self.supervisor.terminate(handle, self.plan.grace).await;
            if !report.confirmed_gone {
                tracing::warn!(pgid = handle.process_group_id(), "failed launch may still be running");
            }
        }
        if let Err(e) = self.session.transition(CutoverState::Failed) {
            tracing::warn!(error = %e, "cannot record failed state");
        }
    }
}
