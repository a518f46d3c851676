//! Dual-scheme identity resolution
//!
//! A storage object is exposed by the backend under exactly one of two names
//! at any time:
//! - its legacy name, derived from the control-plane id
//! - its global name, assigned by the backend during its own rename pass
//!
//! The resolver finds it under whichever is current. It never mutates
//! backend state.

use crate::api::{NameFilter, StorageBackend};
use crate::error::IdentityError;
use crate::index::TagIndex;
use cutover_model::{BackendRecord, ControlPlaneId, NamingScheme, ObjectKind, StorageObject};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Order in which `resolve_current` tries the two names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionOrder {
    /// Pre-cutover objects are legacy-named and only gain a global name once
    /// the backend finishes its background rename.
    #[default]
    LegacyFirst,
    /// For deployments whose backend migrates to global names first
    GlobalFirst,
}

/// Default pause before the single `NotFound` retry
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// Locates storage objects on the backend
#[derive(Clone)]
pub struct IdentityResolver {
    backend: Arc<dyn StorageBackend>,
    naming: NamingScheme,
    order: ResolutionOrder,
}

impl std::fmt::Debug for IdentityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityResolver")
            .field("naming", &self.naming)
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

impl IdentityResolver {
    /// Create resolver with legacy-first order
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>, naming: NamingScheme) -> Self {
        Self {
            backend,
            naming,
            order: ResolutionOrder::default(),
        }
    }

    /// With a resolution order
    #[inline]
    #[must_use]
    pub fn with_order(mut self, order: ResolutionOrder) -> Self {
        self.order = order;
        self
    }

    #[inline]
    #[must_use]
    pub fn naming(&self) -> &NamingScheme {
        &self.naming
    }

    #[inline]
    #[must_use]
    pub fn order(&self) -> ResolutionOrder {
        self.order
    }

    /// Backend this resolver queries
    #[inline]
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Look the object up under its legacy name.
    ///
    /// The name comes from the recorded legacy name or, failing that, from
    /// the control-plane id alone.
    pub async fn resolve_by_legacy_name(
        &self,
        object: &StorageObject,
    ) -> Result<BackendRecord, IdentityError> {
        let name = object.legacy_name(&self.naming);
        self.find_exact(object, &name).await
    }

    /// Look the object up under its global name.
    ///
    /// Uses the known global name when there is one; otherwise discovers it
    /// through the id tag the backend keeps on every object it renamed.
    pub async fn resolve_by_global_name(
        &self,
        object: &StorageObject,
    ) -> Result<BackendRecord, IdentityError> {
        if let Some(name) = &object.backend_global_name {
            return self.find_exact(object, name).await;
        }

        let candidates = self
            .backend
            .list(object.kind, &NameFilter::Prefix(self.naming.global_marker.clone()))
            .await?;
        let global = resolve_global_id_from_tag(&candidates, object.control_plane_id, &self.naming)
            .map_err(|e| match e {
                IdentityError::NotFound { id, kind, .. } => IdentityError::NotFound {
                    id,
                    kind,
                    tried: vec![format!("tag={}", object.control_plane_id)],
                },
                other => other,
            })?;
        candidates
            .into_iter()
            .find(|r| r.name == global)
            .ok_or_else(|| not_found(object, vec![global]))
    }

    /// Find the object under whichever name is current.
    ///
    /// Tries both names in the configured order and returns the first hit.
    /// `NotFound` means neither resolved: a real inconsistency, not a race.
    pub async fn resolve_current(
        &self,
        object: &StorageObject,
    ) -> Result<BackendRecord, IdentityError> {
        let first = match self.order {
            ResolutionOrder::LegacyFirst => self.resolve_by_legacy_name(object).await,
            ResolutionOrder::GlobalFirst => self.resolve_by_global_name(object).await,
        };

        let mut tried = match first {
            Ok(record) => return Ok(record),
            Err(IdentityError::NotFound { tried, .. }) => tried,
            Err(e) => return Err(e),
        };

        let fallback = match self.order {
            ResolutionOrder::LegacyFirst => self.resolve_by_global_name(object).await,
            ResolutionOrder::GlobalFirst => self.resolve_by_legacy_name(object).await,
        };
        match fallback {
            Ok(record) => {
                tracing::debug!(
                    object = %object.control_plane_id,
                    name = %record.name,
                    "resolved on fallback name"
                );
                Ok(record)
            }
            Err(IdentityError::NotFound { tried: more, .. }) => {
                tried.extend(more);
                Err(not_found(object, tried))
            }
            Err(e) => Err(e),
        }
    }

    /// `resolve_current`, retried exactly once after `backoff` on `NotFound`
    pub async fn resolve_current_with_retry(
        &self,
        object: &StorageObject,
        backoff: Duration,
    ) -> Result<BackendRecord, IdentityError> {
        match self.resolve_current(object).await {
            Err(e) if e.is_not_found() => {
                tracing::warn!(
                    object = %object.control_plane_id,
                    kind = %object.kind,
                    backoff_ms = backoff.as_millis(),
                    "object not found, retrying once"
                );
                tokio::time::sleep(backoff).await;
                self.resolve_current(object).await
            }
            other => other,
        }
    }

    /// Confirm an object is gone from the backend.
    ///
    /// The one place where "not found" is the expected positive outcome.
    /// Every other backend failure still propagates.
    pub async fn confirm_absent(&self, object: &StorageObject) -> Result<bool, IdentityError> {
        match self.resolve_current(object).await {
            Ok(record) => {
                tracing::debug!(object = %object.control_plane_id, name = %record.name, "still present");
                Ok(false)
            }
            Err(e) if e.is_not_found() => Ok(true),
            Err(e) => Err(e),
        }
    }

    /// Index one full listing by tag value
    pub async fn tag_index(&self, kind: ObjectKind) -> Result<TagIndex, IdentityError> {
        let records = self.backend.list(kind, &NameFilter::All).await?;
        Ok(TagIndex::build(kind, records))
    }

    async fn find_exact(
        &self,
        object: &StorageObject,
        name: &str,
    ) -> Result<BackendRecord, IdentityError> {
        match self
            .backend
            .list(object.kind, &NameFilter::Exact(name.to_string()))
            .await
        {
            Ok(records) => records
                .into_iter()
                .next()
                .ok_or_else(|| not_found(object, vec![name.to_string()])),
            Err(e) if e.is_not_found() => Err(not_found(object, vec![name.to_string()])),
            Err(e) => Err(e.into()),
        }
    }
}

fn not_found(object: &StorageObject, tried: Vec<String>) -> IdentityError {
    IdentityError::NotFound {
        id: object.control_plane_id,
        kind: object.kind,
        tried,
    }
}

/// Global name of the one candidate tagged with a control-plane id.
///
/// Scans in listing order. More than one match is a tagging defect and is
/// reported, never resolved by picking one.
///
/// # Errors
/// - `IdentityError::NotFound` if no candidate carries the id
/// - `IdentityError::AmbiguousTag` if several do
/// - `IdentityError::NoGlobalName` if the match has no backend-assigned name
pub fn resolve_global_id_from_tag(
    candidates: &[BackendRecord],
    control_plane_id: ControlPlaneId,
    naming: &NamingScheme,
) -> Result<String, IdentityError> {
    let needle = control_plane_id.to_string();
    let mut matches = candidates.iter().filter(|r| r.has_tag_value(&needle));

    let Some(first) = matches.next() else {
        return Err(IdentityError::NotFound {
            id: control_plane_id,
            kind: candidates.first().map_or(ObjectKind::Volume, |r| r.kind),
            tried: vec![format!("tag={needle}")],
        });
    };

    let rest: Vec<&BackendRecord> = matches.collect();
    if !rest.is_empty() {
        let mut names = vec![first.name.clone()];
        names.extend(rest.iter().map(|r| r.name.clone()));
        return Err(IdentityError::AmbiguousTag {
            id: control_plane_id,
            matches: names,
        });
    }

    first.global_name(naming).ok_or_else(|| IdentityError::NoGlobalName {
        id: control_plane_id,
        name: first.name.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::PlacementTemplate;
    use crate::error::{BackendError, BackendResult};
    use async_trait::async_trait;
    use cutover_model::GIB;
    use fixture::Listing;
    use pretty_assertions::assert_eq;

    /// Minimal in-module backend; the richer fake lives in the test-utils crate.
    mod fixture {
        use super::*;
        use std::sync::Mutex;

        #[derive(Default)]
        pub(super) struct Listing {
            pub(super) volumes: Mutex<Vec<BackendRecord>>,
            pub(super) fail_with: Mutex<Option<String>>,
        }

        #[async_trait]
        impl StorageBackend for Listing {
            async fn list_volumes(&self, filter: &NameFilter) -> BackendResult<Vec<BackendRecord>> {
                if let Some(name) = self.fail_with.lock().unwrap().clone() {
                    return Err(BackendError::api("VolumesList", name, "injected"));
                }
                Ok(self
                    .volumes
                    .lock()
                    .unwrap()
                    .iter()
                    .filter(|r| filter.matches(&r.name))
                    .cloned()
                    .collect())
            }

            async fn list_snapshots(&self, _: &NameFilter) -> BackendResult<Vec<BackendRecord>> {
                Ok(Vec::new())
            }

            async fn rename(&self, _: ObjectKind, name: &str, new_name: &str) -> BackendResult<()> {
                for r in self.volumes.lock().unwrap().iter_mut() {
                    if r.name == name {
                        r.name = new_name.to_string();
                    }
                }
                Ok(())
            }

            async fn delete(&self, _: ObjectKind, name: &str) -> BackendResult<()> {
                self.volumes.lock().unwrap().retain(|r| r.name != name);
                Ok(())
            }

            async fn create_template(&self, _: &PlacementTemplate) -> BackendResult<()> {
                Ok(())
            }

            async fn delete_template(&self, _: &str) -> BackendResult<()> {
                Ok(())
            }
        }
    }

    fn resolver(listing: Arc<Listing>) -> IdentityResolver {
        IdentityResolver::new(listing, NamingScheme::default())
    }

    fn seeded(records: Vec<BackendRecord>) -> Arc<Listing> {
        let listing = Arc::new(Listing::default());
        *listing.volumes.lock().unwrap() = records;
        listing
    }

    #[tokio::test]
    async fn legacy_name_resolves_from_id_alone() {
        let id = ControlPlaneId::new();
        let listing = seeded(vec![BackendRecord::new(id.to_string(), ObjectKind::Volume, GIB)]);
        let object = StorageObject::volume(id, GIB);

        let record = resolver(listing).resolve_by_legacy_name(&object).await.unwrap();
        assert_eq!(record.name, id.to_string());
    }

    #[tokio::test]
    async fn current_falls_back_to_global_after_rename() {
        let id = ControlPlaneId::new();
        let listing = seeded(vec![BackendRecord::new(id.to_string(), ObjectKind::Volume, GIB)
            .with_tag("cs-id", id.to_string())]);
        let object = StorageObject::volume(id, GIB);
        let resolver = resolver(listing.clone());

        assert_eq!(resolver.resolve_current(&object).await.unwrap().name, id.to_string());

        listing.rename(ObjectKind::Volume, &id.to_string(), "~g.1.a").await.unwrap();
        let record = resolver.resolve_current(&object).await.unwrap();
        assert_eq!(record.name, "~g.1.a");
    }

    #[tokio::test]
    async fn global_first_order_prefers_known_global_name() {
        let id = ControlPlaneId::new();
        let listing = seeded(vec![BackendRecord::new("~g.1.b", ObjectKind::Volume, GIB)]);
        let object = StorageObject::volume(id, GIB).with_global_name("~g.1.b");

        let resolver = resolver(listing).with_order(ResolutionOrder::GlobalFirst);
        assert_eq!(resolver.resolve_current(&object).await.unwrap().name, "~g.1.b");
    }

    #[tokio::test]
    async fn neither_name_is_not_found_listing_both_attempts() {
        let id = ControlPlaneId::new();
        let object = StorageObject::volume(id, GIB).with_global_name("~gone");

        match resolver(seeded(Vec::new())).resolve_current(&object).await {
            Err(IdentityError::NotFound { tried, .. }) => {
                assert_eq!(tried, vec![id.to_string(), "~gone".to_string()]);
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn backend_errors_are_not_swallowed() {
        let listing = seeded(Vec::new());
        *listing.fail_with.lock().unwrap() = Some("internalError".to_string());
        let object = StorageObject::volume(ControlPlaneId::new(), GIB);

        let err = resolver(listing).resolve_current(&object).await.unwrap_err();
        assert!(matches!(err, IdentityError::Backend(_)));
    }

    #[tokio::test]
    async fn absent_after_delete() {
        let id = ControlPlaneId::new();
        let listing = seeded(vec![BackendRecord::new(id.to_string(), ObjectKind::Volume, GIB)]);
        let object = StorageObject::volume(id, GIB);
        let resolver = resolver(listing.clone());

        assert!(!resolver.confirm_absent(&object).await.unwrap());
        listing.delete(ObjectKind::Volume, &id.to_string()).await.unwrap();
        assert!(resolver.confirm_absent(&object).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_happens_once() {
        let object = StorageObject::volume(ControlPlaneId::new(), GIB);
        let err = resolver(seeded(Vec::new()))
            .resolve_current_with_retry(&object, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn tag_lookup_single_match_among_five() {
        let naming = NamingScheme::default();
        let id = ControlPlaneId::new();
        let mut candidates: Vec<BackendRecord> = (0..4)
            .map(|i| {
                BackendRecord::new(format!("~s.{i}"), ObjectKind::Snapshot, GIB)
                    .with_tag("cs-id", ControlPlaneId::new().to_string())
            })
            .collect();
        candidates.insert(
            2,
            BackendRecord::new("~s.match", ObjectKind::Snapshot, GIB).with_tag("cs-id", id.to_string()),
        );

        assert_eq!(resolve_global_id_from_tag(&candidates, id, &naming).unwrap(), "~s.match");
    }

    #[test]
    fn tag_lookup_surfaces_ambiguity() {
        let naming = NamingScheme::default();
        let id = ControlPlaneId::new();
        let candidates = vec![
            BackendRecord::new("~a", ObjectKind::Snapshot, GIB).with_tag("cs-id", id.to_string()),
            BackendRecord::new("~b", ObjectKind::Snapshot, GIB).with_tag("vm", id.to_string()),
        ];
        assert!(matches!(
            resolve_global_id_from_tag(&candidates, id, &naming),
            Err(IdentityError::AmbiguousTag { .. })
        ));
    }

    #[test]
    fn tag_lookup_on_legacy_record_without_global_id() {
        let naming = NamingScheme::default();
        let id = ControlPlaneId::new();
        let candidates =
            vec![BackendRecord::new("legacy", ObjectKind::Volume, GIB).with_tag("cs-id", id.to_string())];
        assert!(matches!(
            resolve_global_id_from_tag(&candidates, id, &naming),
            Err(IdentityError::NoGlobalName { .. })
        ));
    }

    proptest::proptest! {
        #[test]
        fn indexed_and_scanned_lookup_agree(
            others in 0usize..12,
            position in 0usize..12,
            copies in 1usize..3,
        ) {
            let naming = NamingScheme::default();
            let id = ControlPlaneId::new();
            let mut candidates: Vec<BackendRecord> = (0..others)
                .map(|i| {
                    BackendRecord::new(format!("~o.{i}"), ObjectKind::Snapshot, GIB)
                        .with_tag("cs-id", ControlPlaneId::new().to_string())
                })
                .collect();
            for c in 0..copies {
                let at = position.min(candidates.len());
                candidates.insert(
                    at,
                    BackendRecord::new(format!("~m.{c}"), ObjectKind::Snapshot, GIB)
                        .with_tag("cs-id", id.to_string()),
                );
            }

            let scanned = resolve_global_id_from_tag(&candidates, id, &naming);
            let index = TagIndex::build(ObjectKind::Snapshot, candidates.clone());
            let indexed = index.lookup(id);

            if copies == 1 {
                proptest::prop_assert_eq!(scanned.unwrap(), indexed.unwrap().name.clone());
            } else {
                let scanned_ambiguous = matches!(scanned, Err(IdentityError::AmbiguousTag { .. }));
                let indexed_ambiguous = matches!(indexed, Err(IdentityError::AmbiguousTag { .. }));
                proptest::prop_assert!(scanned_ambiguous);
                proptest::prop_assert!(indexed_ambiguous);
            }
        }
    }
}
