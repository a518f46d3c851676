//! In-memory storage backend

use async_trait::async_trait;
use cutover_backend::{BackendError, BackendResult, NameFilter, PlacementTemplate, StorageBackend, OBJECT_DOES_NOT_EXIST};
use cutover_model::{BackendRecord, ControlPlaneId, NameScheme, NamingScheme, ObjectKind};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Tag key the backend keeps the control-plane id under after renaming
pub const ID_TAG: &str = "cvm";

/// Backend holding volumes and snapshots in listing order.
///
/// `rename_to_global` simulates the backend's own rename pass: the object
/// moves to a marker-prefixed name and keeps its control-plane id as a tag.
#[derive(Debug, Default)]
pub struct FakeBackend {
    volumes: Mutex<Vec<BackendRecord>>,
    snapshots: Mutex<Vec<BackendRecord>>,
    templates: Mutex<Vec<PlacementTemplate>>,
    transport_failures: AtomicU32,
    list_calls: AtomicU32,
    next_global: AtomicU64,
}

impl FakeBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn objects(&self, kind: ObjectKind) -> &Mutex<Vec<BackendRecord>> {
        match kind {
            ObjectKind::Volume => &self.volumes,
            ObjectKind::Snapshot => &self.snapshots,
        }
    }

    fn fresh_global_id(&self) -> String {
        let n = self.next_global.fetch_add(1, Ordering::SeqCst) + 1;
        format!("x.{n}.b")
    }

    pub fn insert(&self, record: BackendRecord) {
        self.objects(record.kind).lock().push(record);
    }

    /// Store an object under the legacy name of `id`
    pub fn insert_legacy(&self, kind: ObjectKind, id: ControlPlaneId, size_bytes: u64, naming: &NamingScheme) -> BackendRecord {
        let record = BackendRecord::new(naming.legacy_name(id), kind, size_bytes).with_global_id(self.fresh_global_id());
        self.insert(record.clone());
        record
    }

    /// Rename the object backing `id` to its global name and tag it with the
    /// id. Returns the new name, or `None` if no legacy object exists.
    pub fn rename_to_global(&self, kind: ObjectKind, id: ControlPlaneId, naming: &NamingScheme) -> Option<String> {
        let legacy = naming.legacy_name(id);
        let mut objects = self.objects(kind).lock();
        let record = objects.iter_mut().find(|r| r.name == legacy)?;
        let global_id = match &record.global_id {
            Some(g) => g.clone(),
            None => {
                let g = self.fresh_global_id();
                record.global_id = Some(g.clone());
                g
            }
        };
        record.name = naming.global_name(&global_id);
        record.tags.insert(ID_TAG.to_string(), id.to_string());
        Some(record.name.clone())
    }

    /// Rename every legacy object whose name parses as a control-plane id
    pub fn rename_all_to_global(&self, naming: &NamingScheme) -> usize {
        let mut renamed = 0;
        for kind in [ObjectKind::Volume, ObjectKind::Snapshot] {
            let ids: Vec<ControlPlaneId> = self
                .objects(kind)
                .lock()
                .iter()
                .filter_map(|r| naming.id_from_legacy_name(&r.name))
                .collect();
            renamed += ids
                .into_iter()
                .filter_map(|id| self.rename_to_global(kind, id, naming))
                .count();
        }
        renamed
    }

    /// Record backing `id`, under either name
    #[must_use]
    pub fn find(&self, kind: ObjectKind, id: ControlPlaneId, naming: &NamingScheme) -> Option<BackendRecord> {
        self.objects(kind).lock().iter().find(|r| r.belongs_to(id, naming)).cloned()
    }

    #[must_use]
    pub fn record(&self, kind: ObjectKind, name: &str) -> Option<BackendRecord> {
        self.objects(kind).lock().iter().find(|r| r.name == name).cloned()
    }

    #[must_use]
    pub fn records(&self, kind: ObjectKind) -> Vec<BackendRecord> {
        self.objects(kind).lock().clone()
    }

    /// Change the size of the object backing `id`
    pub fn set_size(&self, kind: ObjectKind, id: ControlPlaneId, naming: &NamingScheme, size_bytes: u64) -> bool {
        match self.objects(kind).lock().iter_mut().find(|r| r.belongs_to(id, naming)) {
            Some(record) => {
                record.size_bytes = size_bytes;
                true
            }
            None => false,
        }
    }

    /// Add a tag to the object backing `id`
    pub fn tag(&self, kind: ObjectKind, id: ControlPlaneId, naming: &NamingScheme, key: &str, value: &str) -> bool {
        match self.objects(kind).lock().iter_mut().find(|r| r.belongs_to(id, naming)) {
            Some(record) => {
                record.tags.insert(key.to_string(), value.to_string());
                true
            }
            None => false,
        }
    }

    /// Drop the object backing `id`
    pub fn remove(&self, kind: ObjectKind, id: ControlPlaneId, naming: &NamingScheme) -> bool {
        let mut objects = self.objects(kind).lock();
        let before = objects.len();
        objects.retain(|r| !r.belongs_to(id, naming));
        objects.len() < before
    }

    /// Fail the next `n` listings with a transport error
    pub fn fail_next_listings(&self, n: u32) {
        self.transport_failures.store(n, Ordering::SeqCst);
    }

    #[must_use]
    pub fn list_calls(&self) -> u32 {
        self.list_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn templates(&self) -> Vec<PlacementTemplate> {
        self.templates.lock().clone()
    }

    fn listing(&self, kind: ObjectKind, operation: &str, filter: &NameFilter) -> BackendResult<Vec<BackendRecord>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .transport_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(BackendError::Transport {
                operation: operation.to_string(),
                message: "connection reset".to_string(),
            });
        }
        Ok(self
            .objects(kind)
            .lock()
            .iter()
            .filter(|r| filter.matches(&r.name))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl StorageBackend for FakeBackend {
    async fn list_volumes(&self, filter: &NameFilter) -> BackendResult<Vec<BackendRecord>> {
        self.listing(ObjectKind::Volume, "VolumesList", filter)
    }

    async fn list_snapshots(&self, filter: &NameFilter) -> BackendResult<Vec<BackendRecord>> {
        self.listing(ObjectKind::Snapshot, "SnapshotsList", filter)
    }

    async fn rename(&self, kind: ObjectKind, name: &str, new_name: &str) -> BackendResult<()> {
        let mut objects = self.objects(kind).lock();
        if objects.iter().any(|r| r.name == new_name) {
            return Err(BackendError::api("Rename", "objectExists", new_name));
        }
        let record = objects
            .iter_mut()
            .find(|r| r.name == name)
            .ok_or_else(|| BackendError::api("Rename", OBJECT_DOES_NOT_EXIST, name))?;
        record.name = new_name.to_string();
        Ok(())
    }

    async fn delete(&self, kind: ObjectKind, name: &str) -> BackendResult<()> {
        let mut objects = self.objects(kind).lock();
        let before = objects.len();
        objects.retain(|r| r.name != name);
        if objects.len() == before {
            return Err(BackendError::api("Delete", OBJECT_DOES_NOT_EXIST, name));
        }
        Ok(())
    }

    async fn create_template(&self, template: &PlacementTemplate) -> BackendResult<()> {
        let mut templates = self.templates.lock();
        templates.retain(|t| t.name != template.name);
        templates.push(template.clone());
        Ok(())
    }

    async fn delete_template(&self, name: &str) -> BackendResult<()> {
        let mut templates = self.templates.lock();
        let before = templates.len();
        templates.retain(|t| t.name != name);
        if templates.len() == before {
            return Err(BackendError::api("TemplateDelete", OBJECT_DOES_NOT_EXIST, name));
        }
        Ok(())
    }
}

/// Records with the scheme of their current name, for assertions
#[must_use]
pub fn schemes(records: &[BackendRecord], naming: &NamingScheme) -> Vec<NameScheme> {
    records.iter().map(|r| r.scheme(naming)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cutover_model::GIB;

    #[test]
    fn rename_keeps_id_tag_and_size() {
        let backend = FakeBackend::new();
        let naming = NamingScheme::default();
        let id = ControlPlaneId::new();
        backend.insert_legacy(ObjectKind::Volume, id, 10 * GIB, &naming);

        let global = backend.rename_to_global(ObjectKind::Volume, id, &naming).unwrap();
        assert!(global.starts_with('~'));
        let record = backend.record(ObjectKind::Volume, &global).unwrap();
        assert_eq!(record.tags.get(ID_TAG), Some(&id.to_string()));
        assert_eq!(record.size_bytes, 10 * GIB);
        assert!(backend.rename_to_global(ObjectKind::Volume, id, &naming).is_none());
        assert_eq!(backend.find(ObjectKind::Volume, id, &naming), Some(record));
    }

    #[test]
    fn tag_and_remove_follow_the_object_across_rename() {
        let backend = FakeBackend::new();
        let naming = NamingScheme::default();
        let id = ControlPlaneId::new();
        backend.insert_legacy(ObjectKind::Snapshot, id, GIB, &naming);
        backend.rename_to_global(ObjectKind::Snapshot, id, &naming).unwrap();

        assert!(backend.tag(ObjectKind::Snapshot, id, &naming, "policy", "gold"));
        let record = backend.find(ObjectKind::Snapshot, id, &naming).unwrap();
        assert_eq!(record.tags.get("policy").map(String::as_str), Some("gold"));

        assert!(backend.remove(ObjectKind::Snapshot, id, &naming));
        assert!(!backend.remove(ObjectKind::Snapshot, id, &naming));
    }

    #[tokio::test]
    async fn injected_failures_run_out() {
        let backend = FakeBackend::new();
        backend.fail_next_listings(1);
        assert!(backend.list_volumes(&NameFilter::All).await.unwrap_err().is_retryable());
        assert!(backend.list_volumes(&NameFilter::All).await.unwrap().is_empty());
        assert_eq!(backend.list_calls(), 2);
    }

    #[tokio::test]
    async fn missing_object_reports_does_not_exist() {
        let backend = FakeBackend::new();
        let err = backend.delete(ObjectKind::Snapshot, "nope").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
