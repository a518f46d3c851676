//! Storage backend interface
//!
//! The harness only needs a narrow slice of the backend: list objects with
//! their tag maps, rename, delete, and manage placement templates.

use crate::error::BackendResult;
use async_trait::async_trait;
use cutover_model::{BackendRecord, ObjectKind};
use serde::{Deserialize, Serialize};

/// Name pattern applied to a listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameFilter {
    /// Every object
    All,
    /// Exactly this name
    Exact(String),
    /// Names starting with this prefix (backend-named objects)
    Prefix(String),
    /// Names not starting with this prefix (legacy-named objects)
    WithoutPrefix(String),
}

impl NameFilter {
    /// Whether a name passes the filter
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Exact(exact) => name == exact,
            Self::Prefix(prefix) => name.starts_with(prefix.as_str()),
            Self::WithoutPrefix(prefix) => !name.starts_with(prefix.as_str()),
        }
    }
}

/// Placement template created for template/snapshot scenarios
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementTemplate {
    pub name: String,
    pub place_all: String,
    pub place_tail: String,
    pub replication: u8,
}

impl PlacementTemplate {
    /// Template placing all copies in one placement group
    #[must_use]
    pub fn single_group(name: impl Into<String>, group: impl Into<String>, replication: u8) -> Self {
        let group = group.into();
        Self {
            name: name.into(),
            place_all: group.clone(),
            place_tail: group,
            replication,
        }
    }
}

/// Storage backend operations used by the harness
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// List volumes whose names pass the filter, in backend order
    async fn list_volumes(&self, filter: &NameFilter) -> BackendResult<Vec<BackendRecord>>;

    /// List snapshots whose names pass the filter, in backend order
    async fn list_snapshots(&self, filter: &NameFilter) -> BackendResult<Vec<BackendRecord>>;

    /// Rename an object
    async fn rename(&self, kind: ObjectKind, name: &str, new_name: &str) -> BackendResult<()>;

    /// Delete an object
    async fn delete(&self, kind: ObjectKind, name: &str) -> BackendResult<()>;

    /// Create a placement template
    async fn create_template(&self, template: &PlacementTemplate) -> BackendResult<()>;

    /// Delete a placement template
    async fn delete_template(&self, name: &str) -> BackendResult<()>;

    /// List objects of either kind
    async fn list(&self, kind: ObjectKind, filter: &NameFilter) -> BackendResult<Vec<BackendRecord>> {
        match kind {
            ObjectKind::Volume => self.list_volumes(filter).await,
            ObjectKind::Snapshot => self.list_snapshots(filter).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_matching() {
        assert!(NameFilter::All.matches("anything"));
        assert!(NameFilter::Exact("a".into()).matches("a"));
        assert!(!NameFilter::Exact("a".into()).matches("ab"));
        assert!(NameFilter::Prefix("~".into()).matches("~x.1.a"));
        assert!(!NameFilter::WithoutPrefix("~".into()).matches("~x.1.a"));
        assert!(NameFilter::WithoutPrefix("~".into()).matches("legacy"));
    }

    #[test]
    fn single_group_template() {
        let t = PlacementTemplate::single_group("ssd", "hdd-pg", 3);
        assert_eq!(t.place_all, "hdd-pg");
        assert_eq!(t.place_tail, "hdd-pg");
        assert_eq!(t.replication, 3);
    }
}
