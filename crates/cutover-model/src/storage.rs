//! Storage objects and the backend's view of them

use crate::error::ModelError;
use crate::ids::ControlPlaneId;
use crate::naming::{NameScheme, NamingScheme};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Ordered tag map with unique keys.
///
/// Order is the backend's listing order and is kept so scans stay
/// deterministic.
pub type Tags = IndexMap<String, String>;

/// Volume or snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Volume,
    Snapshot,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Volume => write!(f, "volume"),
            Self::Snapshot => write!(f, "snapshot"),
        }
    }
}

impl FromStr for ObjectKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "volume" => Ok(Self::Volume),
            "snapshot" => Ok(Self::Snapshot),
            other => Err(ModelError::UnknownKind(other.to_string())),
        }
    }
}

/// A volume or snapshot as the orchestration system knows it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageObject {
    pub kind: ObjectKind,
    pub control_plane_id: ControlPlaneId,
    /// Name under which the backend stored the object before the cutover
    #[serde(default)]
    pub backend_legacy_name: Option<String>,
    /// Backend-assigned name, once known
    #[serde(default)]
    pub backend_global_name: Option<String>,
    pub size_bytes: u64,
    /// Owning workload, if attached
    #[serde(default)]
    pub attached_to: Option<ControlPlaneId>,
    #[serde(default)]
    pub tags: Tags,
}

impl StorageObject {
    /// New detached volume
    #[must_use]
    pub fn volume(id: ControlPlaneId, size_bytes: u64) -> Self {
        Self::new(ObjectKind::Volume, id, size_bytes)
    }

    /// New snapshot
    #[must_use]
    pub fn snapshot(id: ControlPlaneId, size_bytes: u64) -> Self {
        Self::new(ObjectKind::Snapshot, id, size_bytes)
    }

    fn new(kind: ObjectKind, control_plane_id: ControlPlaneId, size_bytes: u64) -> Self {
        Self {
            kind,
            control_plane_id,
            backend_legacy_name: None,
            backend_global_name: None,
            size_bytes,
            attached_to: None,
            tags: Tags::new(),
        }
    }

    /// With a recorded legacy name
    #[inline]
    #[must_use]
    pub fn with_legacy_name(mut self, name: impl Into<String>) -> Self {
        self.backend_legacy_name = Some(name.into());
        self
    }

    /// With a known global name
    #[inline]
    #[must_use]
    pub fn with_global_name(mut self, name: impl Into<String>) -> Self {
        self.backend_global_name = Some(name.into());
        self
    }

    /// Attached to a workload
    #[inline]
    #[must_use]
    pub fn attached_to(mut self, workload: ControlPlaneId) -> Self {
        self.attached_to = Some(workload);
        self
    }

    /// With an extra tag
    #[inline]
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Legacy name the backend would use, recorded or derived from the id
    #[must_use]
    pub fn legacy_name(&self, scheme: &NamingScheme) -> String {
        self.backend_legacy_name
            .clone()
            .unwrap_or_else(|| scheme.legacy_name(self.control_plane_id))
    }

    /// Whether the object is attached to a workload
    #[inline]
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.attached_to.is_some()
    }
}

/// One object as listed by the storage backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendRecord {
    /// Name the backend currently exposes
    pub name: String,
    pub kind: ObjectKind,
    pub size_bytes: u64,
    #[serde(default)]
    pub tags: Tags,
    /// Placement template the object was created from
    #[serde(default)]
    pub template: Option<String>,
    /// Backend-internal id, independent of the name
    #[serde(default)]
    pub global_id: Option<String>,
}

impl BackendRecord {
    /// New untagged record
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ObjectKind, size_bytes: u64) -> Self {
        Self {
            name: name.into(),
            kind,
            size_bytes,
            tags: Tags::new(),
            template: None,
            global_id: None,
        }
    }

    /// With a tag
    #[inline]
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// With a placement template
    #[inline]
    #[must_use]
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    /// With a backend-internal id
    #[inline]
    #[must_use]
    pub fn with_global_id(mut self, id: impl Into<String>) -> Self {
        self.global_id = Some(id.into());
        self
    }

    /// Naming scheme of the current name
    #[must_use]
    pub fn scheme(&self, naming: &NamingScheme) -> NameScheme {
        naming.classify(&self.name)
    }

    /// Whether any tag value equals the given text
    #[must_use]
    pub fn has_tag_value(&self, value: &str) -> bool {
        self.tags.values().any(|v| v == value)
    }

    /// Global name of this record: its current name when already global,
    /// otherwise derived from the backend-internal id.
    #[must_use]
    pub fn global_name(&self, naming: &NamingScheme) -> Option<String> {
        match self.scheme(naming) {
            NameScheme::Global => Some(self.name.clone()),
            NameScheme::Legacy => self.global_id.as_deref().map(|id| naming.global_name(id)),
        }
    }

    /// Whether this record is the backing object of a control-plane id.
    ///
    /// Matches either the legacy name derived from the id or a tag carrying
    /// the id.
    #[must_use]
    pub fn belongs_to(&self, id: ControlPlaneId, naming: &NamingScheme) -> bool {
        naming.id_from_legacy_name(&self.name) == Some(id) || self.has_tag_value(&id.to_string())
    }
}
