//! Indexed tag lookup
//!
//! Scanning every record's tag map per lookup is O(n). When many objects are
//! checked against the same listing, index the tag values once.

use crate::error::IdentityError;
use cutover_model::{BackendRecord, ControlPlaneId, ObjectKind};
use indexmap::IndexMap;

/// Tag value → records carrying it, built from one backend listing
#[derive(Debug, Clone)]
pub struct TagIndex {
    kind: ObjectKind,
    records: Vec<BackendRecord>,
    by_value: IndexMap<String, Vec<usize>>,
}

impl TagIndex {
    /// Index a listing, keeping backend order
    #[must_use]
    pub fn build(kind: ObjectKind, records: Vec<BackendRecord>) -> Self {
        let mut by_value: IndexMap<String, Vec<usize>> = IndexMap::new();
        for (idx, record) in records.iter().enumerate() {
            for value in record.tags.values() {
                let slots = by_value.entry(value.clone()).or_default();
                // One record may carry the same value under several keys
                if slots.last() != Some(&idx) {
                    slots.push(idx);
                }
            }
        }
        Self {
            kind,
            records,
            by_value,
        }
    }

    /// The single record tagged with an id.
    ///
    /// # Errors
    /// - `IdentityError::AmbiguousTag` if several records carry it
    /// - `IdentityError::NotFound` if none does
    pub fn lookup(&self, id: ControlPlaneId) -> Result<&BackendRecord, IdentityError> {
        match self.by_value.get(&id.to_string()).map(Vec::as_slice) {
            Some([only]) => Ok(&self.records[*only]),
            Some(many) if many.len() > 1 => Err(IdentityError::AmbiguousTag {
                id,
                matches: many.iter().map(|i| self.records[*i].name.clone()).collect(),
            }),
            _ => Err(IdentityError::NotFound {
                id,
                kind: self.kind,
                tried: vec![format!("tag={id}")],
            }),
        }
    }

    /// Records in listing order
    #[inline]
    #[must_use]
    pub fn records(&self) -> &[BackendRecord] {
        &self.records
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cutover_model::GIB;

    fn tagged(name: &str, id: ControlPlaneId) -> BackendRecord {
        BackendRecord::new(name, ObjectKind::Snapshot, GIB).with_tag("cs-id", id.to_string())
    }

    #[test]
    fn lookup_single_match() {
        let id = ControlPlaneId::new();
        let index = TagIndex::build(ObjectKind::Snapshot, vec![
            tagged("~a", ControlPlaneId::new()),
            tagged("~b", id),
            tagged("~c", ControlPlaneId::new()),
        ]);
        assert_eq!(index.lookup(id).unwrap().name, "~b");
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn same_value_under_two_keys_is_one_match() {
        let id = ControlPlaneId::new();
        let record = tagged("~a", id).with_tag("vm", id.to_string());
        let index = TagIndex::build(ObjectKind::Snapshot, vec![record]);
        assert_eq!(index.lookup(id).unwrap().name, "~a");
    }

    #[test]
    fn duplicate_tag_is_ambiguous() {
        let id = ControlPlaneId::new();
        let index = TagIndex::build(ObjectKind::Snapshot, vec![tagged("~a", id), tagged("~b", id)]);
        match index.lookup(id) {
            Err(IdentityError::AmbiguousTag { matches, .. }) => {
                assert_eq!(matches, vec!["~a".to_string(), "~b".to_string()]);
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[test]
    fn missing_tag_is_not_found() {
        let index = TagIndex::build(ObjectKind::Snapshot, vec![tagged("~a", ControlPlaneId::new())]);
        assert!(index.lookup(ControlPlaneId::new()).unwrap_err().is_not_found());
        assert!(TagIndex::build(ObjectKind::Volume, Vec::new()).is_empty());
    }
}
