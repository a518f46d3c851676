//! Legacy vs. global backend names
//!
//! Before the cutover the backend stores an object under a name derived from
//! its control-plane id. Afterwards it may carry a backend-assigned global
//! name instead. Global names always start with a backend-owned marker,
//! which is how a listing is split into the two populations.

use crate::ids::ControlPlaneId;
use serde::{Deserialize, Serialize};

/// Which naming scheme a backend name belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NameScheme {
    /// Derived from the control-plane id
    Legacy,
    /// Assigned by the backend
    Global,
}

impl std::fmt::Display for NameScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Legacy => write!(f, "legacy"),
            Self::Global => write!(f, "global"),
        }
    }
}

/// Naming conventions of one backend deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingScheme {
    /// Namespace prepended to the control-plane id to form a legacy name
    #[serde(default)]
    pub legacy_prefix: Option<String>,
    /// Prefix every backend-assigned name starts with
    #[serde(default = "default_global_marker")]
    pub global_marker: String,
}

fn default_global_marker() -> String {
    "~".to_string()
}

impl Default for NamingScheme {
    fn default() -> Self {
        Self {
            legacy_prefix: None,
            global_marker: default_global_marker(),
        }
    }
}

impl NamingScheme {
    /// With a legacy namespace prefix
    #[inline]
    #[must_use]
    pub fn with_legacy_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.legacy_prefix = Some(prefix.into());
        self
    }

    /// Legacy name for a control-plane id.
    ///
    /// Depends on the id alone, so objects that were never attached (and
    /// therefore have no recorded backend path) still resolve.
    #[must_use]
    pub fn legacy_name(&self, id: ControlPlaneId) -> String {
        match &self.legacy_prefix {
            Some(prefix) => format!("{prefix}{id}"),
            None => id.to_string(),
        }
    }

    /// Full backend name for a backend-internal global id
    #[must_use]
    pub fn global_name(&self, global_id: &str) -> String {
        if global_id.starts_with(&self.global_marker) {
            global_id.to_string()
        } else {
            format!("{}{}", self.global_marker, global_id)
        }
    }

    /// Classify a backend name
    #[must_use]
    pub fn classify(&self, name: &str) -> NameScheme {
        if !self.global_marker.is_empty() && name.starts_with(&self.global_marker) {
            NameScheme::Global
        } else {
            NameScheme::Legacy
        }
    }

    /// Recover the control-plane id from a legacy name, if it is one
    #[must_use]
    pub fn id_from_legacy_name(&self, name: &str) -> Option<ControlPlaneId> {
        if self.classify(name) != NameScheme::Legacy {
            return None;
        }
        let bare = match &self.legacy_prefix {
            Some(prefix) => name.strip_prefix(prefix.as_str())?,
            None => name,
        };
        bare.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn legacy_name_is_textual_id() {
        let id = ControlPlaneId::new();
        assert_eq!(NamingScheme::default().legacy_name(id), id.to_string());
    }

    #[test]
    fn legacy_name_honours_prefix() {
        let id = ControlPlaneId::new();
        let scheme = NamingScheme::default().with_legacy_prefix("cs-");
        assert_eq!(scheme.legacy_name(id), format!("cs-{id}"));
        assert_eq!(scheme.id_from_legacy_name(&format!("cs-{id}")), Some(id));
        assert_eq!(scheme.id_from_legacy_name(&id.to_string()), None);
    }

    #[test]
    fn classify_by_marker() {
        let scheme = NamingScheme::default();
        assert_eq!(scheme.classify("~abc.1.x"), NameScheme::Global);
        assert_eq!(scheme.classify("0b2c6a4e-1111-2222-3333-444455556666"), NameScheme::Legacy);
    }

    #[test]
    fn global_name_is_not_double_prefixed() {
        let scheme = NamingScheme::default();
        assert_eq!(scheme.global_name("abc.1.x"), "~abc.1.x");
        assert_eq!(scheme.global_name("~abc.1.x"), "~abc.1.x");
    }

    #[test]
    fn global_names_never_yield_ids() {
        let scheme = NamingScheme::default();
        assert_eq!(scheme.id_from_legacy_name("~abc.1.x"), None);
    }

    proptest! {
        #[test]
        fn legacy_and_global_never_overlap(
            bits: u128,
            global in "[a-z0-9]{1,8}\\.[0-9]{1,4}\\.[a-z]",
            prefix in proptest::option::of("[a-z]{1,4}-"),
        ) {
            let scheme = NamingScheme { legacy_prefix: prefix, ..NamingScheme::default() };
            let id = ControlPlaneId::from_uuid(uuid::Uuid::from_u128(bits));

            let legacy = scheme.legacy_name(id);
            prop_assert_eq!(scheme.classify(&legacy), NameScheme::Legacy);
            prop_assert_eq!(scheme.id_from_legacy_name(&legacy), Some(id));

            let global = scheme.global_name(&global);
            prop_assert_eq!(scheme.classify(&global), NameScheme::Global);
            prop_assert_eq!(scheme.id_from_legacy_name(&global), None);
        }
    }
}
