//! Control-plane identifiers
//!
//! Every entity the orchestration system owns is addressed by a UUID that
//! never changes, no matter how the backend names the underlying storage.

use crate::error::ModelError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

macro_rules! control_plane_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh random identifier
            #[inline]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID
            #[inline]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Underlying UUID
            #[inline]
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ModelError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim())
                    .map(Self)
                    .map_err(|e| ModelError::InvalidId {
                        value: s.to_string(),
                        reason: e.to_string(),
                    })
            }
        }
    };
}

control_plane_id!(
    /// Identifier of a volume, snapshot or workload in the orchestration system
    ControlPlaneId
);

control_plane_id!(
    /// Hypervisor host identifier
    HostId
);

control_plane_id!(
    /// Control-plane cluster identifier
    ClusterId
);

control_plane_id!(
    /// Primary storage pool identifier
    PoolId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_textual_form() {
        let id = ControlPlaneId::new();
        let parsed: ControlPlaneId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = "not-a-uuid".parse::<HostId>().unwrap_err();
        assert!(matches!(err, ModelError::InvalidId { .. }));
    }

    #[test]
    fn serializes_as_bare_uuid() {
        let id = ClusterId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }
}
