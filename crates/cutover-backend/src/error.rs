//! Error types for the storage backend
//!
//! Two layers:
//! - `BackendError` for a failed backend call
//! - `IdentityError` for a storage object that cannot be located

use cutover_model::{ControlPlaneId, ObjectKind};

/// Backend error name signalling a missing object
pub const OBJECT_DOES_NOT_EXIST: &str = "objectDoesNotExist";

/// Failed storage backend call
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The backend answered with an error envelope
    #[error("backend api error {name} in {operation}: {description}")]
    Api {
        operation: String,
        name: String,
        description: String,
    },

    /// The request never produced a backend answer
    #[error("backend transport error in {operation}: {message}")]
    Transport { operation: String, message: String },

    /// The answer could not be decoded
    #[error("backend response for {operation} not understood: {message}")]
    Decode { operation: String, message: String },
}

impl BackendError {
    /// Create api error
    pub fn api(
        operation: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self::Api {
            operation: operation.into(),
            name: name.into(),
            description: description.into(),
        }
    }

    /// Backend reported the object as missing
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { name, .. } if name == OBJECT_DOES_NOT_EXIST)
    }

    /// Transient failure worth another attempt
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

/// A storage object could not be located on the backend
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// Neither name resolved
    #[error("{kind} {id} not found on backend (tried: {})", .tried.join(", "))]
    NotFound {
        id: ControlPlaneId,
        kind: ObjectKind,
        tried: Vec<String>,
    },

    /// More than one backend object carries the same control-plane id tag
    #[error("tagging defect: {} backend objects carry id {id}: {}", .matches.len(), .matches.join(", "))]
    AmbiguousTag {
        id: ControlPlaneId,
        matches: Vec<String>,
    },

    /// The tagged object has no backend-assigned name yet
    #[error("backend object {name} tagged with {id} has no global name")]
    NoGlobalName { id: ControlPlaneId, name: String },

    /// Backend call failed
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl IdentityError {
    /// Not found under any scheme
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result type alias for backend calls
pub type BackendResult<T> = Result<T, BackendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_names_every_attempt() {
        let id = ControlPlaneId::new();
        let err = IdentityError::NotFound {
            id,
            kind: ObjectKind::Volume,
            tried: vec![id.to_string(), "~x.1.a".to_string()],
        };
        let text = err.to_string();
        assert!(text.starts_with(&format!("volume {id} not found")));
        assert!(text.contains("~x.1.a"));
    }

    #[test]
    fn backend_not_found_detection() {
        let missing = BackendError::api("VolumesList", OBJECT_DOES_NOT_EXIST, "no such volume");
        let other = BackendError::api("VolumesList", "invalidParam", "bad");
        assert!(missing.is_not_found());
        assert!(!other.is_not_found());
    }

    #[test]
    fn only_transport_is_retryable() {
        let transport = BackendError::Transport {
            operation: "VolumesList".to_string(),
            message: "connection reset".to_string(),
        };
        assert!(transport.is_retryable());
        assert!(!BackendError::api("x", "y", "z").is_retryable());
    }
}
