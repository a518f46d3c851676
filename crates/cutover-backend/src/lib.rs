//! Cutover Backend - storage backend access
//!
//! Provides:
//! - The `StorageBackend` trait and its HTTP implementation
//! - `IdentityResolver`: find an object under its legacy or global name
//! - Tag-based global-name lookup, scanned or indexed
//!
//! # Example
//!
//! ```rust,ignore
//! use cutover_backend::{HttpBackendConfig, HttpStorageBackend, IdentityResolver};
//!
//! let backend = Arc::new(HttpStorageBackend::new(&config)?);
//! let resolver = IdentityResolver::new(backend, NamingScheme::default());
//! let record = resolver.resolve_current(&volume).await?;
//! println!("{} is currently {}", volume.control_plane_id, record.name);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod api;
pub mod error;
pub mod http;
pub mod index;
pub mod resolver;

pub use api::{NameFilter, PlacementTemplate, StorageBackend};
pub use error::{BackendError, BackendResult, IdentityError, OBJECT_DOES_NOT_EXIST};
pub use http::{HttpBackendConfig, HttpStorageBackend};
pub use index::TagIndex;
pub use resolver::{
    resolve_global_id_from_tag, IdentityResolver, ResolutionOrder, DEFAULT_RETRY_BACKOFF,
};
