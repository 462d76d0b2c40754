//! Blob-store backend for estate.
//!
//! Each entity is one blob named by its reference inside a single
//! container. The [`BlobStore`] trait is the seam to the storage medium;
//! [`FileSystemBlobStore`] implements it over a directory tree, and
//! [`BlobEntityStore`] adapts any implementation to the
//! [`MapEntityStore`](estate_store::MapEntityStore) contract.
//!
//! # Policies
//!
//! - Create and update use native conditional puts (`IfAbsent`,
//!   `IfExists`), never a separate existence check.
//! - Enumeration and backup abort on the first unreadable blob. Blobs
//!   removed between listing and reading are skipped.
//! - Restore clears the container first. If it fails, the container is
//!   left empty.

pub mod blob;
pub mod config;
pub mod entity_store;
pub mod error;
pub mod fs;

pub use blob::{BlobMetadata, BlobStore, ListPage, PutCondition};
pub use config::BlobStoreConfig;
pub use entity_store::BlobEntityStore;
pub use error::{BlobError, BlobResult};
pub use fs::FileSystemBlobStore;
