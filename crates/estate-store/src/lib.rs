//! Pluggable persistence for entity state.
//!
//! A [`MapEntityStore`] maps an [`EntityReference`](estate_types::EntityReference)
//! to the serialized [`EntityState`](estate_types::EntityState) of one entity.
//! It knows nothing about the entity's type or shape; it only stores,
//! replaces, removes, and enumerates whole records.
//!
//! # Writing
//!
//! Changes are collected in a [`ChangeBatch`] and handed to
//! [`MapEntityStore::apply_changes`]. The backend receives them through the
//! [`MapChanger`] visitor, one at a time, in submission order:
//!
//! - create fails with `EntityAlreadyExists` if the reference is stored
//! - update fails with `EntityNotFound` if it is not
//! - remove of an absent reference is a no-op
//!
//! Each change is atomic. The batch as a whole is not: a failure stops the
//! batch, and earlier changes stay applied.
//!
//! # Backends
//!
//! - [`InMemoryEntityStore`] -- `HashMap`-based reference backend
//! - `estate-blob` -- one blob per entity in a blob container
//! - `estate-docdb` -- one document per entity in a document collection
//!
//! # Versioned access
//!
//! [`EntityStateStore`] wraps any backend with decoded states and
//! optimistic version checks.

pub mod backup;
pub mod changes;
pub mod config;
pub mod error;
pub mod memory;
pub mod state_store;
pub mod traits;

#[cfg(any(test, feature = "test-suite"))]
pub mod conformance;

pub use backup::{backup_to_writer, migrate, restore_from_reader};
pub use changes::{ApplySummary, ChangeBatch, ChangeKind, MapChange, MapChanger, StagedState};
pub use config::{StoreOptions, WriteConcern};
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryEntityStore;
pub use state_store::{EntityStateStore, StateChange, StateChanges};
pub use traits::{BackupRestore, Lifecycle, MapEntityStore, StateRecords};
