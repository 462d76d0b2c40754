//! Document-store backend for estate.
//!
//! Each entity is one document in a collection: the `_id` is the entity
//! reference and the state record sits under the `state` field as
//! structured JSON.
//!
//! The database is embedded. A [`DocumentClient`] connects to a data
//! directory, checks credentials against its optional access list, and
//! hands out [`EmbeddedCollection`]s. Every collection is an in-memory
//! ordered map persisted through a checksummed, append-only journal whose
//! durability follows the configured
//! [`WriteConcern`](estate_store::WriteConcern).
//!
//! # Policies
//!
//! - Create maps a duplicate-key insert to `EntityAlreadyExists`; update
//!   maps a replace that matched nothing to `EntityNotFound`.
//! - Enumeration skips documents that carry no state record and stops on
//!   the first collection error.
//! - Lock waits are bounded by `timeout_ms` and surface as `Timeout`.
//! - Restore empties the collection first. If it fails, the collection is
//!   left empty.

pub mod client;
pub mod collection;
pub mod config;
pub mod entity_store;
pub mod error;
pub mod journal;

pub use client::{hash_password, AccessEntry, AccessList, DocumentClient};
pub use collection::{Document, DocumentCollection, EmbeddedCollection};
pub use config::DocumentStoreConfig;
pub use entity_store::{DocumentEntityStore, STATE_FIELD};
pub use error::{DocumentError, DocumentResult};
pub use journal::{Journal, JournalRecord};
