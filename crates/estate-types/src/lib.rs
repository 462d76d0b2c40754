//! Foundation types for the estate entity store.
//!
//! This crate provides the identity, version, and state types shared by the
//! codec, the store contract, and every backend. Every other estate crate
//! depends on `estate-types`.
//!
//! # Key Types
//!
//! - [`EntityReference`] -- Stable opaque identity used as the store key
//! - [`Version`] -- Opaque optimistic-concurrency token
//! - [`Timestamp`] -- Epoch-millisecond time of the last successful write
//! - [`EntityState`] -- One entity's properties and associations at one point in time

pub mod error;
pub mod reference;
pub mod state;
pub mod temporal;
pub mod version;

pub use error::TypeError;
pub use reference::EntityReference;
pub use state::EntityState;
pub use temporal::Timestamp;
pub use version::Version;
