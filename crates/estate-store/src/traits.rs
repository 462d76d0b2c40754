use estate_types::EntityReference;

use crate::changes::ChangeBatch;
use crate::error::{StoreError, StoreResult};

/// Lazy sequence of raw state records.
///
/// Callers cancel an enumeration by dropping the iterator; backends that
/// hold a cursor release it on drop.
pub type StateRecords<'a> = Box<dyn Iterator<Item = StoreResult<String>> + Send + 'a>;

/// Key-value store of serialized entity state.
///
/// All implementations must satisfy these invariants:
/// - A stored record is never partially overwritten. Each create or update
///   replaces the whole record under its reference, atomically.
/// - Within one [`ChangeBatch`], changes are applied in submission order.
///   Each change is atomic on its own; a failure stops the batch but does not
///   roll back changes already applied (no whole-batch atomicity).
/// - Create fails with [`StoreError::EntityAlreadyExists`] if the reference
///   is stored; update fails with [`StoreError::EntityNotFound`] if it is
///   not; remove of an absent reference is a no-op.
/// - Safe under concurrent calls from many threads.
/// - All backend errors are propagated, never retried or swallowed.
pub trait MapEntityStore: Send + Sync {
    /// Read the raw record stored under `reference`.
    ///
    /// Returns [`StoreError::EntityNotFound`] if there is none.
    fn get(&self, reference: &EntityReference) -> StoreResult<String>;

    /// Apply every change in the batch, in order.
    fn apply_changes(&self, changes: &ChangeBatch) -> StoreResult<()>;

    /// Enumerate every stored record in backend-defined order.
    ///
    /// Re-invoke to restart the enumeration.
    fn entity_states(&self) -> StoreResult<StateRecords<'_>>;

    /// Check whether a record exists.
    ///
    /// Default implementation reads the record. Backends may override with
    /// a cheaper existence check.
    fn contains(&self, reference: &EntityReference) -> StoreResult<bool> {
        match self.get(reference) {
            Ok(_) => Ok(true),
            Err(StoreError::EntityNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Bulk export and import of a whole store.
///
/// Restore is a maintenance operation: it replaces the entire data set and
/// is serialized against concurrent writes by the implementation. A failed
/// restore never leaves a half-populated store.
pub trait BackupRestore: Send + Sync {
    /// Stream every stored record, in a stable order for a given content.
    fn backup(&self) -> StoreResult<StateRecords<'_>>;

    /// Replace the store's contents with `records`, keyed by the identity
    /// each record carries. Returns the number of records restored.
    fn restore(&self, records: &mut dyn Iterator<Item = StoreResult<String>>) -> StoreResult<u64>;
}

/// Activation state of a backend bound to an external resource.
pub trait Lifecycle {
    /// Release the connection. Every later operation fails with
    /// [`StoreError::StoreUnavailable`]. Passivating twice is a no-op.
    fn passivate(&self) -> StoreResult<()>;

    fn is_active(&self) -> bool;
}

impl<S: MapEntityStore + ?Sized> MapEntityStore for std::sync::Arc<S> {
    fn get(&self, reference: &EntityReference) -> StoreResult<String> {
        (**self).get(reference)
    }

    fn apply_changes(&self, changes: &ChangeBatch) -> StoreResult<()> {
        (**self).apply_changes(changes)
    }

    fn entity_states(&self) -> StoreResult<StateRecords<'_>> {
        (**self).entity_states()
    }

    fn contains(&self, reference: &EntityReference) -> StoreResult<bool> {
        (**self).contains(reference)
    }
}

impl<S: BackupRestore + ?Sized> BackupRestore for std::sync::Arc<S> {
    fn backup(&self) -> StoreResult<StateRecords<'_>> {
        (**self).backup()
    }

    fn restore(&self, records: &mut dyn Iterator<Item = StoreResult<String>>) -> StoreResult<u64> {
        (**self).restore(records)
    }
}
