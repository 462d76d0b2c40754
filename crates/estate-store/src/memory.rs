use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use estate_codec::StateCodec;
use estate_types::EntityReference;
use tracing::{debug, warn};

use crate::changes::{ChangeBatch, MapChanger};
use crate::config::StoreOptions;
use crate::error::{StoreError, StoreResult};
use crate::traits::{BackupRestore, MapEntityStore, StateRecords};

/// In-memory, HashMap-based entity store.
///
/// Reference backend for tests and embedding. Records are held behind a
/// `RwLock`; each change takes the write lock for its own duration only, so
/// a batch is atomic per change but readers may observe it half applied.
pub struct InMemoryEntityStore {
    entries: RwLock<HashMap<EntityReference, String>>,
    options: StoreOptions,
}

impl InMemoryEntityStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::with_options(StoreOptions::default())
    }

    pub fn with_options(options: StoreOptions) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            options,
        }
    }

    /// Number of entities currently stored.
    pub fn len(&self) -> usize {
        self.entries.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().expect("lock poisoned").is_empty()
    }

    /// Remove every entity.
    pub fn clear(&self) {
        self.entries.write().expect("lock poisoned").clear();
    }

    /// Sorted list of every stored reference.
    pub fn all_references(&self) -> Vec<EntityReference> {
        let map = self.entries.read().expect("lock poisoned");
        let mut refs: Vec<EntityReference> = map.keys().cloned().collect();
        refs.sort();
        refs
    }

    /// Copy of every record, ordered by reference.
    fn snapshot(&self) -> Vec<String> {
        let map = self.entries.read().expect("lock poisoned");
        let mut pairs: Vec<(&EntityReference, &String)> = map.iter().collect();
        pairs.sort_by(|a, b| a.0.cmp(b.0));
        pairs.into_iter().map(|(_, v)| v.clone()).collect()
    }
}

impl Default for InMemoryEntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InMemoryEntityStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryEntityStore")
            .field("entity_count", &self.len())
            .field("options", &self.options)
            .finish()
    }
}

/// Applies changes straight to the map, one write lock per change.
struct MemoryChanger<'a> {
    entries: &'a RwLock<HashMap<EntityReference, String>>,
}

impl MapChanger for MemoryChanger<'_> {
    fn new_entity(&mut self, reference: &EntityReference, state: &str) -> StoreResult<()> {
        let mut map = self.entries.write().expect("lock poisoned");
        // Swap in, then put back whatever was displaced.
        if let Some(previous) = map.insert(reference.clone(), state.to_string()) {
            map.insert(reference.clone(), previous);
            return Err(StoreError::EntityAlreadyExists(reference.clone()));
        }
        Ok(())
    }

    fn update_entity(&mut self, reference: &EntityReference, state: &str) -> StoreResult<()> {
        let mut map = self.entries.write().expect("lock poisoned");
        if map.insert(reference.clone(), state.to_string()).is_none() {
            map.remove(reference);
            return Err(StoreError::EntityNotFound(reference.clone()));
        }
        Ok(())
    }

    fn remove_entity(&mut self, reference: &EntityReference) -> StoreResult<()> {
        self.entries.write().expect("lock poisoned").remove(reference);
        Ok(())
    }
}

impl MapEntityStore for InMemoryEntityStore {
    fn get(&self, reference: &EntityReference) -> StoreResult<String> {
        let map = self.entries.read().expect("lock poisoned");
        map.get(reference)
            .cloned()
            .ok_or_else(|| StoreError::EntityNotFound(reference.clone()))
    }

    fn contains(&self, reference: &EntityReference) -> StoreResult<bool> {
        Ok(self.entries.read().expect("lock poisoned").contains_key(reference))
    }

    fn apply_changes(&self, changes: &ChangeBatch) -> StoreResult<()> {
        let mut changer = MemoryChanger {
            entries: &self.entries,
        };
        changes.visit(&mut changer, &self.options)?;
        Ok(())
    }

    fn entity_states(&self) -> StoreResult<StateRecords<'_>> {
        Ok(Box::new(self.snapshot().into_iter().map(StoreResult::Ok)))
    }
}

impl BackupRestore for InMemoryEntityStore {
    fn backup(&self) -> StoreResult<StateRecords<'_>> {
        self.entity_states()
    }

    /// Replace the contents with `records`.
    ///
    /// Holds the write lock for the whole restore. The incoming records are
    /// decoded into a fresh map that only replaces the current one once the
    /// stream is exhausted, so a failure leaves the previous contents in
    /// place. When two records carry the same identity the later one wins.
    fn restore(&self, records: &mut dyn Iterator<Item = StoreResult<String>>) -> StoreResult<u64> {
        let mut map = self.entries.write().expect("lock poisoned");
        let mut staged = HashMap::new();
        for record in records {
            let record = record?;
            let state = StateCodec::decode(&record)?;
            if staged.insert(state.identity.clone(), record).is_some() {
                warn!(reference = %state.identity, "duplicate identity in restore stream, keeping the later record");
            }
        }
        let restored = staged.len() as u64;
        *map = staged;
        debug!(restored, "memory store restored");
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changes::MapChange;
    use crate::conformance;
    use estate_types::EntityState;
    use std::sync::Arc;
    use std::thread;

    fn r(s: &str) -> EntityReference {
        EntityReference::new(s).unwrap()
    }

    fn record(id: &str, name: &str) -> String {
        StateCodec::encode(&EntityState::new(r(id), "User").with_property("name", name)).unwrap()
    }

    // -----------------------------------------------------------------------
    // Contract
    // -----------------------------------------------------------------------

    #[test]
    fn conformance_suite() {
        conformance::run_all(InMemoryEntityStore::new);
    }

    // -----------------------------------------------------------------------
    // Backend specifics
    // -----------------------------------------------------------------------

    #[test]
    fn empty_store() {
        let store = InMemoryEntityStore::new();
        assert!(store.is_empty());
        assert_eq!(store.len(), 0);
        assert!(store.get(&r("nope")).unwrap_err().is_not_found());
        assert!(!store.contains(&r("nope")).unwrap());
    }

    #[test]
    fn failed_update_leaves_key_absent() {
        let store = InMemoryEntityStore::new();
        let mut batch = ChangeBatch::new();
        batch.push(MapChange::Update {
            reference: r("ghost"),
            state: record("ghost", "x"),
        });
        assert!(store.apply_changes(&batch).unwrap_err().is_not_found());
        assert!(store.is_empty());
    }

    #[test]
    fn duplicate_create_keeps_first_value() {
        let store = InMemoryEntityStore::new();
        let mut batch = ChangeBatch::new();
        batch.push(MapChange::New {
            reference: r("a"),
            state: record("a", "first"),
        });
        store.apply_changes(&batch).unwrap();

        let mut again = ChangeBatch::new();
        again.push(MapChange::New {
            reference: r("a"),
            state: record("a", "second"),
        });
        assert!(store.apply_changes(&again).unwrap_err().is_already_exists());
        assert_eq!(store.get(&r("a")).unwrap(), record("a", "first"));
    }

    #[test]
    fn entity_states_are_a_sorted_snapshot() {
        let store = InMemoryEntityStore::new();
        let mut batch = ChangeBatch::new();
        for id in ["c", "a", "b"] {
            batch.push(MapChange::New {
                reference: r(id),
                state: record(id, id),
            });
        }
        store.apply_changes(&batch).unwrap();

        let states = store.entity_states().unwrap();
        store.clear();
        let ids: Vec<_> = states
            .map(|s| StateCodec::identity_of(&s.unwrap()).unwrap().into_string())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(store.all_references(), Vec::<EntityReference>::new());
    }

    #[test]
    fn failed_restore_keeps_previous_snapshot() {
        let store = InMemoryEntityStore::new();
        let mut batch = ChangeBatch::new();
        batch.push(MapChange::New {
            reference: r("keep"),
            state: record("keep", "x"),
        });
        store.apply_changes(&batch).unwrap();

        let mut incoming = vec![Ok(record("a", "A")), Ok("{broken".to_string())].into_iter();
        let err = store.restore(&mut incoming).unwrap_err();
        assert!(matches!(err, StoreError::Decoding { .. }));
        assert_eq!(store.all_references(), vec![r("keep")]);
    }

    #[test]
    fn restore_keeps_later_duplicate() {
        let store = InMemoryEntityStore::new();
        let mut incoming = vec![Ok(record("a", "old")), Ok(record("a", "new"))].into_iter();
        assert_eq!(store.restore(&mut incoming).unwrap(), 1);
        assert_eq!(store.get(&r("a")).unwrap(), record("a", "new"));
    }

    #[test]
    fn concurrent_creates_of_one_reference_admit_exactly_one() {
        let store = Arc::new(InMemoryEntityStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let mut batch = ChangeBatch::new();
                    batch.push(MapChange::New {
                        reference: r("contended"),
                        state: record("contended", &i.to_string()),
                    });
                    store.apply_changes(&batch).is_ok()
                })
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn debug_shows_count() {
        let store = InMemoryEntityStore::with_options(StoreOptions::traced());
        let text = format!("{store:?}");
        assert!(text.contains("entity_count: 0"));
        assert!(text.contains("trace_operations: true"));
    }
}
