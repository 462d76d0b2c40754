use std::collections::HashMap;
use std::sync::Mutex;

use estate_codec::StateCodec;
use estate_types::{EntityReference, EntityState, Timestamp, Version};
use tracing::debug;

use crate::changes::ChangeBatch;
use crate::error::{StoreError, StoreResult};
use crate::traits::MapEntityStore;

/// One change in a [`StateChanges`] set.
#[derive(Clone, Debug, PartialEq)]
pub enum StateChange {
    Create(EntityState),
    /// Replace an entity. The state's `version` must be the version
    /// currently stored.
    Update(EntityState),
    Remove(EntityReference),
}

/// Ordered set of decoded-state changes for [`EntityStateStore::apply`].
#[derive(Clone, Debug, Default)]
pub struct StateChanges {
    changes: Vec<StateChange>,
}

impl StateChanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(mut self, state: EntityState) -> Self {
        self.changes.push(StateChange::Create(state));
        self
    }

    pub fn update(mut self, state: EntityState) -> Self {
        self.changes.push(StateChange::Update(state));
        self
    }

    pub fn remove(mut self, reference: EntityReference) -> Self {
        self.changes.push(StateChange::Remove(reference));
        self
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Versioned view over a [`MapEntityStore`] that works in decoded states.
///
/// Updates are checked optimistically: a state must carry the version it
/// was loaded at, and a successful write moves it to the successor
/// version. Checks and submission for one facade run under a commit lock,
/// so two updates through the same facade cannot both win.
pub struct EntityStateStore<S> {
    store: S,
    commit_lock: Mutex<()>,
}

impl<S: MapEntityStore> EntityStateStore<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            commit_lock: Mutex::new(()),
        }
    }

    /// The wrapped raw store.
    pub fn inner(&self) -> &S {
        &self.store
    }

    pub fn into_inner(self) -> S {
        self.store
    }

    /// Read and decode the state stored under `reference`.
    pub fn load(&self, reference: &EntityReference) -> StoreResult<EntityState> {
        let record = self.store.get(reference)?;
        StateCodec::decode(&record).map_err(|e| StoreError::decoding(reference, e))
    }

    pub fn contains(&self, reference: &EntityReference) -> StoreResult<bool> {
        self.store.contains(reference)
    }

    /// Lazily decode every stored state.
    pub fn entity_states(&self) -> StoreResult<impl Iterator<Item = StoreResult<EntityState>> + '_> {
        let records = self.store.entity_states()?;
        Ok(records.map(|record| -> StoreResult<EntityState> {
            let record = record?;
            Ok(StateCodec::decode(&record)?)
        }))
    }

    /// Validate, stamp, and write `changes` as one change batch.
    ///
    /// Every version check runs before anything is written; a conflict
    /// fails the whole call with [`StoreError::ConcurrentModification`].
    /// Once submitted, the batch has the per-change atomicity of the
    /// underlying store. Returns the written states with their new
    /// versions, in submission order.
    pub fn apply(&self, changes: StateChanges) -> StoreResult<Vec<EntityState>> {
        let _guard = self.commit_lock.lock().expect("lock poisoned");
        let now = Timestamp::now();

        // Versions as they will be after the earlier changes in this set.
        // `None` means removed.
        let mut pending: HashMap<EntityReference, Option<Version>> = HashMap::new();
        let mut batch = ChangeBatch::new();
        let mut committed = Vec::new();

        for change in changes.changes {
            match change {
                StateChange::Create(state) => {
                    if let Some(Some(_)) = pending.get(&state.identity) {
                        return Err(StoreError::EntityAlreadyExists(state.identity));
                    }
                    let stamped = state.stamped(Version::initial(), now);
                    batch.create_state(&stamped)?;
                    pending.insert(stamped.identity.clone(), Some(stamped.version.clone()));
                    committed.push(stamped);
                }
                StateChange::Update(state) => {
                    let current = match pending.get(&state.identity) {
                        Some(Some(v)) => v.clone(),
                        Some(None) => return Err(StoreError::EntityNotFound(state.identity)),
                        None => self.load(&state.identity)?.version,
                    };
                    if state.version != current {
                        return Err(StoreError::ConcurrentModification {
                            reference: state.identity,
                            expected: state.version,
                            actual: current,
                        });
                    }
                    let stamped = state.stamped(current.successor(), now);
                    batch.update_state(&stamped)?;
                    pending.insert(stamped.identity.clone(), Some(stamped.version.clone()));
                    committed.push(stamped);
                }
                StateChange::Remove(reference) => {
                    batch.remove_entity(reference.clone());
                    pending.insert(reference, None);
                }
            }
        }

        self.store.apply_changes(&batch)?;
        debug!(changes = batch.len(), written = committed.len(), "state changes applied");
        Ok(committed)
    }
}
