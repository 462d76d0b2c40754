use std::fmt;
use std::io;

use estate_codec::{CodecError, StateCodec};
use estate_types::{EntityReference, EntityState};
use tracing::{debug, warn};

use crate::config::StoreOptions;
use crate::error::{StoreError, StoreResult};

/// One staged operation against a map entity store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MapChange {
    /// Create `reference` with the given raw state.
    New { reference: EntityReference, state: String },
    /// Replace the stored state of an existing `reference`.
    Update { reference: EntityReference, state: String },
    /// Remove `reference`, tolerating absence.
    Remove { reference: EntityReference },
}

impl MapChange {
    pub fn reference(&self) -> &EntityReference {
        match self {
            Self::New { reference, .. } | Self::Update { reference, .. } | Self::Remove { reference } => {
                reference
            }
        }
    }

    /// Short name of the operation, for logs.
    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::New { .. } => ChangeKind::New,
            Self::Update { .. } => ChangeKind::Update,
            Self::Remove { .. } => ChangeKind::Remove,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    New,
    Update,
    Remove,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::New => "new",
            Self::Update => "update",
            Self::Remove => "remove",
        })
    }
}

/// Receiver of the operations in a [`ChangeBatch`].
///
/// Each backend implements this against its own medium. Every method must
/// apply its change atomically: on error, the stored value under that
/// reference is exactly what it was before the call.
pub trait MapChanger {
    /// Store `state` under `reference`, failing with
    /// [`StoreError::EntityAlreadyExists`] if something is already there.
    fn new_entity(&mut self, reference: &EntityReference, state: &str) -> StoreResult<()>;

    /// Replace the state under `reference`, failing with
    /// [`StoreError::EntityNotFound`] if nothing is there.
    fn update_entity(&mut self, reference: &EntityReference, state: &str) -> StoreResult<()>;

    /// Remove `reference`. Absence is not an error.
    fn remove_entity(&mut self, reference: &EntityReference) -> StoreResult<()>;
}

/// Counts of applied changes, by kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
}

impl ApplySummary {
    pub fn total(&self) -> usize {
        self.created + self.updated + self.removed
    }
}

/// An ordered set of create/update/remove operations built by a caller and
/// then handed to [`MapEntityStore::apply_changes`](crate::MapEntityStore::apply_changes).
///
/// Writes are staged: a create or update only enters the batch once its
/// [`StagedState`] is committed, and only reaches the store when the batch
/// is applied.
#[derive(Clone, Debug, Default)]
pub struct ChangeBatch {
    changes: Vec<MapChange>,
}

impl ChangeBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a create. Write the serialized state into the returned sink
    /// and call [`StagedState::commit`].
    pub fn new_entity(&mut self, reference: EntityReference) -> StagedState<'_> {
        StagedState::new(self, reference, StagedKind::New)
    }

    /// Stage an update. Write the serialized state into the returned sink
    /// and call [`StagedState::commit`].
    pub fn update_entity(&mut self, reference: EntityReference) -> StagedState<'_> {
        StagedState::new(self, reference, StagedKind::Update)
    }

    /// Stage a remove. Takes effect immediately in the batch.
    pub fn remove_entity(&mut self, reference: EntityReference) -> &mut Self {
        self.changes.push(MapChange::Remove { reference });
        self
    }

    /// Encode `state` and stage its creation under its own identity.
    pub fn create_state(&mut self, state: &EntityState) -> StoreResult<&mut Self> {
        let record = StateCodec::encode(state).map_err(|e| StoreError::decoding(&state.identity, e))?;
        self.changes.push(MapChange::New {
            reference: state.identity.clone(),
            state: record,
        });
        Ok(self)
    }

    /// Encode `state` and stage it as a replacement under its own identity.
    pub fn update_state(&mut self, state: &EntityState) -> StoreResult<&mut Self> {
        let record = StateCodec::encode(state).map_err(|e| StoreError::decoding(&state.identity, e))?;
        self.changes.push(MapChange::Update {
            reference: state.identity.clone(),
            state: record,
        });
        Ok(self)
    }

    /// Append an already-built change.
    pub fn push(&mut self, change: MapChange) -> &mut Self {
        self.changes.push(change);
        self
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MapChange> {
        self.changes.iter()
    }

    /// Feed every change to `changer` in submission order.
    ///
    /// Stops at the first failing change and returns its error. Changes
    /// before it stay applied.
    pub fn visit(&self, changer: &mut dyn MapChanger, options: &StoreOptions) -> StoreResult<ApplySummary> {
        let mut summary = ApplySummary::default();
        for (index, change) in self.changes.iter().enumerate() {
            let reference = change.reference();
            let result = match change {
                MapChange::New { state, .. } => changer.new_entity(reference, state),
                MapChange::Update { state, .. } => changer.update_entity(reference, state),
                MapChange::Remove { .. } => changer.remove_entity(reference),
            };
            if let Err(e) = result {
                warn!(
                    index,
                    kind = %change.kind(),
                    reference = %reference,
                    applied = summary.total(),
                    error = %e,
                    "change failed, batch stopped"
                );
                return Err(e);
            }
            if options.trace_operations {
                debug!(kind = %change.kind(), reference = %reference, "applied change");
            }
            match change.kind() {
                ChangeKind::New => summary.created += 1,
                ChangeKind::Update => summary.updated += 1,
                ChangeKind::Remove => summary.removed += 1,
            }
        }
        Ok(summary)
    }
}

impl<'a> IntoIterator for &'a ChangeBatch {
    type Item = &'a MapChange;
    type IntoIter = std::slice::Iter<'a, MapChange>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StagedKind {
    New,
    Update,
}

/// Write buffer for one staged create or update.
///
/// Bytes written here are held in the sink until [`commit`](Self::commit)
/// moves them into the batch. Dropping the sink discards them.
pub struct StagedState<'a> {
    batch: &'a mut ChangeBatch,
    reference: EntityReference,
    kind: StagedKind,
    buf: Vec<u8>,
}

impl<'a> StagedState<'a> {
    fn new(batch: &'a mut ChangeBatch, reference: EntityReference, kind: StagedKind) -> Self {
        Self {
            batch,
            reference,
            kind,
            buf: Vec::new(),
        }
    }

    pub fn reference(&self) -> &EntityReference {
        &self.reference
    }

    /// Move the buffered state into the batch.
    ///
    /// Fails without touching the batch if the buffer is empty or not UTF-8.
    pub fn commit(self) -> StoreResult<()> {
        let Self {
            batch,
            reference,
            kind,
            buf,
        } = self;
        let state = String::from_utf8(buf).map_err(|_| {
            StoreError::decoding(&reference, CodecError::NotUtf8)
        })?;
        if state.trim().is_empty() {
            return Err(StoreError::decoding(
                &reference,
                CodecError::InvalidState("staged state is empty".into()),
            ));
        }
        let change = match kind {
            StagedKind::New => MapChange::New { reference, state },
            StagedKind::Update => MapChange::Update { reference, state },
        };
        batch.changes.push(change);
        Ok(())
    }
}

impl io::Write for StagedState<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::io::Write;

    fn r(s: &str) -> EntityReference {
        EntityReference::new(s).unwrap()
    }

    /// Records calls; fails on a chosen reference.
    #[derive(Default)]
    struct Recorder {
        seen: Vec<String>,
        stored: BTreeMap<String, String>,
        fail_on: Option<String>,
    }

    impl MapChanger for Recorder {
        fn new_entity(&mut self, reference: &EntityReference, state: &str) -> StoreResult<()> {
            if self.fail_on.as_deref() == Some(reference.as_str()) {
                return Err(StoreError::EntityAlreadyExists(reference.clone()));
            }
            self.seen.push(format!("new:{reference}"));
            self.stored.insert(reference.to_string(), state.to_string());
            Ok(())
        }

        fn update_entity(&mut self, reference: &EntityReference, state: &str) -> StoreResult<()> {
            self.seen.push(format!("update:{reference}"));
            self.stored.insert(reference.to_string(), state.to_string());
            Ok(())
        }

        fn remove_entity(&mut self, reference: &EntityReference) -> StoreResult<()> {
            self.seen.push(format!("remove:{reference}"));
            self.stored.remove(reference.as_str());
            Ok(())
        }
    }

    // -----------------------------------------------------------------------
    // Staging
    // -----------------------------------------------------------------------

    #[test]
    fn committed_sink_enters_batch() {
        let mut batch = ChangeBatch::new();
        let mut sink = batch.new_entity(r("a"));
        write!(sink, "{{\"identity\":").unwrap();
        write!(sink, "\"a\"}}").unwrap();
        sink.commit().unwrap();

        assert_eq!(batch.len(), 1);
        assert_eq!(
            batch.iter().next().unwrap(),
            &MapChange::New {
                reference: r("a"),
                state: r#"{"identity":"a"}"#.into()
            }
        );
    }

    #[test]
    fn dropped_sink_is_discarded() {
        let mut batch = ChangeBatch::new();
        {
            let mut sink = batch.update_entity(r("a"));
            sink.write_all(b"{}").unwrap();
        }
        assert!(batch.is_empty());
    }

    #[test]
    fn commit_rejects_empty_and_non_utf8() {
        let mut batch = ChangeBatch::new();
        let err = batch.new_entity(r("a")).commit().unwrap_err();
        assert!(matches!(err, StoreError::Decoding { .. }));

        let mut sink = batch.new_entity(r("b"));
        sink.write_all(&[0xff, 0xfe]).unwrap();
        assert!(sink.commit().is_err());
        assert!(batch.is_empty());
    }

    #[test]
    fn create_state_encodes_under_identity() {
        let state = EntityState::new(r("user-1"), "User").with_property("name", "Alice");
        let mut batch = ChangeBatch::new();
        batch.create_state(&state).unwrap();
        let change = batch.iter().next().unwrap();
        assert_eq!(change.reference(), &r("user-1"));
        assert_eq!(change.kind(), ChangeKind::New);
        match change {
            MapChange::New { state: text, .. } => {
                assert_eq!(StateCodec::decode(text).unwrap(), state)
            }
            other => panic!("unexpected change {other:?}"),
        }
    }

    #[test]
    fn create_state_rejects_invalid_state() {
        let mut batch = ChangeBatch::new();
        let err = batch.create_state(&EntityState::new(r("x"), "")).unwrap_err();
        assert!(matches!(err, StoreError::Decoding { reference: Some(_), .. }));
        assert!(batch.is_empty());
    }

    // -----------------------------------------------------------------------
    // Visiting
    // -----------------------------------------------------------------------

    #[test]
    fn visit_preserves_submission_order() {
        let mut batch = ChangeBatch::new();
        batch.push(MapChange::New {
            reference: r("a"),
            state: "1".into(),
        });
        batch.remove_entity(r("b"));
        batch.push(MapChange::Update {
            reference: r("a"),
            state: "2".into(),
        });

        let mut recorder = Recorder::default();
        let summary = batch.visit(&mut recorder, &StoreOptions::traced()).unwrap();
        assert_eq!(recorder.seen, vec!["new:a", "remove:b", "update:a"]);
        assert_eq!(
            summary,
            ApplySummary {
                created: 1,
                updated: 1,
                removed: 1
            }
        );
        assert_eq!(recorder.stored["a"], "2");
    }

    #[test]
    fn visit_stops_at_first_failure_without_rollback() {
        let mut batch = ChangeBatch::new();
        for id in ["a", "b", "c"] {
            batch.push(MapChange::New {
                reference: r(id),
                state: id.into(),
            });
        }
        let mut recorder = Recorder {
            fail_on: Some("b".into()),
            ..Default::default()
        };
        let err = batch.visit(&mut recorder, &StoreOptions::default()).unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(recorder.seen, vec!["new:a"]);
        assert!(recorder.stored.contains_key("a"));
        assert!(!recorder.stored.contains_key("c"));
    }
}
