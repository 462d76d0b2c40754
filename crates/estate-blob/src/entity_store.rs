use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use estate_codec::{CodecError, StateCodec};
use estate_store::{
    BackupRestore, ChangeBatch, Lifecycle, MapChanger, MapEntityStore, StateRecords, StoreError,
    StoreOptions, StoreResult,
};
use estate_types::EntityReference;
use tracing::{debug, info, warn};

use crate::blob::{BlobStore, PutCondition};
use crate::config::BlobStoreConfig;
use crate::error::BlobError;
use crate::fs::FileSystemBlobStore;

/// Map entity store keeping one blob per entity in a single container.
///
/// The blob name is the entity reference; the blob content is the raw state
/// record. Creates use the blob store's if-absent put and updates its
/// if-exists put, so neither needs a separate existence check.
///
/// Enumeration pages through the container listing and aborts on the first
/// read error; blobs removed between listing and reading are skipped.
/// Restore is a maintenance operation: it blocks point operations, and a
/// failed restore leaves the container empty.
pub struct BlobEntityStore<B: BlobStore = FileSystemBlobStore> {
    blobs: B,
    container: String,
    page_size: usize,
    options: StoreOptions,
    active: AtomicBool,
    /// Shared by point operations, exclusive for restore.
    maintenance: RwLock<()>,
}

impl BlobEntityStore<FileSystemBlobStore> {
    /// Open the file-system blob store described by `config` and make sure
    /// its container exists.
    pub fn activate(config: &BlobStoreConfig, options: StoreOptions) -> StoreResult<Self> {
        config.validate()?;
        let blobs = FileSystemBlobStore::open(&config.root, config.slices, config.write_concern).map_err(|e| {
            StoreError::StoreUnavailable(format!("cannot open blob store at {}: {e}", config.root.display()))
        })?;
        Self::with_blob_store(blobs, &config.container, config.page_size, options)
    }
}

impl<B: BlobStore> BlobEntityStore<B> {
    /// Bind to `container` in an already-open blob store, creating the
    /// container if needed.
    pub fn with_blob_store(blobs: B, container: &str, page_size: usize, options: StoreOptions) -> StoreResult<Self> {
        let created = blobs.create_container_if_absent(container).map_err(|e| {
            StoreError::StoreUnavailable(format!("cannot provision container {container}: {e}"))
        })?;
        info!(container, created, "blob entity store activated");
        Ok(Self {
            blobs,
            container: container.to_string(),
            page_size: page_size.max(1),
            options,
            active: AtomicBool::new(true),
            maintenance: RwLock::new(()),
        })
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn blob_store(&self) -> &B {
        &self.blobs
    }

    fn ensure_active(&self) -> StoreResult<()> {
        if self.active.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::StoreUnavailable(format!(
                "blob entity store for container {} is passivated",
                self.container
            )))
        }
    }

    fn read_record(&self, name: &str) -> StoreResult<Option<String>> {
        match self.blobs.get_blob(&self.container, name)? {
            Some(data) if !data.is_empty() => String::from_utf8(data).map(Some).map_err(|_| {
                match EntityReference::new(name) {
                    Ok(reference) => StoreError::decoding(&reference, CodecError::NotUtf8),
                    Err(_) => StoreError::from(CodecError::NotUtf8),
                }
            }),
            _ => Ok(None),
        }
    }
}

impl<B: BlobStore> fmt::Debug for BlobEntityStore<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobEntityStore")
            .field("container", &self.container)
            .field("page_size", &self.page_size)
            .field("active", &self.is_active())
            .finish()
    }
}

struct BlobChanger<'a, B: BlobStore> {
    blobs: &'a B,
    container: &'a str,
}

impl<B: BlobStore> MapChanger for BlobChanger<'_, B> {
    fn new_entity(&mut self, reference: &EntityReference, state: &str) -> StoreResult<()> {
        match self
            .blobs
            .put_blob(self.container, reference.as_str(), state.as_bytes(), PutCondition::IfAbsent)
        {
            Ok(_) => Ok(()),
            Err(BlobError::PreconditionFailed { .. }) => Err(StoreError::EntityAlreadyExists(reference.clone())),
            Err(e) => Err(e.into()),
        }
    }

    fn update_entity(&mut self, reference: &EntityReference, state: &str) -> StoreResult<()> {
        match self
            .blobs
            .put_blob(self.container, reference.as_str(), state.as_bytes(), PutCondition::IfExists)
        {
            Ok(_) => Ok(()),
            Err(BlobError::PreconditionFailed { .. }) => Err(StoreError::EntityNotFound(reference.clone())),
            Err(e) => Err(e.into()),
        }
    }

    fn remove_entity(&mut self, reference: &EntityReference) -> StoreResult<()> {
        let removed = self.blobs.remove_blob(self.container, reference.as_str())?;
        if !removed {
            debug!(reference = %reference, "remove of absent entity");
        }
        Ok(())
    }
}

impl<B: BlobStore> MapEntityStore for BlobEntityStore<B> {
    fn get(&self, reference: &EntityReference) -> StoreResult<String> {
        self.ensure_active()?;
        let _shared = self.maintenance.read().expect("lock poisoned");
        self.read_record(reference.as_str())?
            .ok_or_else(|| StoreError::EntityNotFound(reference.clone()))
    }

    fn contains(&self, reference: &EntityReference) -> StoreResult<bool> {
        self.ensure_active()?;
        let _shared = self.maintenance.read().expect("lock poisoned");
        Ok(self.blobs.blob_exists(&self.container, reference.as_str())?)
    }

    fn apply_changes(&self, changes: &ChangeBatch) -> StoreResult<()> {
        self.ensure_active()?;
        let _shared = self.maintenance.read().expect("lock poisoned");
        let mut changer = BlobChanger {
            blobs: &self.blobs,
            container: &self.container,
        };
        changes.visit(&mut changer, &self.options)?;
        Ok(())
    }

    fn entity_states(&self) -> StoreResult<StateRecords<'_>> {
        self.ensure_active()?;
        Ok(Box::new(BlobRecords {
            store: self,
            marker: None,
            pending: VecDeque::new(),
            exhausted: false,
            failed: false,
        }))
    }
}

/// Lazy, paginated walk over the container.
struct BlobRecords<'a, B: BlobStore> {
    store: &'a BlobEntityStore<B>,
    marker: Option<String>,
    pending: VecDeque<String>,
    exhausted: bool,
    failed: bool,
}

impl<B: BlobStore> BlobRecords<'_, B> {
    fn fail(&mut self, err: StoreError) -> Option<StoreResult<String>> {
        self.failed = true;
        warn!(container = %self.store.container, error = %err, "enumeration aborted");
        Some(Err(err))
    }
}

impl<B: BlobStore> Iterator for BlobRecords<'_, B> {
    type Item = StoreResult<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.failed {
                return None;
            }
            if let Err(e) = self.store.ensure_active() {
                return self.fail(e);
            }
            if let Some(name) = self.pending.pop_front() {
                let read = {
                    let _shared = self.store.maintenance.read().expect("lock poisoned");
                    self.store.read_record(&name)
                };
                match read {
                    Ok(Some(record)) => return Some(Ok(record)),
                    Ok(None) => {
                        debug!(blob = %name, "blob vanished during enumeration");
                        continue;
                    }
                    Err(e) => return self.fail(e),
                }
            }
            if self.exhausted {
                return None;
            }
            let page = {
                let _shared = self.store.maintenance.read().expect("lock poisoned");
                self.store
                    .blobs
                    .list(&self.store.container, self.marker.as_deref(), self.store.page_size)
            };
            match page {
                Ok(page) => {
                    self.exhausted = page.next_marker.is_none();
                    self.marker = page.next_marker;
                    self.pending.extend(page.names);
                }
                Err(e) => return self.fail(e.into()),
            }
        }
    }
}

impl<B: BlobStore> BackupRestore for BlobEntityStore<B> {
    fn backup(&self) -> StoreResult<StateRecords<'_>> {
        self.entity_states()
    }

    fn restore(&self, records: &mut dyn Iterator<Item = StoreResult<String>>) -> StoreResult<u64> {
        self.ensure_active()?;
        let _exclusive = self.maintenance.write().expect("lock poisoned");
        let cleared = self.blobs.clear_container(&self.container)?;
        debug!(container = %self.container, cleared, "container cleared for restore");

        let mut restored = HashSet::new();
        let result = (|| -> StoreResult<()> {
            for record in records {
                let record = record?;
                let state = StateCodec::decode(&record)?;
                self.blobs.put_blob(
                    &self.container,
                    state.identity.as_str(),
                    record.as_bytes(),
                    PutCondition::Always,
                )?;
                restored.insert(state.identity);
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                info!(container = %self.container, restored = restored.len(), "blob entity store restored");
                Ok(restored.len() as u64)
            }
            Err(e) => {
                warn!(container = %self.container, error = %e, "restore failed, emptying container");
                if let Err(cleanup) = self.blobs.clear_container(&self.container) {
                    warn!(container = %self.container, error = %cleanup, "could not empty container after failed restore");
                }
                Err(e)
            }
        }
    }
}

impl<B: BlobStore> Lifecycle for BlobEntityStore<B> {
    fn passivate(&self) -> StoreResult<()> {
        if self.active.swap(false, Ordering::AcqRel) {
            info!(container = %self.container, "blob entity store passivated");
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use estate_store::conformance;
    use estate_store::MapChange;
    use estate_types::EntityState;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;

    fn r(s: &str) -> EntityReference {
        EntityReference::new(s).unwrap()
    }

    fn record(id: &str) -> String {
        StateCodec::encode(&EntityState::new(r(id), "User").with_property("name", id)).unwrap()
    }

    fn open(root: &Path, container: &str) -> BlobEntityStore {
        let config = BlobStoreConfig {
            container: container.into(),
            page_size: 2,
            ..BlobStoreConfig::at(root)
        };
        BlobEntityStore::activate(&config, StoreOptions::traced()).unwrap()
    }

    fn create(store: &BlobEntityStore, ids: &[&str]) {
        let mut batch = ChangeBatch::new();
        for id in ids {
            batch.push(MapChange::New {
                reference: r(id),
                state: record(id),
            });
        }
        store.apply_changes(&batch).unwrap();
    }

    // -----------------------------------------------------------------------
    // Contract
    // -----------------------------------------------------------------------

    #[test]
    fn conformance_suite() {
        let dir = tempfile::tempdir().unwrap();
        let counter = AtomicUsize::new(0);
        conformance::run_all(|| {
            let n = counter.fetch_add(1, Ordering::Relaxed);
            open(dir.path(), &format!("container-{n}"))
        });
    }

    // -----------------------------------------------------------------------
    // Backend specifics
    // -----------------------------------------------------------------------

    #[test]
    fn references_with_separators_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path(), "c");
        create(&store, &["tenant/a/user 1"]);
        assert_eq!(store.get(&r("tenant/a/user 1")).unwrap(), record("tenant/a/user 1"));
    }

    #[test]
    fn long_references_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path(), "c");
        let long = format!("tenant/{}", "a".repeat(300));
        create(&store, &[long.as_str(), "short"]);

        assert_eq!(store.get(&r(&long)).unwrap(), record(&long));
        assert!(store.contains(&r(&long)).unwrap());
        let ids: Vec<_> = store
            .entity_states()
            .unwrap()
            .map(|rec| StateCodec::identity_of(&rec.unwrap()).unwrap().into_string())
            .collect();
        assert_eq!(ids, vec!["short".to_string(), long.clone()]);

        let mut batch = ChangeBatch::new();
        batch.remove_entity(r(&long));
        store.apply_changes(&batch).unwrap();
        assert!(store.get(&r(&long)).unwrap_err().is_not_found());
    }

    #[test]
    fn enumeration_spans_pages() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path(), "c");
        create(&store, &["a", "b", "c", "d", "e"]);
        let ids: Vec<_> = store
            .entity_states()
            .unwrap()
            .map(|rec| StateCodec::identity_of(&rec.unwrap()).unwrap().into_string())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn enumeration_skips_blobs_removed_mid_walk() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path(), "c");
        create(&store, &["a", "b", "c"]);
        let mut states = store.entity_states().unwrap();
        assert!(states.next().unwrap().is_ok());

        // "b" is already listed in the first page.
        store.blobs.remove_blob("c", "b").unwrap();
        let rest: Vec<_> = states.map(|rec| rec.unwrap()).collect();
        assert_eq!(rest, vec![record("c")]);
    }

    #[test]
    fn enumeration_aborts_on_unreadable_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path(), "c");
        create(&store, &["a"]);
        store.blobs.put_blob("c", "b", &[0xff, 0xfe], PutCondition::Always).unwrap();
        create(&store, &["c"]);

        let results: Vec<_> = store.entity_states().unwrap().collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(StoreError::Decoding { .. })));
    }

    #[test]
    fn empty_blob_reads_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path(), "c");
        store.blobs.put_blob("c", "hollow", b"", PutCondition::Always).unwrap();
        assert!(store.get(&r("hollow")).unwrap_err().is_not_found());
    }

    #[test]
    fn failed_restore_leaves_container_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path(), "c");
        create(&store, &["before"]);
        let mut incoming = vec![Ok(record("x")), Ok("nope".to_string())].into_iter();
        assert!(store.restore(&mut incoming).is_err());
        assert_eq!(store.entity_states().unwrap().count(), 0);
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        create(&open(dir.path(), "c"), &["persisted"]);
        let reopened = open(dir.path(), "c");
        assert_eq!(reopened.get(&r("persisted")).unwrap(), record("persisted"));
    }

    #[test]
    fn passivated_store_refuses_work() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path(), "c");
        create(&store, &["a"]);
        let mut states = store.entity_states().unwrap();

        store.passivate().unwrap();
        store.passivate().unwrap();
        assert!(!store.is_active());
        assert!(matches!(store.get(&r("a")), Err(StoreError::StoreUnavailable(_))));
        assert!(matches!(store.apply_changes(&ChangeBatch::new()), Err(StoreError::StoreUnavailable(_))));
        assert!(matches!(store.entity_states().err(), Some(StoreError::StoreUnavailable(_))));
        assert!(matches!(states.next(), Some(Err(StoreError::StoreUnavailable(_)))));
        assert!(states.next().is_none());
    }

    #[test]
    fn invalid_container_fails_activation() {
        let dir = tempfile::tempdir().unwrap();
        let config = BlobStoreConfig {
            container: "../escape".into(),
            ..BlobStoreConfig::at(dir.path())
        };
        assert!(matches!(
            BlobEntityStore::activate(&config, StoreOptions::default()),
            Err(StoreError::StoreUnavailable(_))
        ));
    }
}
