use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use estate_codec::{CodecError, StateCodec};
use estate_store::{
    BackupRestore, ChangeBatch, Lifecycle, MapChanger, MapEntityStore, StateRecords, StoreError,
    StoreOptions, StoreResult,
};
use estate_types::EntityReference;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::client::DocumentClient;
use crate::collection::{Document, DocumentCollection, EmbeddedCollection};
use crate::config::DocumentStoreConfig;
use crate::error::DocumentError;

/// Field of the entity document holding the state record.
pub const STATE_FIELD: &str = "state";

/// Map entity store keeping one document per entity.
///
/// The document `_id` is the entity reference and the state record is kept
/// as a structured JSON value under [`STATE_FIELD`]. Reads serialize it
/// back to text. Enumeration walks the collection in `_id` order, one
/// cursor batch at a time, and skips documents without a usable state.
pub struct DocumentEntityStore<C: DocumentCollection = EmbeddedCollection> {
    collection: Arc<C>,
    client: Option<DocumentClient>,
    page_size: usize,
    options: StoreOptions,
    active: AtomicBool,
    /// Shared by point operations, exclusive for restore.
    maintenance: RwLock<()>,
}

impl DocumentEntityStore<EmbeddedCollection> {
    /// Connect to the database described by `config` and bind to its
    /// collection.
    pub fn activate(config: &DocumentStoreConfig, options: StoreOptions) -> StoreResult<Self> {
        let client = DocumentClient::connect(config).map_err(|e| unavailable(config, e))?;
        let collection = client
            .collection(&config.database, &config.collection)
            .map_err(|e| unavailable(config, e))?;
        info!(
            database = %config.database,
            collection = %config.collection,
            documents = collection.count().unwrap_or_default(),
            "document entity store activated"
        );
        let mut store = Self::with_collection(collection, config.page_size, options);
        store.client = Some(client);
        Ok(store)
    }

    /// Rewrite the collection journal down to the live documents.
    pub fn compact(&self) -> StoreResult<()> {
        self.ensure_active()?;
        let _exclusive = self.maintenance.write().expect("lock poisoned");
        Ok(self.collection.compact()?)
    }
}

fn unavailable(config: &DocumentStoreConfig, err: DocumentError) -> StoreError {
    StoreError::StoreUnavailable(format!(
        "cannot open {}/{} at {}: {err}",
        config.database,
        config.collection,
        config.path.display()
    ))
}

impl<C: DocumentCollection> DocumentEntityStore<C> {
    /// Bind to an already-open collection.
    pub fn with_collection(collection: Arc<C>, page_size: usize, options: StoreOptions) -> Self {
        Self {
            collection,
            client: None,
            page_size: page_size.max(1),
            options,
            active: AtomicBool::new(true),
            maintenance: RwLock::new(()),
        }
    }

    pub fn collection(&self) -> &C {
        &self.collection
    }

    fn ensure_active(&self) -> StoreResult<()> {
        if self.active.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::StoreUnavailable(format!(
                "document entity store for {} is passivated",
                self.collection.name()
            )))
        }
    }
}

impl<C: DocumentCollection> fmt::Debug for DocumentEntityStore<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentEntityStore")
            .field("collection", &self.collection.name())
            .field("page_size", &self.page_size)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Build the document for `reference` holding `record`.
fn to_document(reference: &EntityReference, record: &str) -> StoreResult<Document> {
    let state: Value =
        serde_json::from_str(record).map_err(|e| StoreError::decoding(reference, CodecError::Json(e)))?;
    Ok(Document::new(reference.as_str()).with_field(STATE_FIELD, state))
}

/// The state record held by `document`, if it has one.
fn record_of(document: &Document) -> Option<String> {
    match document.get(STATE_FIELD) {
        Some(state @ Value::Object(_)) => Some(state.to_string()),
        _ => None,
    }
}

struct DocumentChanger<'a, C: DocumentCollection> {
    collection: &'a C,
}

impl<C: DocumentCollection> MapChanger for DocumentChanger<'_, C> {
    fn new_entity(&mut self, reference: &EntityReference, state: &str) -> StoreResult<()> {
        match self.collection.insert_one(to_document(reference, state)?) {
            Ok(()) => Ok(()),
            Err(DocumentError::DuplicateKey(_)) => Err(StoreError::EntityAlreadyExists(reference.clone())),
            Err(e) => Err(e.into()),
        }
    }

    fn update_entity(&mut self, reference: &EntityReference, state: &str) -> StoreResult<()> {
        match self.collection.replace_one(to_document(reference, state)?)? {
            0 => Err(StoreError::EntityNotFound(reference.clone())),
            _ => Ok(()),
        }
    }

    fn remove_entity(&mut self, reference: &EntityReference) -> StoreResult<()> {
        if self.collection.delete_one(reference.as_str())? == 0 {
            debug!(reference = %reference, "remove of absent entity");
        }
        Ok(())
    }
}

impl<C: DocumentCollection> MapEntityStore for DocumentEntityStore<C> {
    fn get(&self, reference: &EntityReference) -> StoreResult<String> {
        self.ensure_active()?;
        let _shared = self.maintenance.read().expect("lock poisoned");
        let document = self
            .collection
            .find_one(reference.as_str())?
            .ok_or_else(|| StoreError::EntityNotFound(reference.clone()))?;
        record_of(&document).ok_or_else(|| {
            StoreError::decoding(
                reference,
                CodecError::InvalidState(format!("document has no {STATE_FIELD} object")),
            )
        })
    }

    fn contains(&self, reference: &EntityReference) -> StoreResult<bool> {
        self.ensure_active()?;
        let _shared = self.maintenance.read().expect("lock poisoned");
        Ok(self.collection.exists(reference.as_str())?)
    }

    fn apply_changes(&self, changes: &ChangeBatch) -> StoreResult<()> {
        self.ensure_active()?;
        let _shared = self.maintenance.read().expect("lock poisoned");
        let mut changer = DocumentChanger {
            collection: &*self.collection,
        };
        changes.visit(&mut changer, &self.options)?;
        Ok(())
    }

    fn entity_states(&self) -> StoreResult<StateRecords<'_>> {
        self.ensure_active()?;
        Ok(Box::new(DocumentRecords {
            store: self,
            after: None,
            pending: VecDeque::new(),
            exhausted: false,
            failed: false,
        }))
    }
}

/// Cursor over the collection in `_id` order.
struct DocumentRecords<'a, C: DocumentCollection> {
    store: &'a DocumentEntityStore<C>,
    after: Option<String>,
    pending: VecDeque<Document>,
    exhausted: bool,
    failed: bool,
}

impl<C: DocumentCollection> Iterator for DocumentRecords<'_, C> {
    type Item = StoreResult<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.failed {
                return None;
            }
            if let Some(document) = self.pending.pop_front() {
                match record_of(&document) {
                    Some(record) => return Some(Ok(record)),
                    None => {
                        warn!(id = %document.id, "skipping document without a state record");
                        continue;
                    }
                }
            }
            if self.exhausted {
                return None;
            }
            let batch = self.store.ensure_active().and_then(|()| {
                let _shared = self.store.maintenance.read().expect("lock poisoned");
                self.store
                    .collection
                    .find_page(self.after.as_deref(), self.store.page_size)
                    .map_err(StoreError::from)
            });
            match batch {
                Ok(documents) => {
                    self.exhausted = documents.len() < self.store.page_size;
                    self.after = documents.last().map(|d| d.id.clone()).or(self.after.take());
                    self.pending.extend(documents);
                }
                Err(e) => {
                    self.failed = true;
                    warn!(collection = %self.store.collection.name(), error = %e, "enumeration aborted");
                    return Some(Err(e));
                }
            }
        }
    }
}

impl<C: DocumentCollection> BackupRestore for DocumentEntityStore<C> {
    fn backup(&self) -> StoreResult<StateRecords<'_>> {
        self.entity_states()
    }

    fn restore(&self, records: &mut dyn Iterator<Item = StoreResult<String>>) -> StoreResult<u64> {
        self.ensure_active()?;
        let _exclusive = self.maintenance.write().expect("lock poisoned");
        let cleared = self.collection.delete_many()?;
        debug!(collection = %self.collection.name(), cleared, "collection cleared for restore");

        let mut restored = HashSet::new();
        let result = (|| -> StoreResult<()> {
            for record in records {
                let record = record?;
                let state = StateCodec::decode(&record)?;
                let document = to_document(&state.identity, &record)?;
                match self.collection.insert_one(document.clone()) {
                    Ok(()) => {}
                    Err(DocumentError::DuplicateKey(_)) => {
                        self.collection.replace_one(document)?;
                    }
                    Err(e) => return Err(e.into()),
                }
                restored.insert(state.identity);
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                info!(collection = %self.collection.name(), restored = restored.len(), "document entity store restored");
                Ok(restored.len() as u64)
            }
            Err(e) => {
                warn!(collection = %self.collection.name(), error = %e, "restore failed, emptying collection");
                if let Err(cleanup) = self.collection.delete_many() {
                    warn!(collection = %self.collection.name(), error = %cleanup, "could not empty collection after failed restore");
                }
                Err(e)
            }
        }
    }
}

impl<C: DocumentCollection> Lifecycle for DocumentEntityStore<C> {
    fn passivate(&self) -> StoreResult<()> {
        if !self.active.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(client) = &self.client {
            client.close()?;
        }
        info!(collection = %self.collection.name(), "document entity store passivated");
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}
