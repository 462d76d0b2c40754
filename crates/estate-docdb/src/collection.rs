use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use estate_store::WriteConcern;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::{DocumentError, DocumentResult};
use crate::journal::{Journal, JournalRecord};

/// A document: an `_id` plus a JSON object of fields.
#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// The operations a document collection offers, modeled on document
/// database drivers.
pub trait DocumentCollection: Send + Sync {
    fn name(&self) -> &str;

    fn find_one(&self, id: &str) -> DocumentResult<Option<Document>>;

    fn exists(&self, id: &str) -> DocumentResult<bool> {
        Ok(self.find_one(id)?.is_some())
    }

    /// Insert a new document; [`DocumentError::DuplicateKey`] if the `_id`
    /// is taken.
    fn insert_one(&self, document: Document) -> DocumentResult<()>;

    /// Replace the document with `document.id`. Returns the number of
    /// documents matched (0 or 1).
    fn replace_one(&self, document: Document) -> DocumentResult<u64>;

    /// Returns the number of documents deleted (0 or 1).
    fn delete_one(&self, id: &str) -> DocumentResult<u64>;

    /// Delete every document. Returns how many were deleted.
    fn delete_many(&self) -> DocumentResult<u64>;

    /// Up to `limit` documents with `_id` strictly greater than `after`,
    /// in `_id` order.
    fn find_page(&self, after: Option<&str>, limit: usize) -> DocumentResult<Vec<Document>>;

    fn count(&self) -> DocumentResult<u64>;
}

/// Collection held in memory and persisted through a journal.
///
/// Every mutation is journaled before it is applied to the in-memory map,
/// with the durability the write concern asks for. Lock waits are bounded
/// by the operation timeout.
pub struct EmbeddedCollection {
    name: String,
    docs: RwLock<BTreeMap<String, Map<String, Value>>>,
    journal: Mutex<Journal>,
    timeout: Duration,
    open: AtomicBool,
}

impl EmbeddedCollection {
    /// Open the collection journaled at `path`, replaying its history.
    pub fn open(name: &str, path: &Path, concern: WriteConcern, timeout: Duration) -> DocumentResult<Self> {
        let (journal, replay) = Journal::open(path, concern)?;
        let mut docs = BTreeMap::new();
        let mut discarded = 0usize;
        for record in replay.records {
            match record {
                JournalRecord::Put { id, body } => match serde_json::from_str::<Map<String, Value>>(&body) {
                    Ok(fields) => {
                        docs.insert(id, fields);
                    }
                    Err(e) => {
                        warn!(collection = name, id = %id, error = %e, "journaled document is not a JSON object; dropping");
                        discarded += 1;
                    }
                },
                JournalRecord::Delete { id } => {
                    docs.remove(&id);
                }
                JournalRecord::Clear => docs.clear(),
            }
        }
        info!(
            collection = name,
            documents = docs.len(),
            skipped = replay.skipped + discarded,
            "collection opened"
        );
        Ok(Self {
            name: name.to_string(),
            docs: RwLock::new(docs),
            journal: Mutex::new(journal),
            timeout,
            open: AtomicBool::new(true),
        })
    }

    /// Rewrite the journal as one record per live document.
    pub fn compact(&self) -> DocumentResult<()> {
        let docs = self.write_docs("compact")?;
        let mut journal = self.lock_journal("compact")?;
        let before = journal.len();
        let snapshot = docs
            .iter()
            .map(|(id, fields)| {
                Ok(JournalRecord::Put {
                    id: id.clone(),
                    body: serde_json::to_string(fields).map_err(|e| DocumentError::Serialization(e.to_string()))?,
                })
            })
            .collect::<DocumentResult<Vec<_>>>()?;
        journal.rewrite(snapshot)?;
        info!(collection = %self.name, before, after = journal.len(), "collection compacted");
        Ok(())
    }

    /// Size of the journal in bytes.
    pub fn journal_len(&self) -> DocumentResult<u64> {
        Ok(self.lock_journal("journal_len")?.len())
    }

    /// Sync the journal and refuse all further operations.
    pub fn close(&self) -> DocumentResult<()> {
        if self.open.swap(false, Ordering::AcqRel) {
            let mut journal = self.journal.lock().expect("lock poisoned");
            journal.sync()?;
            debug!(collection = %self.name, "collection closed");
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> DocumentResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(DocumentError::Closed)
        }
    }

    fn read_docs(&self, operation: &'static str) -> DocumentResult<RwLockReadGuard<'_, BTreeMap<String, Map<String, Value>>>> {
        self.ensure_open()?;
        lock_with_timeout(operation, self.timeout, || self.docs.try_read())
    }

    fn write_docs(&self, operation: &'static str) -> DocumentResult<RwLockWriteGuard<'_, BTreeMap<String, Map<String, Value>>>> {
        self.ensure_open()?;
        lock_with_timeout(operation, self.timeout, || self.docs.try_write())
    }

    fn lock_journal(&self, operation: &'static str) -> DocumentResult<MutexGuard<'_, Journal>> {
        lock_with_timeout(operation, self.timeout, || self.journal.try_lock())
    }

    fn record(&self, operation: &'static str, records: &[JournalRecord]) -> DocumentResult<()> {
        self.lock_journal(operation)?.append(records)
    }
}

/// Poll `try_lock` until it succeeds or `timeout` elapses.
fn lock_with_timeout<G>(
    operation: &'static str,
    timeout: Duration,
    mut try_lock: impl FnMut() -> Result<G, TryLockError<G>>,
) -> DocumentResult<G> {
    let start = Instant::now();
    let mut backoff = Duration::from_micros(50);
    loop {
        match try_lock() {
            Ok(guard) => return Ok(guard),
            Err(TryLockError::Poisoned(_)) => panic!("lock poisoned"),
            Err(TryLockError::WouldBlock) => {
                let elapsed = start.elapsed();
                if elapsed >= timeout {
                    return Err(DocumentError::Timeout { operation, elapsed });
                }
                thread::sleep(backoff.min(timeout - elapsed));
                backoff = (backoff * 2).min(Duration::from_millis(10));
            }
        }
    }
}

fn body_of(document: &Document) -> DocumentResult<String> {
    serde_json::to_string(&document.fields).map_err(|e| DocumentError::Serialization(e.to_string()))
}

impl DocumentCollection for EmbeddedCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn find_one(&self, id: &str) -> DocumentResult<Option<Document>> {
        let docs = self.read_docs("find_one")?;
        Ok(docs.get(id).map(|fields| Document {
            id: id.to_string(),
            fields: fields.clone(),
        }))
    }

    fn exists(&self, id: &str) -> DocumentResult<bool> {
        Ok(self.read_docs("exists")?.contains_key(id))
    }

    fn insert_one(&self, document: Document) -> DocumentResult<()> {
        let mut docs = self.write_docs("insert_one")?;
        if docs.contains_key(&document.id) {
            return Err(DocumentError::DuplicateKey(document.id));
        }
        let body = body_of(&document)?;
        self.record("insert_one", &[JournalRecord::Put {
            id: document.id.clone(),
            body,
        }])?;
        docs.insert(document.id, document.fields);
        Ok(())
    }

    fn replace_one(&self, document: Document) -> DocumentResult<u64> {
        let mut docs = self.write_docs("replace_one")?;
        if !docs.contains_key(&document.id) {
            return Ok(0);
        }
        let body = body_of(&document)?;
        self.record("replace_one", &[JournalRecord::Put {
            id: document.id.clone(),
            body,
        }])?;
        docs.insert(document.id, document.fields);
        Ok(1)
    }

    fn delete_one(&self, id: &str) -> DocumentResult<u64> {
        let mut docs = self.write_docs("delete_one")?;
        if !docs.contains_key(id) {
            return Ok(0);
        }
        self.record("delete_one", &[JournalRecord::Delete { id: id.to_string() }])?;
        docs.remove(id);
        Ok(1)
    }

    fn delete_many(&self) -> DocumentResult<u64> {
        let mut docs = self.write_docs("delete_many")?;
        let deleted = docs.len() as u64;
        self.record("delete_many", &[JournalRecord::Clear])?;
        docs.clear();
        Ok(deleted)
    }

    fn find_page(&self, after: Option<&str>, limit: usize) -> DocumentResult<Vec<Document>> {
        use std::ops::Bound;

        let docs = self.read_docs("find_page")?;
        let lower = match after {
            Some(id) => Bound::Excluded(id.to_string()),
            None => Bound::Unbounded,
        };
        Ok(docs
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(id, fields)| Document {
                id: id.clone(),
                fields: fields.clone(),
            })
            .collect())
    }

    fn count(&self) -> DocumentResult<u64> {
        Ok(self.read_docs("count")?.len() as u64)
    }
}
