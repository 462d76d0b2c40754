use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use estate_blob::BlobEntityStore;
use estate_codec::{create_backup_file, open_backup_file, Compression, StateCodec};
use estate_docdb::DocumentEntityStore;
use estate_store::{
    backup_to_writer, migrate, restore_from_reader, BackupRestore, ChangeBatch, InMemoryEntityStore, Lifecycle,
    MapEntityStore, StoreResult,
};
use estate_types::{EntityReference, EntityState};
use tracing::{info, warn};

use crate::config::{BackendConfig, EstateConfig};

/// A store the CLI can read, write, back up, and restore.
pub trait EntityBackend: MapEntityStore + BackupRestore {
    /// Release the backend's resources.
    fn shutdown(&self) -> StoreResult<()>;
}

impl EntityBackend for InMemoryEntityStore {
    fn shutdown(&self) -> StoreResult<()> {
        Ok(())
    }
}

impl EntityBackend for BlobEntityStore {
    fn shutdown(&self) -> StoreResult<()> {
        self.passivate()
    }
}

impl EntityBackend for DocumentEntityStore {
    fn shutdown(&self) -> StoreResult<()> {
        self.passivate()
    }
}

/// Open the backend a configuration describes.
pub fn open(config: &EstateConfig) -> anyhow::Result<Box<dyn EntityBackend>> {
    let options = config.options.clone();
    let backend: Box<dyn EntityBackend> = match &config.backend {
        BackendConfig::Memory => {
            warn!("memory backend starts empty and is discarded on exit");
            Box::new(InMemoryEntityStore::with_options(options))
        }
        BackendConfig::Blob(blob) => Box::new(
            BlobEntityStore::activate(blob, options)
                .with_context(|| format!("cannot open blob store at {}", blob.root.display()))?,
        ),
        BackendConfig::Document(doc) => Box::new(
            DocumentEntityStore::activate(doc, options)
                .with_context(|| format!("cannot open document store at {}", doc.path.display()))?,
        ),
    };
    info!(kind = config.backend.kind(), "backend opened");
    Ok(backend)
}

/// Decode one entity.
pub fn load(store: &dyn EntityBackend, reference: &str) -> anyhow::Result<EntityState> {
    let reference = EntityReference::new(reference)?;
    let record = store.get(&reference)?;
    Ok(StateCodec::decode(&record).with_context(|| format!("stored state of {reference} is corrupt"))?)
}

/// Remove one entity. Returns whether it was stored.
pub fn remove(store: &dyn EntityBackend, reference: &str) -> anyhow::Result<bool> {
    let reference = EntityReference::new(reference)?;
    let existed = store.contains(&reference)?;
    let mut batch = ChangeBatch::new();
    batch.remove_entity(reference);
    store.apply_changes(&batch)?;
    Ok(existed)
}

/// Every stored entity, optionally filtered by type, in enumeration order.
pub fn list(store: &dyn EntityBackend, entity_type: Option<&str>, limit: Option<usize>) -> anyhow::Result<Vec<EntityState>> {
    let mut states = Vec::new();
    for record in store.entity_states()? {
        let state = StateCodec::decode(&record?)?;
        if entity_type.is_some_and(|t| t != state.entity_type) {
            continue;
        }
        states.push(state);
        if limit.is_some_and(|n| states.len() >= n) {
            break;
        }
    }
    Ok(states)
}

/// Entity counts by type.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Stats {
    pub total: u64,
    pub by_type: BTreeMap<String, u64>,
    /// Records that could not be decoded.
    pub corrupt: u64,
}

pub fn stats(store: &dyn EntityBackend) -> anyhow::Result<Stats> {
    let mut stats = Stats::default();
    for record in store.entity_states()? {
        stats.total += 1;
        match StateCodec::decode(&record?) {
            Ok(state) => *stats.by_type.entry(state.entity_type).or_default() += 1,
            Err(e) => {
                warn!(error = %e, "undecodable record");
                stats.corrupt += 1;
            }
        }
    }
    Ok(stats)
}

/// Stream every record into `path`. Returns the number written.
pub fn backup_to_file(store: &dyn EntityBackend, path: &Path) -> anyhow::Result<u64> {
    let mut writer = create_backup_file(path, Compression::from_path(path))
        .with_context(|| format!("cannot create {}", path.display()))?;
    let written = backup_to_writer(store, &mut writer)?;
    writer.close()?;
    Ok(written)
}

/// Replace the store's contents with the records in `path`.
pub fn restore_from_file(store: &dyn EntityBackend, path: &Path) -> anyhow::Result<u64> {
    let reader = open_backup_file(path, Compression::from_path(path))
        .with_context(|| format!("cannot open {}", path.display()))?;
    Ok(restore_from_reader(store, reader)?)
}

/// Copy `source` into `target`, replacing the target's contents.
pub fn migrate_into(source: &dyn EntityBackend, target: &dyn EntityBackend) -> anyhow::Result<u64> {
    Ok(migrate(source, target)?)
}
