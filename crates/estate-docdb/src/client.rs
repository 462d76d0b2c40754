use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use estate_store::WriteConcern;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::collection::EmbeddedCollection;
use crate::config::{validate_name, DocumentStoreConfig};
use crate::error::{DocumentError, DocumentResult};

const ACCESS_FILE: &str = "access.toml";
const PASSWORD_CONTEXT: &str = "estate-docdb 2024 access-list password";

/// Digest stored in the access list for `password`.
pub fn hash_password(password: &str) -> String {
    blake3::Hash::from(blake3::derive_key(PASSWORD_CONTEXT, password.as_bytes()))
        .to_hex()
        .to_string()
}

/// One account allowed to connect.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessEntry {
    pub username: String,
    /// Hex digest from [`hash_password`].
    pub password_digest: String,
}

/// Accounts allowed to connect to a data directory, kept in
/// `<path>/access.toml`. A directory without the file is open to anyone.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessList {
    #[serde(default)]
    pub users: Vec<AccessEntry>,
}

impl AccessList {
    pub fn with_user(mut self, username: &str, password: &str) -> Self {
        self.users.push(AccessEntry {
            username: username.to_string(),
            password_digest: hash_password(password),
        });
        self
    }

    /// Read the access list of `data_dir`, if it has one.
    pub fn load(data_dir: &Path) -> DocumentResult<Option<Self>> {
        let path = data_dir.join(ACCESS_FILE);
        match std::fs::read_to_string(&path) {
            Ok(text) => toml::from_str(&text)
                .map(Some)
                .map_err(|e| DocumentError::InvalidConfig(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, data_dir: &Path) -> DocumentResult<()> {
        std::fs::create_dir_all(data_dir)?;
        let text = toml::to_string(self).map_err(|e| DocumentError::Serialization(e.to_string()))?;
        std::fs::write(data_dir.join(ACCESS_FILE), text)?;
        Ok(())
    }

    /// Whether `username` exists and `password` matches its digest.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        let presented = blake3::Hash::from(blake3::derive_key(PASSWORD_CONTEXT, password.as_bytes()));
        self.users
            .iter()
            .filter(|entry| entry.username == username)
            .filter_map(|entry| blake3::Hash::from_hex(&entry.password_digest).ok())
            .any(|stored| stored == presented)
    }
}

/// Connection to an embedded document database directory.
///
/// Collections are opened lazily and shared: asking twice for the same
/// database and collection returns the same handle.
pub struct DocumentClient {
    path: PathBuf,
    concern: WriteConcern,
    timeout: Duration,
    collections: Mutex<HashMap<(String, String), Arc<EmbeddedCollection>>>,
    closed: AtomicBool,
}

impl DocumentClient {
    /// Connect to the data directory named by `config`, authenticating
    /// against its access list when one exists.
    pub fn connect(config: &DocumentStoreConfig) -> DocumentResult<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.path)?;

        match AccessList::load(&config.path)? {
            Some(access) => {
                let (Some(username), Some(password)) = (&config.username, &config.password) else {
                    return Err(DocumentError::AuthFailed(
                        config.username.clone().unwrap_or_else(|| "<anonymous>".into()),
                    ));
                };
                if !access.verify(username, password) {
                    warn!(path = %config.path.display(), username = %username, "authentication rejected");
                    return Err(DocumentError::AuthFailed(username.clone()));
                }
                debug!(username = %username, "authenticated");
            }
            None if config.username.is_some() => {
                debug!(path = %config.path.display(), "no access list; credentials ignored");
            }
            None => {}
        }

        info!(path = %config.path.display(), write_concern = %config.write_concern, "document client connected");
        Ok(Self {
            path: config.path.clone(),
            concern: config.write_concern,
            timeout: config.timeout(),
            collections: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Handle to `collection` in `database`, opening it on first use.
    pub fn collection(&self, database: &str, collection: &str) -> DocumentResult<Arc<EmbeddedCollection>> {
        if self.is_closed() {
            return Err(DocumentError::Closed);
        }
        validate_name(database)?;
        validate_name(collection)?;

        let mut open = self.collections.lock().expect("lock poisoned");
        let key = (database.to_string(), collection.to_string());
        if let Some(handle) = open.get(&key) {
            return Ok(Arc::clone(handle));
        }
        let journal = self.path.join(database).join(format!("{collection}.journal"));
        let handle = Arc::new(EmbeddedCollection::open(collection, &journal, self.concern, self.timeout)?);
        open.insert(key, Arc::clone(&handle));
        Ok(handle)
    }

    /// Names of the collections present on disk in `database`.
    pub fn list_collections(&self, database: &str) -> DocumentResult<Vec<String>> {
        validate_name(database)?;
        let dir = self.path.join(database);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        for entry in entries {
            let file_name = entry?.file_name();
            if let Some(name) = file_name.to_str().and_then(|n| n.strip_suffix(".journal")) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Close every open collection. Later calls fail with
    /// [`DocumentError::Closed`].
    pub fn close(&self) -> DocumentResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let open = std::mem::take(&mut *self.collections.lock().expect("lock poisoned"));
        let mut first_error = None;
        for ((database, name), handle) in open {
            if let Err(e) = handle.close() {
                warn!(database = %database, collection = %name, error = %e, "collection did not close cleanly");
                first_error.get_or_insert(e);
            }
        }
        info!(path = %self.path.display(), "document client closed");
        first_error.map_or(Ok(()), Err)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for DocumentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentClient")
            .field("path", &self.path)
            .field("write_concern", &self.concern)
            .field("closed", &self.is_closed())
            .finish()
    }
}
