use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use estate_store::WriteConcern;
use serde::{Deserialize, Serialize};

use crate::error::{DocumentError, DocumentResult};

/// Connection settings for a document-store backend.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentStoreConfig {
    /// Data directory of the embedded database.
    pub path: PathBuf,
    pub database: String,
    pub collection: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub write_concern: WriteConcern,
    /// Upper bound on waiting for a collection lock, in milliseconds.
    pub timeout_ms: u64,
    /// Documents fetched per cursor batch during enumeration.
    pub page_size: usize,
}

impl Default for DocumentStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("estate-data/docdb"),
            database: "estate".into(),
            collection: "entities".into(),
            username: None,
            password: None,
            write_concern: WriteConcern::default(),
            timeout_ms: 5_000,
            page_size: 100,
        }
    }
}

// Masks the password.
impl fmt::Debug for DocumentStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentStoreConfig")
            .field("path", &self.path)
            .field("database", &self.database)
            .field("collection", &self.collection)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("write_concern", &self.write_concern)
            .field("timeout_ms", &self.timeout_ms)
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl DocumentStoreConfig {
    /// Default settings with the data directory at `path`.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn from_toml_str(text: &str) -> DocumentResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| DocumentError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> DocumentResult<Self> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> DocumentResult<()> {
        validate_name(&self.database)?;
        validate_name(&self.collection)?;
        if self.timeout_ms == 0 {
            return Err(DocumentError::InvalidConfig("timeout_ms must be at least 1".into()));
        }
        if self.page_size == 0 {
            return Err(DocumentError::InvalidConfig("page_size must be at least 1".into()));
        }
        if self.password.is_some() && self.username.is_none() {
            return Err(DocumentError::InvalidConfig("password given without username".into()));
        }
        Ok(())
    }
}

/// Database and collection names double as path components.
pub(crate) fn validate_name(name: &str) -> DocumentResult<()> {
    let valid = !name.is_empty()
        && name.len() <= 64
        && !name.starts_with('.')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(DocumentError::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = DocumentStoreConfig::default();
        assert_eq!(c.database, "estate");
        assert_eq!(c.collection, "entities");
        assert_eq!(c.timeout(), Duration::from_secs(5));
        assert_eq!(c.page_size, 100);
        assert!(c.username.is_none());
        assert!(c.validate().is_ok());
    }

    #[test]
    fn toml_with_credentials() {
        let c = DocumentStoreConfig::from_toml_str(
            r#"
            path = "/srv/estate"
            database = "prod"
            username = "app"
            password = "s3cret"
            write_concern = "majority"
            timeout_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(c.database, "prod");
        assert_eq!(c.collection, "entities");
        assert_eq!(c.write_concern, WriteConcern::Majority);
        assert_eq!(c.timeout(), Duration::from_millis(250));
    }

    #[test]
    fn debug_hides_password() {
        let c = DocumentStoreConfig {
            username: Some("app".into()),
            password: Some("s3cret".into()),
            ..DocumentStoreConfig::default()
        };
        let text = format!("{c:?}");
        assert!(!text.contains("s3cret"));
        assert!(text.contains("***"));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(DocumentStoreConfig::from_toml_str("collection = \"a/b\"").is_err());
        assert!(DocumentStoreConfig::from_toml_str("database = \"\"").is_err());
        assert!(DocumentStoreConfig::from_toml_str("timeout_ms = 0").is_err());
        assert!(DocumentStoreConfig::from_toml_str("password = \"x\"").is_err());
    }
}
