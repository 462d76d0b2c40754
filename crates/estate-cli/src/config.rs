use std::path::Path;

use anyhow::Context;
use estate_blob::BlobStoreConfig;
use estate_docdb::DocumentStoreConfig;
use estate_store::StoreOptions;
use serde::{Deserialize, Serialize};

/// Contents of `estate.toml`.
///
/// ```toml
/// [options]
/// trace_operations = true
///
/// [backend]
/// kind = "blob"
/// root = "/var/lib/estate/blobs"
/// container = "entities"
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EstateConfig {
    #[serde(default)]
    pub options: StoreOptions,
    pub backend: BackendConfig,
}

/// Which backend to open, with that backend's settings inline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    Memory,
    Blob(BlobStoreConfig),
    Document(DocumentStoreConfig),
}

impl BackendConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Blob(_) => "blob",
            Self::Document(_) => "document",
        }
    }
}

impl EstateConfig {
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(text)?;
        match &config.backend {
            BackendConfig::Memory => {}
            BackendConfig::Blob(blob) => blob.validate()?,
            BackendConfig::Document(doc) => doc.validate()?,
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("invalid configuration in {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use estate_store::WriteConcern;
    use std::path::PathBuf;

    #[test]
    fn memory_backend() {
        let config = EstateConfig::from_toml_str("[backend]\nkind = \"memory\"\n").unwrap();
        assert_eq!(config.backend, BackendConfig::Memory);
        assert!(!config.options.trace_operations);
    }

    #[test]
    fn blob_backend_with_defaults() {
        let config = EstateConfig::from_toml_str(
            r#"
            [options]
            trace_operations = true

            [backend]
            kind = "blob"
            root = "/srv/blobs"
            "#,
        )
        .unwrap();
        assert!(config.options.trace_operations);
        match config.backend {
            BackendConfig::Blob(blob) => {
                assert_eq!(blob.root, PathBuf::from("/srv/blobs"));
                assert_eq!(blob.container, "estate-entities");
                assert_eq!(blob.slices, 10);
            }
            other => panic!("expected blob backend, got {other:?}"),
        }
    }

    #[test]
    fn document_backend() {
        let config = EstateConfig::from_toml_str(
            r#"
            [backend]
            kind = "document"
            path = "/srv/docdb"
            collection = "people"
            write_concern = "journaled"
            "#,
        )
        .unwrap();
        assert_eq!(config.backend.kind(), "document");
        match config.backend {
            BackendConfig::Document(doc) => {
                assert_eq!(doc.collection, "people");
                assert_eq!(doc.database, "estate");
                assert_eq!(doc.write_concern, WriteConcern::Journaled);
            }
            other => panic!("expected document backend, got {other:?}"),
        }
    }

    #[test]
    fn invalid_configurations() {
        assert!(EstateConfig::from_toml_str("").is_err());
        assert!(EstateConfig::from_toml_str("[backend]\nkind = \"tape\"\n").is_err());
        assert!(EstateConfig::from_toml_str("[backend]\nkind = \"blob\"\nslices = 0\n").is_err());
        assert!(EstateConfig::from_toml_str("[backend]\nkind = \"document\"\ncollection = \"a/b\"\n").is_err());
    }
}
