use std::path::{Path, PathBuf};

use estate_store::WriteConcern;
use serde::{Deserialize, Serialize};

use crate::error::{BlobError, BlobResult};

/// Connection settings for a blob-store backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobStoreConfig {
    /// Root directory of the blob store.
    pub root: PathBuf,
    /// Container holding one blob per entity.
    pub container: String,
    /// Number of slice directories blobs are spread over. Only used when
    /// the store is created; an existing store keeps its own count.
    pub slices: u32,
    /// Blobs fetched per listing round trip during enumeration.
    pub page_size: usize,
    pub write_concern: WriteConcern,
}

impl Default for BlobStoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("estate-data/blobs"),
            container: "estate-entities".into(),
            slices: 10,
            page_size: 100,
            write_concern: WriteConcern::default(),
        }
    }
}

impl BlobStoreConfig {
    /// Default settings rooted at `root`.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(text: &str) -> BlobResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| BlobError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> BlobResult<Self> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> BlobResult<()> {
        if self.slices == 0 {
            return Err(BlobError::InvalidConfig("slices must be at least 1".into()));
        }
        if self.page_size == 0 {
            return Err(BlobError::InvalidConfig("page_size must be at least 1".into()));
        }
        crate::fs::validate_container_name(&self.container)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = BlobStoreConfig::default();
        assert_eq!(c.container, "estate-entities");
        assert_eq!(c.slices, 10);
        assert_eq!(c.page_size, 100);
        assert_eq!(c.write_concern, WriteConcern::Acknowledged);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let c = BlobStoreConfig::from_toml_str(
            r#"
            root = "/var/lib/estate"
            write_concern = "journaled"
            "#,
        )
        .unwrap();
        assert_eq!(c.root, PathBuf::from("/var/lib/estate"));
        assert_eq!(c.write_concern, WriteConcern::Journaled);
        assert_eq!(c.slices, 10);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(BlobStoreConfig::from_toml_str("slices = 0").is_err());
        assert!(BlobStoreConfig::from_toml_str("page_size = 0").is_err());
        assert!(BlobStoreConfig::from_toml_str("container = \"a/b\"").is_err());
        assert!(BlobStoreConfig::from_toml_str("slices = \"ten\"").is_err());
    }
}
