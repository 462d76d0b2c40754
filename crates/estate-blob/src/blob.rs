use std::fmt;

use crate::error::BlobResult;

/// Precondition for [`BlobStore::put_blob`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PutCondition {
    /// Create or overwrite.
    Always,
    /// Create only; fail if the blob exists.
    IfAbsent,
    /// Overwrite only; fail if the blob does not exist.
    IfExists,
}

impl fmt::Display for PutCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl PutCondition {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::IfAbsent => "if-absent",
            Self::IfExists => "if-exists",
        }
    }
}

/// Metadata of one stored blob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobMetadata {
    pub name: String,
    /// Content hash; changes whenever the content does.
    pub etag: String,
    pub size: u64,
}

/// One page of a container listing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Blob names in ascending order.
    pub names: Vec<String>,
    /// Pass as `marker` to fetch the next page; `None` on the last page.
    pub next_marker: Option<String>,
}

/// Container-and-blob storage, as offered by object stores.
///
/// Blob names are arbitrary strings; the store maps them onto its own
/// medium. Implementations must be safe under concurrent use, and each put
/// must replace the whole blob atomically.
pub trait BlobStore: Send + Sync {
    /// Create `container` unless it exists. Returns `true` if created.
    fn create_container_if_absent(&self, container: &str) -> BlobResult<bool>;

    fn container_exists(&self, container: &str) -> BlobResult<bool>;

    fn blob_exists(&self, container: &str, name: &str) -> BlobResult<bool>;

    /// Blob content, or `None` if there is no such blob.
    fn get_blob(&self, container: &str, name: &str) -> BlobResult<Option<Vec<u8>>>;

    fn blob_metadata(&self, container: &str, name: &str) -> BlobResult<Option<BlobMetadata>>;

    /// Store `data` under `name` if `condition` holds. Returns the new etag.
    fn put_blob(&self, container: &str, name: &str, data: &[u8], condition: PutCondition) -> BlobResult<String>;

    /// Delete a blob. Returns `false` if there was none.
    fn remove_blob(&self, container: &str, name: &str) -> BlobResult<bool>;

    /// Up to `max` names strictly after `marker`, in ascending order.
    fn list(&self, container: &str, marker: Option<&str>, max: usize) -> BlobResult<ListPage>;

    /// Delete every blob in the container. Returns how many were removed.
    fn clear_container(&self, container: &str) -> BlobResult<u64>;
}
