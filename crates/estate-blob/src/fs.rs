//! File-system blob store.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/.slices                    slice count, fixed at creation
//! <root>/<container>/.staging/      temp files awaiting rename
//! <root>/<container>/<slice>/<name> one file per blob
//! <root>/<container>/<slice>/.<name>.name
//!                                    full blob name of a hashed file
//! ```
//!
//! Blob names are escaped to the portable alphabet `[A-Za-z0-9_.-]`; every
//! other UTF-16 unit (and a leading `.`) becomes `~` plus four hex digits.
//! Escaped names longer than 200 bytes are stored under a prefix of the
//! escaped name, `~~`, and the BLAKE3 hash of the blob name, with the full
//! name kept in a hidden side file. The slice is picked from a hash of the
//! file name so any one directory stays small. Every write lands in a
//! staging file first and is renamed into place, so readers see either the
//! old blob or the new one.

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use estate_store::WriteConcern;
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::blob::{BlobMetadata, BlobStore, ListPage, PutCondition};
use crate::error::{BlobError, BlobResult};

const SLICES_FILE: &str = ".slices";
const STAGING_DIR: &str = ".staging";

/// Longest escaped name used verbatim as a file name.
const MAX_PLAIN_FILE_NAME: usize = 200;
/// Bytes of an over-long escaped name kept in front of its hash.
const HASHED_PREFIX_LEN: usize = 120;
/// Never produced by escaping, so it marks hashed file names.
const HASH_SEPARATOR: &str = "~~";
/// Listings kept open for follow-up pages.
const LISTING_CURSORS: usize = 16;

/// Blob store backed by a directory tree.
///
/// Conditional puts are exact within one process: every mutation runs under
/// a store-wide lock. Separate processes sharing a root still get atomic
/// renames, but `IfExists` can race with a concurrent remove.
///
/// A listing walks and sorts the container once. The names past the page
/// are kept as a cursor, so the next page continues from memory as long as
/// this store has not written anything in between.
pub struct FileSystemBlobStore {
    root: PathBuf,
    slices: u32,
    write_concern: WriteConcern,
    write_lock: Mutex<()>,
    /// Bumped after every mutation; cursors from an older generation are stale.
    generation: AtomicU64,
    cursors: Mutex<VecDeque<ListingCursor>>,
    walks: AtomicU64,
}

/// Sorted names still to be listed after `marker`.
struct ListingCursor {
    container: String,
    marker: String,
    generation: u64,
    remaining: VecDeque<String>,
}

impl FileSystemBlobStore {
    /// Open the store at `root`, creating it with `slices` slice
    /// directories per container if it does not exist yet.
    pub fn open(root: &Path, slices: u32, write_concern: WriteConcern) -> BlobResult<Self> {
        if slices == 0 {
            return Err(BlobError::InvalidConfig("slices must be at least 1".into()));
        }
        fs::create_dir_all(root)
            .map_err(|e| BlobError::Unavailable(format!("cannot create {}: {e}", root.display())))?;

        let slices_file = root.join(SLICES_FILE);
        let slices = match fs::read_to_string(&slices_file) {
            Ok(text) => {
                let stored = text
                    .trim()
                    .parse::<u32>()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| {
                        BlobError::InvalidConfig(format!("corrupt slice count in {}", slices_file.display()))
                    })?;
                if stored != slices {
                    debug!(requested = slices, stored, "keeping slice count of existing store");
                }
                stored
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::write(&slices_file, slices.to_string())?;
                slices
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            root: root.to_path_buf(),
            slices,
            write_concern,
            write_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            cursors: Mutex::new(VecDeque::new()),
            walks: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn slices(&self) -> u32 {
        self.slices
    }

    fn container_dir(&self, container: &str) -> BlobResult<PathBuf> {
        validate_container_name(container)?;
        let dir = self.root.join(container);
        if !dir.is_dir() {
            return Err(BlobError::ContainerNotFound(container.to_string()));
        }
        Ok(dir)
    }

    /// Number of full container walks done by [`BlobStore::list`].
    pub fn listing_walks(&self) -> u64 {
        self.walks.load(Ordering::Relaxed)
    }

    fn blob_path(&self, container_dir: &Path, name: &str) -> BlobResult<PathBuf> {
        if name.is_empty() {
            return Err(BlobError::InvalidBlobName(name.to_string()));
        }
        let file = file_name_for(name);
        let slice = slice_of(&file, self.slices);
        Ok(container_dir.join(slice.to_string()).join(file))
    }

    fn touch(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Every blob name in the container, sorted, that sorts after `marker`.
    fn sorted_names(&self, container_dir: &Path, marker: Option<&str>) -> BlobResult<VecDeque<String>> {
        self.walks.fetch_add(1, Ordering::Relaxed);
        let mut names = Vec::new();
        for entry in blob_files(container_dir) {
            let entry = entry.map_err(walk_error)?;
            let file = entry.file_name().to_string_lossy();
            if file.starts_with('.') {
                continue;
            }
            let name = if file.contains(HASH_SEPARATOR) {
                match fs::read_to_string(side_file(entry.path())) {
                    Ok(name) if file_name_for(&name) == file => Some(name),
                    Ok(_) => None,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        debug!(file = %entry.path().display(), "hashed blob without name file");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                }
            } else {
                unescape_name(&file)
            };
            match name {
                Some(name) if marker.map_or(true, |m| name.as_str() > m) => names.push(name),
                Some(_) => {}
                None => warn!(file = %entry.path().display(), "ignoring foreign file in container"),
            }
        }
        names.sort();
        Ok(names.into())
    }

    fn take_cursor(&self, container: &str, marker: &str, generation: u64) -> Option<VecDeque<String>> {
        let mut cursors = self.cursors.lock().expect("lock poisoned");
        let at = cursors
            .iter()
            .position(|c| c.container == container && c.marker == marker)?;
        let cursor = cursors.remove(at)?;
        (cursor.generation == generation).then_some(cursor.remaining)
    }

    fn keep_cursor(&self, cursor: ListingCursor) {
        let mut cursors = self.cursors.lock().expect("lock poisoned");
        if cursors.len() >= LISTING_CURSORS {
            cursors.pop_front();
        }
        cursors.push_back(cursor);
    }

    fn stage(&self, container_dir: &Path, data: &[u8]) -> BlobResult<NamedTempFile> {
        let staging = container_dir.join(STAGING_DIR);
        fs::create_dir_all(&staging)?;
        let mut tmp = NamedTempFile::new_in(&staging)?;
        tmp.write_all(data)?;
        if self.write_concern.requires_flush() {
            tmp.flush()?;
        }
        if self.write_concern.requires_sync() {
            tmp.as_file().sync_all()?;
        }
        Ok(tmp)
    }

    fn sync_parent(&self, path: &Path) -> BlobResult<()> {
        if self.write_concern.requires_sync() {
            if let Some(parent) = path.parent() {
                sync_dir(parent)?;
            }
        }
        Ok(())
    }
}

impl BlobStore for FileSystemBlobStore {
    fn create_container_if_absent(&self, container: &str) -> BlobResult<bool> {
        validate_container_name(container)?;
        let dir = self.root.join(container);
        if dir.is_dir() {
            return Ok(false);
        }
        fs::create_dir_all(dir.join(STAGING_DIR))?;
        debug!(container, "created container");
        Ok(true)
    }

    fn container_exists(&self, container: &str) -> BlobResult<bool> {
        validate_container_name(container)?;
        Ok(self.root.join(container).is_dir())
    }

    fn blob_exists(&self, container: &str, name: &str) -> BlobResult<bool> {
        let dir = self.container_dir(container)?;
        Ok(self.blob_path(&dir, name)?.is_file())
    }

    fn get_blob(&self, container: &str, name: &str) -> BlobResult<Option<Vec<u8>>> {
        let dir = self.container_dir(container)?;
        match fs::read(self.blob_path(&dir, name)?) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn blob_metadata(&self, container: &str, name: &str) -> BlobResult<Option<BlobMetadata>> {
        Ok(self.get_blob(container, name)?.map(|data| BlobMetadata {
            name: name.to_string(),
            etag: etag_of(&data),
            size: data.len() as u64,
        }))
    }

    fn put_blob(&self, container: &str, name: &str, data: &[u8], condition: PutCondition) -> BlobResult<String> {
        let dir = self.container_dir(container)?;
        let path = self.blob_path(&dir, name)?;
        let precondition_failed = || BlobError::PreconditionFailed {
            name: name.to_string(),
            condition: condition.name(),
        };

        let _guard = self.write_lock.lock().expect("lock poisoned");
        match condition {
            PutCondition::IfAbsent if path.exists() => return Err(precondition_failed()),
            PutCondition::IfExists if !path.is_file() => return Err(precondition_failed()),
            _ => {}
        }

        let tmp = self.stage(&dir, data)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        if is_hashed(&path) {
            self.stage(&dir, name.as_bytes())?
                .persist(side_file(&path))
                .map_err(|e| BlobError::Io(e.error))?;
        }
        let persisted = match condition {
            PutCondition::IfAbsent => tmp.persist_noclobber(&path).map(drop).map_err(|e| {
                if e.error.kind() == io::ErrorKind::AlreadyExists {
                    precondition_failed()
                } else {
                    BlobError::Io(e.error)
                }
            }),
            PutCondition::Always | PutCondition::IfExists => {
                tmp.persist(&path).map(drop).map_err(|e| BlobError::Io(e.error))
            }
        };
        self.touch();
        persisted?;
        self.sync_parent(&path)?;
        Ok(etag_of(data))
    }

    fn remove_blob(&self, container: &str, name: &str) -> BlobResult<bool> {
        let dir = self.container_dir(container)?;
        let path = self.blob_path(&dir, name)?;
        let _guard = self.write_lock.lock().expect("lock poisoned");
        let removed = match fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        self.touch();
        if is_hashed(&path) {
            remove_if_present(&side_file(&path))?;
        }
        if removed {
            self.sync_parent(&path)?;
        }
        Ok(removed)
    }

    fn list(&self, container: &str, marker: Option<&str>, max: usize) -> BlobResult<ListPage> {
        let dir = self.container_dir(container)?;
        let max = max.max(1);
        let generation = self.generation.load(Ordering::Acquire);
        let mut remaining = match marker.and_then(|m| self.take_cursor(container, m, generation)) {
            Some(remaining) => remaining,
            None => self.sorted_names(&dir, marker)?,
        };
        let take = max.min(remaining.len());
        let names: Vec<String> = remaining.drain(..take).collect();
        let next_marker = if remaining.is_empty() {
            None
        } else {
            names.last().cloned()
        };
        if let Some(marker) = &next_marker {
            self.keep_cursor(ListingCursor {
                container: container.to_string(),
                marker: marker.clone(),
                generation,
                remaining,
            });
        }
        Ok(ListPage { names, next_marker })
    }

    fn clear_container(&self, container: &str) -> BlobResult<u64> {
        let dir = self.container_dir(container)?;
        let _guard = self.write_lock.lock().expect("lock poisoned");
        let mut removed = 0;
        let result = (|| -> BlobResult<()> {
            for entry in blob_files(&dir) {
                let entry = entry.map_err(walk_error)?;
                let is_blob = !entry.file_name().to_string_lossy().starts_with('.');
                if remove_if_present(entry.path())? && is_blob {
                    removed += 1;
                }
            }
            Ok(())
        })();
        self.touch();
        result?;
        debug!(container, removed, "cleared container");
        Ok(removed)
    }
}

/// Files exactly one level below the slice directories.
fn blob_files(container_dir: &Path) -> impl Iterator<Item = walkdir::Result<walkdir::DirEntry>> {
    WalkDir::new(container_dir)
        .max_depth(2)
        .into_iter()
        .filter_entry(|e| e.depth() != 1 || !e.file_name().to_string_lossy().starts_with('.'))
        .filter(|e| e.as_ref().map_or(true, |e| e.depth() == 2 && e.file_type().is_file()))
}

fn remove_if_present(path: &Path) -> BlobResult<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// File name a blob is stored under.
fn file_name_for(name: &str) -> String {
    let escaped = escape_name(name);
    if escaped.len() <= MAX_PLAIN_FILE_NAME {
        return escaped;
    }
    format!(
        "{}{HASH_SEPARATOR}{}",
        &escaped[..HASHED_PREFIX_LEN],
        blake3::hash(name.as_bytes()).to_hex()
    )
}

fn is_hashed(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|f| f.to_string_lossy().contains(HASH_SEPARATOR))
}

/// Hidden file beside a hashed blob holding its full name.
fn side_file(blob: &Path) -> PathBuf {
    let file = blob.file_name().map(|f| f.to_string_lossy().into_owned()).unwrap_or_default();
    blob.with_file_name(format!(".{file}.name"))
}

fn walk_error(err: walkdir::Error) -> BlobError {
    let message = err.to_string();
    BlobError::Io(err.into_io_error().unwrap_or_else(|| io::Error::other(message)))
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

fn etag_of(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

fn slice_of(escaped: &str, slices: u32) -> u32 {
    let hash = blake3::hash(escaped.as_bytes());
    let bytes = hash.as_bytes();
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) % slices
}

fn is_portable(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-')
}

/// Map a blob name onto a portable file name.
pub fn escape_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 16);
    for (i, ch) in name.chars().enumerate() {
        if is_portable(ch) && !(i == 0 && ch == '.') {
            out.push(ch);
        } else {
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                out.push_str(&format!("~{unit:04x}"));
            }
        }
    }
    out
}

/// Inverse of [`escape_name`]. Returns `None` for any file name
/// [`escape_name`] would not have produced.
pub fn unescape_name(file: &str) -> Option<String> {
    let mut units = Vec::with_capacity(file.len());
    let mut chars = file.chars();
    while let Some(ch) = chars.next() {
        if ch == '~' {
            let hex: String = chars.by_ref().take(4).collect();
            if hex.len() != 4 {
                return None;
            }
            units.push(u16::from_str_radix(&hex, 16).ok()?);
        } else if is_portable(ch) {
            units.push(ch as u16);
        } else {
            return None;
        }
    }
    let name = String::from_utf16(&units).ok()?;
    (escape_name(&name) == file).then_some(name)
}

pub(crate) fn validate_container_name(name: &str) -> BlobResult<()> {
    let valid = !name.is_empty()
        && name.len() <= 255
        && !name.starts_with('.')
        && name.chars().all(is_portable);
    if valid {
        Ok(())
    } else {
        Err(BlobError::InvalidContainerName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn store(dir: &Path) -> FileSystemBlobStore {
        let store = FileSystemBlobStore::open(dir, 4, WriteConcern::Acknowledged).unwrap();
        store.create_container_if_absent("c").unwrap();
        store
    }

    // -----------------------------------------------------------------------
    // Name escaping
    // -----------------------------------------------------------------------

    #[test]
    fn portable_names_pass_through() {
        assert_eq!(escape_name("user-1_a.json"), "user-1_a.json");
    }

    #[test]
    fn other_characters_are_hex_escaped() {
        assert_eq!(escape_name("a/b"), "a~002fb");
        assert_eq!(escape_name("x y~"), "x~0020y~007e");
        assert_eq!(escape_name(".."), "~002e.");
        assert_eq!(escape_name("é"), "~00e9");
    }

    #[test]
    fn escaping_is_reversible() {
        for name in ["user-1", "a/b/c", "..", ".hidden", "tilde~", "snow☃", "emoji😀", "sp ace"] {
            assert_eq!(unescape_name(&escape_name(name)).as_deref(), Some(name), "{name}");
        }
    }

    #[test]
    fn unescape_rejects_foreign_names() {
        assert!(unescape_name("a b").is_none());
        assert!(unescape_name("~12").is_none());
        assert!(unescape_name("~zzzz").is_none());
        assert!(unescape_name("~+02f").is_none());
        assert!(unescape_name("a~002F").is_none());
        assert!(unescape_name(".hidden").is_none());
    }

    #[test]
    fn container_names() {
        assert!(validate_container_name("estate-entities").is_ok());
        for bad in ["", ".staging", "a/b", "a b"] {
            assert!(validate_container_name(bad).is_err(), "{bad:?}");
        }
    }

    // -----------------------------------------------------------------------
    // Store
    // -----------------------------------------------------------------------

    #[test]
    fn slice_count_is_fixed_at_creation() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(FileSystemBlobStore::open(dir.path(), 7, WriteConcern::default()).unwrap().slices(), 7);
        assert_eq!(FileSystemBlobStore::open(dir.path(), 3, WriteConcern::default()).unwrap().slices(), 7);
        assert!(FileSystemBlobStore::open(dir.path(), 0, WriteConcern::default()).is_err());
    }

    #[test]
    fn corrupt_slice_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(SLICES_FILE), "many").unwrap();
        assert!(matches!(
            FileSystemBlobStore::open(dir.path(), 4, WriteConcern::default()),
            Err(BlobError::InvalidConfig(_))
        ));
    }

    #[test]
    fn containers_are_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSystemBlobStore::open(dir.path(), 4, WriteConcern::default()).unwrap();
        assert!(!store.container_exists("c").unwrap());
        assert!(store.create_container_if_absent("c").unwrap());
        assert!(!store.create_container_if_absent("c").unwrap());
        assert!(store.container_exists("c").unwrap());
    }

    #[test]
    fn missing_container_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSystemBlobStore::open(dir.path(), 4, WriteConcern::default()).unwrap();
        assert!(matches!(store.get_blob("nope", "a"), Err(BlobError::ContainerNotFound(_))));
    }

    #[test]
    fn put_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let etag = store.put_blob("c", "a/1", b"hello", PutCondition::Always).unwrap();
        assert_eq!(store.get_blob("c", "a/1").unwrap().unwrap(), b"hello");
        let meta = store.blob_metadata("c", "a/1").unwrap().unwrap();
        assert_eq!(meta.etag, etag);
        assert_eq!(meta.size, 5);

        assert!(store.remove_blob("c", "a/1").unwrap());
        assert!(!store.remove_blob("c", "a/1").unwrap());
        assert!(store.get_blob("c", "a/1").unwrap().is_none());
        assert!(store.blob_metadata("c", "a/1").unwrap().is_none());
    }

    #[test]
    fn etag_follows_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let a = store.put_blob("c", "x", b"one", PutCondition::Always).unwrap();
        let b = store.put_blob("c", "x", b"two", PutCondition::Always).unwrap();
        let c = store.put_blob("c", "x", b"one", PutCondition::Always).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn conditional_puts() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let err = store.put_blob("c", "x", b"1", PutCondition::IfExists).unwrap_err();
        assert!(matches!(err, BlobError::PreconditionFailed { condition: "if-exists", .. }));
        assert!(!store.blob_exists("c", "x").unwrap());

        store.put_blob("c", "x", b"1", PutCondition::IfAbsent).unwrap();
        let err = store.put_blob("c", "x", b"2", PutCondition::IfAbsent).unwrap_err();
        assert!(matches!(err, BlobError::PreconditionFailed { condition: "if-absent", .. }));
        assert_eq!(store.get_blob("c", "x").unwrap().unwrap(), b"1");

        store.put_blob("c", "x", b"3", PutCondition::IfExists).unwrap();
        assert_eq!(store.get_blob("c", "x").unwrap().unwrap(), b"3");
    }

    #[test]
    fn concurrent_if_absent_admits_one() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(store(dir.path()));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    store
                        .put_blob("c", "contended", format!("{i}").as_bytes(), PutCondition::IfAbsent)
                        .is_ok()
                })
            })
            .collect();
        let winners = handles.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn listing_is_sorted_and_paginated() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        for i in (0..25).rev() {
            store
                .put_blob("c", &format!("blob/{i:02}"), b"x", PutCondition::Always)
                .unwrap();
        }

        let mut seen = Vec::new();
        let mut marker: Option<String> = None;
        let mut pages = 0;
        loop {
            let page = store.list("c", marker.as_deref(), 10).unwrap();
            pages += 1;
            seen.extend(page.names);
            match page.next_marker {
                Some(m) => marker = Some(m),
                None => break,
            }
        }
        assert_eq!(pages, 3);
        let expected: Vec<_> = (0..25).map(|i| format!("blob/{i:02}")).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn paging_through_a_listing_walks_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        for i in 0..50 {
            store.put_blob("c", &format!("n{i:02}"), b"x", PutCondition::Always).unwrap();
        }

        let mut seen = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let page = store.list("c", marker.as_deref(), 5).unwrap();
            assert!(page.names.len() <= 5);
            seen.extend(page.names);
            match page.next_marker {
                Some(m) => marker = Some(m),
                None => break,
            }
        }
        assert_eq!(seen.len(), 50);
        assert_eq!(store.listing_walks(), 1);
    }

    #[test]
    fn writes_between_pages_refresh_the_listing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        for name in ["a", "b", "c", "d"] {
            store.put_blob("c", name, b"x", PutCondition::Always).unwrap();
        }
        let first = store.list("c", None, 2).unwrap();
        assert_eq!(first.names, vec!["a", "b"]);

        store.put_blob("c", "bb", b"x", PutCondition::Always).unwrap();
        store.remove_blob("c", "c").unwrap();

        let second = store.list("c", first.next_marker.as_deref(), 2).unwrap();
        assert_eq!(second.names, vec!["bb", "d"]);
        assert_eq!(second.next_marker, None);
        assert_eq!(store.listing_walks(), 2);
    }

    #[test]
    fn long_names_are_stored_under_hashed_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let ascii = format!("tenant/{}", "a".repeat(300));
        let sibling = format!("tenant/{}b", "a".repeat(300));
        let wide = "é".repeat(300);
        for name in [&ascii, &sibling, &wide] {
            let file = file_name_for(name);
            assert!(file.len() <= 255 && file.contains(HASH_SEPARATOR), "{file}");
            store.put_blob("c", name, name.as_bytes(), PutCondition::IfAbsent).unwrap();
        }
        for name in [&ascii, &sibling, &wide] {
            assert_eq!(store.get_blob("c", name).unwrap().unwrap(), name.as_bytes());
        }

        let mut expected = vec![ascii.clone(), sibling.clone(), wide.clone()];
        expected.sort();
        assert_eq!(store.list("c", None, 10).unwrap().names, expected);

        let err = store.put_blob("c", &ascii, b"again", PutCondition::IfAbsent).unwrap_err();
        assert!(matches!(err, BlobError::PreconditionFailed { .. }));
        store.put_blob("c", &ascii, b"replaced", PutCondition::IfExists).unwrap();
        assert_eq!(store.get_blob("c", &ascii).unwrap().unwrap(), b"replaced");

        assert!(store.remove_blob("c", &ascii).unwrap());
        assert!(!store.blob_exists("c", &ascii).unwrap());
        assert_eq!(store.list("c", None, 10).unwrap().names.len(), 2);

        assert_eq!(store.clear_container("c").unwrap(), 2);
        assert_eq!(blob_files(&dir.path().join("c")).count(), 0);
    }

    #[test]
    fn short_names_keep_their_escaped_form() {
        let name = "x".repeat(MAX_PLAIN_FILE_NAME);
        assert_eq!(file_name_for(&name), name);
        assert!(file_name_for(&format!("{name}x")).contains(HASH_SEPARATOR));
    }

    #[test]
    fn listing_skips_staging_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.put_blob("c", "real", b"x", PutCondition::Always).unwrap();
        fs::write(dir.path().join("c").join(STAGING_DIR).join("leftover"), b"junk").unwrap();
        fs::create_dir_all(dir.path().join("c").join("0")).unwrap();
        fs::write(dir.path().join("c").join("0").join("bad name"), b"junk").unwrap();
        assert_eq!(store.list("c", None, 100).unwrap().names, vec!["real"]);
    }

    #[test]
    fn clear_container_removes_blobs_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        for name in ["a", "b", "c"] {
            store.put_blob("c", name, b"x", PutCondition::Always).unwrap();
        }
        assert_eq!(store.clear_container("c").unwrap(), 3);
        assert!(store.list("c", None, 10).unwrap().names.is_empty());
        assert!(store.container_exists("c").unwrap());
    }

    #[test]
    fn journaled_writes_sync() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSystemBlobStore::open(dir.path(), 2, WriteConcern::Journaled).unwrap();
        store.create_container_if_absent("c").unwrap();
        store.put_blob("c", "durable", b"x", PutCondition::IfAbsent).unwrap();
        assert!(store.remove_blob("c", "durable").unwrap());
    }
}
