//! Append-only collection journal.
//!
//! On-disk format, repeated:
//! ```text
//! [4 bytes: payload length (little-endian u32)]
//! [4 bytes: CRC32 of payload (little-endian u32)]
//! [N bytes: payload (bincode-serialized JournalRecord)]
//! ```
//!
//! Replaying the journal front to back rebuilds the collection. Records
//! with a bad checksum are skipped; a torn tail ends the replay.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use estate_store::WriteConcern;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{DocumentError, DocumentResult};

const HEADER_SIZE: u64 = 8;

/// One mutation of a collection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalRecord {
    /// Insert or replace `_id`; `body` is the document's fields as JSON.
    Put { id: String, body: String },
    Delete { id: String },
    /// Remove every document.
    Clear,
}

/// Outcome of replaying a journal.
#[derive(Debug, Default)]
pub struct Replay {
    pub records: Vec<JournalRecord>,
    /// Records dropped for a bad checksum or undecodable payload.
    pub skipped: usize,
    /// Byte offset just past the last intact frame.
    pub valid_len: u64,
}

/// Writer side of a collection journal.
///
/// Not synchronized; the owning collection serializes access.
pub struct Journal {
    path: PathBuf,
    writer: BufWriter<File>,
    offset: u64,
    concern: WriteConcern,
}

impl Journal {
    /// Open (or create) the journal at `path` and replay it.
    ///
    /// A torn tail left by a crash is cut off so new records start on a
    /// frame boundary.
    pub fn open(path: &Path, concern: WriteConcern) -> DocumentResult<(Self, Replay)> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let replay = match File::open(path) {
            Ok(file) => replay(file)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Replay::default(),
            Err(e) => return Err(e.into()),
        };

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = file.metadata()?.len();
        if len > replay.valid_len {
            warn!(
                path = %path.display(),
                discarded = len - replay.valid_len,
                "cutting torn journal tail"
            );
            file.set_len(replay.valid_len)?;
        }
        debug!(
            path = %path.display(),
            records = replay.records.len(),
            skipped = replay.skipped,
            "journal replayed"
        );

        Ok((
            Self {
                path: path.to_path_buf(),
                writer: BufWriter::new(file),
                offset: replay.valid_len,
                concern,
            },
            replay,
        ))
    }

    /// Append records and make them as durable as the write concern asks.
    pub fn append(&mut self, records: &[JournalRecord]) -> DocumentResult<()> {
        for record in records {
            let frame = encode_frame(record)?;
            self.writer.write_all(&frame)?;
            self.offset += frame.len() as u64;
        }
        self.settle()
    }

    /// Replace the whole journal with `records`, atomically.
    ///
    /// Used for compaction: the new journal is written beside the old one
    /// and renamed over it.
    pub fn rewrite(&mut self, records: impl IntoIterator<Item = JournalRecord>) -> DocumentResult<()> {
        self.writer.flush()?;
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        let mut written = 0u64;
        {
            let mut out = BufWriter::new(tmp.as_file_mut());
            for record in records {
                let frame = encode_frame(&record)?;
                out.write_all(&frame)?;
                written += frame.len() as u64;
            }
            out.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| DocumentError::Io(e.error))?;

        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.offset = written;
        debug!(path = %self.path.display(), bytes = written, "journal rewritten");
        Ok(())
    }

    /// Push buffered records to the OS and sync them.
    pub fn sync(&mut self) -> DocumentResult<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }

    /// Bytes currently in the journal, including buffered records.
    pub fn len(&self) -> u64 {
        self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.offset == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn settle(&mut self) -> DocumentResult<()> {
        if self.concern.requires_flush() {
            self.writer.flush()?;
        }
        if self.concern.requires_sync() {
            self.writer.get_ref().sync_data()?;
        }
        Ok(())
    }
}

fn encode_frame(record: &JournalRecord) -> DocumentResult<Vec<u8>> {
    let payload = bincode::serialize(record).map_err(|e| DocumentError::Serialization(e.to_string()))?;
    let length = u32::try_from(payload.len())
        .map_err(|_| DocumentError::Serialization(format!("record of {} bytes is too large", payload.len())))?;
    let mut frame = Vec::with_capacity(HEADER_SIZE as usize + payload.len());
    frame.extend_from_slice(&length.to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Read every intact record from a journal file.
pub fn replay(file: File) -> DocumentResult<Replay> {
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let mut out = Replay::default();
    let mut offset = 0u64;

    while offset + HEADER_SIZE <= file_len {
        let mut header = [0u8; HEADER_SIZE as usize];
        reader.read_exact(&mut header)?;
        let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as u64;
        let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        if length == 0 || offset + HEADER_SIZE + length > file_len {
            warn!(offset, length, file_len, "torn journal frame; stopping replay");
            break;
        }

        let mut payload = vec![0u8; length as usize];
        reader.read_exact(&mut payload)?;
        offset += HEADER_SIZE + length;
        out.valid_len = offset;

        if crc32fast::hash(&payload) != expected_crc {
            warn!(offset, "journal checksum mismatch; skipping record");
            out.skipped += 1;
            continue;
        }
        match bincode::deserialize::<JournalRecord>(&payload) {
            Ok(record) => out.records.push(record),
            Err(e) => {
                warn!(offset, error = %e, "undecodable journal record; skipping");
                out.skipped += 1;
            }
        }
    }
    Ok(out)
}
