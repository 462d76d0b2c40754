//! Newline-delimited backup streams.
//!
//! Stream layout:
//! ```text
//! <record>\n
//! <record>\n
//! ...
//! ```
//!
//! Every record is a complete, independently parseable state record on a
//! single line. Blank lines are ignored on read. Neither side buffers more
//! than one record, so arbitrarily large stores stream in constant memory.
//! Files may optionally be zstd-compressed as a whole.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use estate_types::EntityState;
use tracing::debug;

use crate::codec::StateCodec;
use crate::error::{CodecError, CodecResult};

/// zstd level used for compressed backups.
const ZSTD_LEVEL: i32 = 3;

/// Whole-stream compression for backup files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Compression {
    #[default]
    None,
    Zstd,
}

impl Compression {
    /// Pick compression from a file name: `.zst` means zstd.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("zst") => Self::Zstd,
            _ => Self::None,
        }
    }
}

/// Writes state records to a backup stream, one per line.
pub struct BackupWriter<W: Write> {
    inner: W,
    records: u64,
}

impl<W: Write> BackupWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, records: 0 }
    }

    /// Append one raw record.
    ///
    /// Records that span several lines (e.g. pretty-printed JSON written by
    /// another tool) are re-serialized compactly first.
    pub fn write_record(&mut self, record: &str) -> CodecResult<()> {
        if record.contains(['\n', '\r']) {
            let compact = StateCodec::compact(record)?;
            self.inner.write_all(compact.as_bytes())?;
        } else {
            self.inner.write_all(record.as_bytes())?;
        }
        self.inner.write_all(b"\n")?;
        self.records += 1;
        Ok(())
    }

    /// Encode and append one state.
    pub fn write_state(&mut self, state: &EntityState) -> CodecResult<()> {
        StateCodec::encode_to_writer(state, &mut self.inner)?;
        self.inner.write_all(b"\n")?;
        self.records += 1;
        Ok(())
    }

    /// Number of records written so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Flush and return the underlying writer.
    pub fn finish(mut self) -> CodecResult<W> {
        self.inner.flush()?;
        debug!(records = self.records, "backup stream finished");
        Ok(self.inner)
    }
}

/// Reads raw records from a backup stream.
///
/// Yields one `Ok(record)` per non-blank line. A read failure is yielded
/// once, tagged with its line number, and ends the iteration.
pub struct BackupReader<R: BufRead> {
    inner: R,
    line: u64,
    buf: String,
    failed: bool,
}

impl<R: BufRead> BackupReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            line: 0,
            buf: String::new(),
            failed: false,
        }
    }

    /// Line number of the most recently returned record (1-based).
    pub fn line(&self) -> u64 {
        self.line
    }

    /// Adapt into an iterator of decoded states.
    ///
    /// Decoding errors carry the line they were found on.
    pub fn states(self) -> DecodedStates<R> {
        DecodedStates { reader: self }
    }
}

/// Iterator returned by [`BackupReader::states`].
pub struct DecodedStates<R: BufRead> {
    reader: BackupReader<R>,
}

impl<R: BufRead> Iterator for DecodedStates<R> {
    type Item = CodecResult<EntityState>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.reader.next()?;
        let line = self.reader.line();
        Some(record.and_then(|text| {
            StateCodec::decode(&text).map_err(|e| CodecError::Line {
                line,
                source: Box::new(e),
            })
        }))
    }
}

impl<R: BufRead> Iterator for BackupReader<R> {
    type Item = CodecResult<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            self.buf.clear();
            self.line += 1;
            match self.inner.read_line(&mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {
                    let record = self.buf.trim_end_matches(['\n', '\r']);
                    if record.trim().is_empty() {
                        continue;
                    }
                    return Some(Ok(record.to_string()));
                }
                Err(e) => {
                    self.failed = true;
                    let source = if e.kind() == io::ErrorKind::InvalidData {
                        CodecError::NotUtf8
                    } else {
                        CodecError::Io(e)
                    };
                    return Some(Err(CodecError::Line {
                        line: self.line,
                        source: Box::new(source),
                    }));
                }
            }
        }
    }
}

/// Output side of a backup file, optionally compressed.
pub enum BackupSink {
    Plain(BufWriter<File>),
    Zstd(zstd::stream::write::Encoder<'static, BufWriter<File>>),
}

impl BackupSink {
    /// Flush everything and, for zstd, write the frame epilogue.
    pub fn close(self) -> io::Result<()> {
        match self {
            Self::Plain(mut w) => w.flush(),
            Self::Zstd(encoder) => encoder.finish()?.flush(),
        }
    }
}

impl Write for BackupSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(w) => w.write(buf),
            Self::Zstd(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(w) => w.flush(),
            Self::Zstd(w) => w.flush(),
        }
    }
}

impl BackupWriter<BackupSink> {
    /// Finish the stream and close the file.
    pub fn close(self) -> CodecResult<u64> {
        let records = self.records;
        self.finish()?.close()?;
        Ok(records)
    }
}

/// Create (truncating) a backup file.
pub fn create_backup_file(path: &Path, compression: Compression) -> CodecResult<BackupWriter<BackupSink>> {
    let file = BufWriter::new(File::create(path)?);
    let sink = match compression {
        Compression::None => BackupSink::Plain(file),
        Compression::Zstd => BackupSink::Zstd(zstd::stream::write::Encoder::new(file, ZSTD_LEVEL)?),
    };
    Ok(BackupWriter::new(sink))
}

/// Open a backup file for streaming reads.
pub fn open_backup_file(
    path: &Path,
    compression: Compression,
) -> CodecResult<BackupReader<Box<dyn BufRead + Send>>> {
    let file = File::open(path)?;
    let reader: Box<dyn BufRead + Send> = match compression {
        Compression::None => Box::new(BufReader::new(file)),
        Compression::Zstd => Box::new(BufReader::new(zstd::stream::read::Decoder::new(file)?)),
    };
    Ok(BackupReader::new(reader))
}
