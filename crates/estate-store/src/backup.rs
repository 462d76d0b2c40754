//! Glue between [`BackupRestore`] stores and backup streams.

use std::io::{BufRead, Write};

use estate_codec::{BackupReader, BackupWriter};
use tracing::info;

use crate::error::{StoreError, StoreResult};
use crate::traits::BackupRestore;

/// Stream every record of `store` into `writer`.
///
/// Returns the number of records written. The writer is not finished; the
/// caller decides when to flush or close it.
pub fn backup_to_writer<S, W>(store: &S, writer: &mut BackupWriter<W>) -> StoreResult<u64>
where
    S: BackupRestore + ?Sized,
    W: Write,
{
    let mut written = 0;
    for record in store.backup()? {
        writer.write_record(&record?)?;
        written += 1;
    }
    info!(records = written, "backup written");
    Ok(written)
}

/// Replace the contents of `store` with the records read from `reader`.
pub fn restore_from_reader<S, R>(store: &S, reader: BackupReader<R>) -> StoreResult<u64>
where
    S: BackupRestore + ?Sized,
    R: BufRead,
{
    let mut records = reader.map(|r| r.map_err(StoreError::from));
    let restored = store.restore(&mut records)?;
    info!(records = restored, "backup restored");
    Ok(restored)
}

/// Copy every record of `source` into `target`, replacing its contents.
pub fn migrate<S, T>(source: &S, target: &T) -> StoreResult<u64>
where
    S: BackupRestore + ?Sized,
    T: BackupRestore + ?Sized,
{
    let mut records = source.backup()?;
    target.restore(&mut records)
}
