//! Serialization of entity state for the estate store.
//!
//! One codec is shared by point reads and writes and by backup/restore, so
//! the two paths always agree on the record format.
//!
//! # Record format
//!
//! Each entity state is one JSON object:
//!
//! ```text
//! {"identity":"user-1","type":"User","version":"3","lastModified":1700000000000,
//!  "properties":{"name":"Alice"},"associations":{"manager":null},
//!  "manyAssociations":{},"namedAssociations":{}}
//! ```
//!
//! `lastModified` is always epoch milliseconds.
//!
//! # Backup streams
//!
//! A backup stream is newline-delimited: one compact record per line, in
//! whatever order the backend enumerates. See [`stream`].

pub mod codec;
pub mod error;
pub mod stream;

pub use codec::StateCodec;
pub use error::{CodecError, CodecResult};
pub use stream::{
    create_backup_file, open_backup_file, BackupReader, BackupSink, BackupWriter, Compression,
    DecodedStates,
};
