use std::io::{Read, Write};

use estate_types::{EntityReference, EntityState};
use serde::Deserialize;

use crate::error::{CodecError, CodecResult};

/// Codec between [`EntityState`] and its textual record form.
pub struct StateCodec;

/// The leading fields of a record, read without materializing the rest.
#[derive(Deserialize)]
struct RecordHeader {
    identity: EntityReference,
}

impl StateCodec {
    /// Encode a state as one compact JSON record.
    pub fn encode(state: &EntityState) -> CodecResult<String> {
        validate(state)?;
        Ok(serde_json::to_string(state)?)
    }

    /// Encode directly into a writer.
    pub fn encode_to_writer<W: Write>(state: &EntityState, writer: W) -> CodecResult<()> {
        validate(state)?;
        serde_json::to_writer(writer, state)?;
        Ok(())
    }

    /// Decode a record.
    pub fn decode(record: &str) -> CodecResult<EntityState> {
        let state: EntityState = serde_json::from_str(record)?;
        validate(&state)?;
        Ok(state)
    }

    /// Decode a record held as raw bytes.
    pub fn decode_bytes(record: &[u8]) -> CodecResult<EntityState> {
        let text = std::str::from_utf8(record).map_err(|_| CodecError::NotUtf8)?;
        Self::decode(text)
    }

    /// Decode a record from a reader.
    pub fn decode_from_reader<R: Read>(reader: R) -> CodecResult<EntityState> {
        let state: EntityState = serde_json::from_reader(reader)?;
        validate(&state)?;
        Ok(state)
    }

    /// Recover only the identity a record is stored under.
    ///
    /// Restore uses this to key incoming records; the rest of the record is
    /// still required to be syntactically valid JSON.
    pub fn identity_of(record: &str) -> CodecResult<EntityReference> {
        let header: RecordHeader = serde_json::from_str(record)?;
        Ok(header.identity)
    }

    /// Re-serialize any JSON record in compact single-line form.
    pub fn compact(record: &str) -> CodecResult<String> {
        let value: serde_json::Value = serde_json::from_str(record)?;
        Ok(serde_json::to_string(&value)?)
    }
}

fn validate(state: &EntityState) -> CodecResult<()> {
    if state.entity_type.trim().is_empty() {
        return Err(CodecError::InvalidState(format!(
            "entity {} has an empty type name",
            state.identity
        )));
    }
    let names = state
        .properties
        .keys()
        .chain(state.associations.keys())
        .chain(state.many_associations.keys())
        .chain(state.named_associations.keys());
    for name in names {
        if name.is_empty() {
            return Err(CodecError::InvalidState(format!(
                "entity {} has an empty state name",
                state.identity
            )));
        }
    }
    Ok(())
}
